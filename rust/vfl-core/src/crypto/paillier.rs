//! Paillier additively homomorphic encryption.
//!
//! Keys use the simplified variant `g = n + 1`, `λ = (p - 1)(q - 1)`, `μ = λ⁻¹ mod n`. Plaintexts
//! live in `[0, n)`; signed integers are represented under the half-range convention, where values
//! above `n / 2` stand for negatives. Ciphertexts live in `[0, n²)`.
//!
//! The homomorphic operations are methods of the [`PublicKey`]:
//!
//! - [`PublicKey::add`] / [`PublicKey::sum`]: `Dec(c₁ · c₂) = m₁ + m₂`
//! - [`PublicKey::add_plain`]: `Dec(c · gᵐ) = Dec(c) + m`
//! - [`PublicKey::mul_plain`]: `Dec(cᵏ) = k · Dec(c)`

use std::{convert::TryFrom, fmt, str::FromStr};

use derive_more::{From, Into};
use num::{
    bigint::{BigInt, BigUint, RandBigInt},
    integer::Integer,
    traits::{One, Signed, Zero},
};
use num_prime::{nt_funcs::is_prime, PrimalityTestConfig};
use rand::rngs::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use zeroize::Zeroizing;

use super::prng::generate_coprime;

/// Bit length of each prime factor when none is configured.
pub const DEFAULT_PRIME_LENGTH: u64 = 512;

/// The shortest prime factor accepted by [`PrivateKey::generate`].
pub const MIN_PRIME_LENGTH: u64 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
/// Errors related to Paillier key generation, encryption and decryption.
pub enum PaillierError {
    #[error("key generation drew the same prime twice")]
    PrimesEqual,
    #[error("prime length of {0} bits is below the minimum of {} bits", MIN_PRIME_LENGTH)]
    InvalidPrimeLength(u64),
    #[error("message does not fit into the plaintext space of the key")]
    MessageOutOfRange,
    #[error("ciphertext is not an element of the ciphertext space of the key")]
    InvalidCiphertext,
    #[error("invalid public key: {0}")]
    InvalidKey(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, From, Into)]
/// A Paillier ciphertext.
///
/// Serialized as a decimal string.
pub struct Ciphertext(BigUint);

impl Ciphertext {
    /// Gets the ciphertext as an integer.
    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

impl Serialize for Ciphertext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Ciphertext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let digits = String::deserialize(deserializer)?;
        BigUint::from_str(&digits)
            .map(Self)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(&digits), &"a decimal ciphertext"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PublicKeyRepr", into = "PublicKeyRepr")]
/// A Paillier public key.
///
/// Serialized as `{"N": "<decimal>", "G": "<decimal>"}`.
pub struct PublicKey {
    n: BigUint,
    g: BigUint,
    n_square: BigUint,
}

#[derive(Serialize, Deserialize)]
struct PublicKeyRepr {
    #[serde(rename = "N")]
    n: String,
    #[serde(rename = "G")]
    g: String,
}

impl From<PublicKey> for PublicKeyRepr {
    fn from(key: PublicKey) -> Self {
        Self {
            n: key.n.to_string(),
            g: key.g.to_string(),
        }
    }
}

impl TryFrom<PublicKeyRepr> for PublicKey {
    type Error = PaillierError;

    fn try_from(repr: PublicKeyRepr) -> Result<Self, Self::Error> {
        let n = BigUint::from_str(&repr.n).map_err(|_| PaillierError::InvalidKey("N"))?;
        let g = BigUint::from_str(&repr.g).map_err(|_| PaillierError::InvalidKey("G"))?;
        Self::new(n, g)
    }
}

impl PublicKey {
    /// Creates a public key from its modulus and generator.
    ///
    /// # Errors
    /// Fails if the modulus is too small or the generator is not an element of `[1, n²)`.
    pub fn new(n: BigUint, g: BigUint) -> Result<Self, PaillierError> {
        if n <= BigUint::from(3_u8) {
            return Err(PaillierError::InvalidKey("modulus too small"));
        }
        let n_square = &n * &n;
        if g.is_zero() || g >= n_square {
            return Err(PaillierError::InvalidKey("generator out of range"));
        }
        Ok(Self { n, g, n_square })
    }

    /// Gets the modulus `n`.
    pub fn n(&self) -> &BigUint {
        &self.n
    }

    /// Gets the generator `g`.
    pub fn g(&self) -> &BigUint {
        &self.g
    }

    /// Gets the bit length of the modulus.
    pub fn bits(&self) -> u64 {
        self.n.bits()
    }

    /// Encrypts a message `0 <= m < n`.
    ///
    /// # Errors
    /// Fails with [`PaillierError::MessageOutOfRange`] if `m >= n`.
    pub fn encrypt(&self, m: &BigUint) -> Result<Ciphertext, PaillierError> {
        if m >= &self.n {
            return Err(PaillierError::MessageOutOfRange);
        }
        let r = generate_coprime(&mut OsRng, &self.n);
        let blinding = r.modpow(&self.n, &self.n_square);
        Ok(Ciphertext((self.g_pow(m) * blinding) % &self.n_square))
    }

    /// Encrypts a signed message under the half-range convention.
    ///
    /// Negative messages are reduced modulo `n` first.
    ///
    /// # Errors
    /// Fails with [`PaillierError::MessageOutOfRange`] if `m >= n`.
    pub fn encrypt_signed(&self, m: &BigInt) -> Result<Ciphertext, PaillierError> {
        if m.is_positive() && m.magnitude() >= &self.n {
            return Err(PaillierError::MessageOutOfRange);
        }
        self.encrypt(&self.reduce(m))
    }

    /// Adds two ciphertexts homomorphically.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        Ciphertext((&a.0 * &b.0) % &self.n_square)
    }

    /// Adds any number of ciphertexts homomorphically.
    ///
    /// The empty sum is the trivial encryption of zero.
    pub fn sum<'a, I>(&self, ciphers: I) -> Ciphertext
    where
        I: IntoIterator<Item = &'a Ciphertext>,
    {
        Ciphertext(
            ciphers
                .into_iter()
                .fold(BigUint::one(), |acc, c| (acc * &c.0) % &self.n_square),
        )
    }

    /// Adds a signed plaintext to a ciphertext homomorphically.
    pub fn add_plain(&self, c: &Ciphertext, m: &BigInt) -> Ciphertext {
        Ciphertext((&c.0 * self.g_pow(&self.reduce(m))) % &self.n_square)
    }

    /// Multiplies a ciphertext by a signed plaintext scalar homomorphically.
    pub fn mul_plain(&self, c: &Ciphertext, k: &BigInt) -> Ciphertext {
        Ciphertext(c.0.modpow(&self.reduce(k), &self.n_square))
    }

    /// Reduces a signed integer into `[0, n)`.
    fn reduce(&self, m: &BigInt) -> BigUint {
        let n = BigInt::from(self.n.clone());
        let (_, magnitude) = m.mod_floor(&n).into_parts();
        magnitude
    }

    /// Computes `gᵐ mod n²`, which collapses to `1 + m·n` for `g = n + 1`.
    fn g_pow(&self, m: &BigUint) -> BigUint {
        if self.g == &self.n + 1_u32 {
            (BigUint::one() + m * &self.n) % &self.n_square
        } else {
            self.g.modpow(m, &self.n_square)
        }
    }

    fn contains(&self, c: &Ciphertext) -> bool {
        !c.0.is_zero() && c.0 < self.n_square
    }
}

/// A Paillier private key.
///
/// The secret integers are held as 32-bit limbs which are zeroed when the key is dropped. The
/// big-integer temporaries of key generation and decryption are not wiped.
pub struct PrivateKey {
    public: PublicKey,
    lambda: Zeroizing<Vec<u32>>,
    mu: Zeroizing<Vec<u32>>,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public", &self.public)
            .field("lambda", &"<redacted>")
            .field("mu", &"<redacted>")
            .finish()
    }
}

impl PrivateKey {
    /// Generates a key pair from two fresh primes of `bits` bits each.
    ///
    /// The primes are searched concurrently.
    ///
    /// # Errors
    /// Fails if `bits` is below [`MIN_PRIME_LENGTH`] or the same prime was drawn twice.
    pub fn generate(bits: u64) -> Result<Self, PaillierError> {
        if bits < MIN_PRIME_LENGTH {
            return Err(PaillierError::InvalidPrimeLength(bits));
        }
        let (p, q) = rayon::join(|| generate_prime(bits), || generate_prime(bits));
        Self::from_primes(&p, &q)
    }

    /// Derives a key pair from two distinct primes.
    ///
    /// # Errors
    /// Fails if the primes are equal or do not yield an invertible `λ`.
    pub fn from_primes(p: &BigUint, q: &BigUint) -> Result<Self, PaillierError> {
        if p == q {
            return Err(PaillierError::PrimesEqual);
        }
        let n = p * q;
        let g = &n + 1_u32;
        let lambda = (p - 1_u32) * (q - 1_u32);
        let mu = lambda
            .modinv(&n)
            .ok_or(PaillierError::InvalidKey("lambda is not invertible modulo n"))?;
        let public = PublicKey::new(n, g)?;
        Ok(Self {
            public,
            lambda: Zeroizing::new(lambda.to_u32_digits()),
            mu: Zeroizing::new(mu.to_u32_digits()),
        })
    }

    /// Gets the public counterpart of this key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Decrypts a ciphertext into `[0, n)`.
    ///
    /// # Errors
    /// Fails with [`PaillierError::InvalidCiphertext`] if `c` is not in `[1, n²)`.
    pub fn decrypt(&self, c: &Ciphertext) -> Result<BigUint, PaillierError> {
        if !self.public.contains(c) {
            return Err(PaillierError::InvalidCiphertext);
        }
        let n = &self.public.n;
        let x = c.0.modpow(&BigUint::from_slice(&self.lambda), &self.public.n_square);
        // L(x) = (x - 1) / n, and x ≡ 1 mod n for every valid ciphertext
        let l = (x - 1_u32) / n;
        Ok((l * BigUint::from_slice(&self.mu)) % n)
    }

    /// Decrypts a ciphertext into a signed integer under the half-range convention.
    ///
    /// # Errors
    /// Fails with [`PaillierError::InvalidCiphertext`] if `c` is not in `[1, n²)`.
    pub fn decrypt_signed(&self, c: &Ciphertext) -> Result<BigInt, PaillierError> {
        let n = BigInt::from(self.public.n.clone());
        let half: BigInt = &n / 2;
        let d = BigInt::from(self.decrypt(c)?);
        Ok((d + &half).mod_floor(&n) - half)
    }
}

fn generate_prime(bits: u64) -> BigUint {
    let mut rng = OsRng;
    let top_and_odd = (BigUint::one() << (bits - 1) as usize) | BigUint::one();
    loop {
        let candidate = rng.gen_biguint(bits) | &top_and_odd;
        if is_prime(&candidate, Some(PrimalityTestConfig::default())).probably() {
            return candidate;
        }
    }
}
