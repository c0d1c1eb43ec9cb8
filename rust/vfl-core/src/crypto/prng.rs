//! Randomness for the crypto primitives.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [crypto module]: crate::crypto

use num::{
    bigint::BigUint,
    integer::Integer,
    traits::{One, Zero},
};
use rand::{CryptoRng, RngCore};
use sodiumoxide::randombytes::randombytes_into;

/// Generates a secure pseudo-random integer.
///
/// Draws from a uniform distribution over the integers between zero (included) and
/// `max_int` (excluded) by rejection sampling on the bit length of `max_int`.
pub fn generate_integer<R: RngCore + CryptoRng>(prng: &mut R, max_int: &BigUint) -> BigUint {
    if max_int.is_zero() {
        return BigUint::zero();
    }
    let mut bytes = max_int.to_bytes_le();
    let excess_bits = bytes.len() as u64 * 8 - max_int.bits();
    let top_mask = 0xff_u8 >> excess_bits;
    let mut rand_int = max_int.clone();
    while &rand_int >= max_int {
        prng.fill_bytes(&mut bytes);
        if let Some(top) = bytes.last_mut() {
            *top &= top_mask;
        }
        rand_int = BigUint::from_bytes_le(&bytes);
    }
    rand_int
}

/// Generates a secure pseudo-random integer in `[1, modulus)` that is coprime to `modulus`.
pub fn generate_coprime<R: RngCore + CryptoRng>(prng: &mut R, modulus: &BigUint) -> BigUint {
    loop {
        let candidate = generate_integer(prng, modulus);
        if !candidate.is_zero() && candidate.gcd(modulus).is_one() {
            return candidate;
        }
    }
}

/// Generates a fresh 64-bit blinding noise from the system entropy source.
pub fn generate_noise() -> u64 {
    let mut bytes = [0_u8; 8];
    randombytes_into(&mut bytes);
    u64::from_be_bytes(bytes)
}
