//! Cryptographic primitives of the protocol.
//!
//! [`paillier`] is the additively homomorphic scheme every cross-party gradient and cost travels
//! under. The remaining items wrap the [sodiumoxide] hash function and randomness sources the
//! protocol draws from.
//!
//! # Examples
//! ## Homomorphic addition
//! ```
//! # use vfl_core::crypto::paillier::PrivateKey;
//! # use num::BigInt;
//! let secret = PrivateKey::generate(128).unwrap();
//! let public = secret.public_key();
//! let a = public.encrypt_signed(&BigInt::from(-15)).unwrap();
//! let b = public.encrypt_signed(&BigInt::from(40)).unwrap();
//! let sum = public.add(&a, &b);
//! assert_eq!(secret.decrypt_signed(&sum).unwrap(), BigInt::from(25));
//! ```
//!
//! [sodiumoxide]: https://docs.rs/sodiumoxide/

pub(crate) mod hash;
pub mod paillier;
pub(crate) mod prng;

pub use self::{
    hash::Sha256,
    paillier::{Ciphertext, PaillierError, PrivateKey, PublicKey},
    prng::{generate_coprime, generate_integer, generate_noise},
};
