//! Wrapper around the [sodiumoxide] `SHA256` primitive.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [sodiumoxide]: https://docs.rs/sodiumoxide/
//! [crypto module]: crate::crypto

use derive_more::{AsRef, From};
use sodiumoxide::crypto::hash::sha256;

#[derive(AsRef, From, Hash, Eq, Ord, PartialEq, Copy, Clone, PartialOrd, Debug)]
/// A digest of the `SHA256` hash function.
pub struct Sha256(sha256::Digest);

impl Sha256 {
    /// Length in bytes of a digest.
    pub const LENGTH: usize = sha256::DIGESTBYTES;

    /// Computes the digest of the message `m`.
    pub fn hash(m: &[u8]) -> Self {
        Self(sha256::hash(m))
    }

    /// Gets the digest bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }
}
