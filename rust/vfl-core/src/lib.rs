#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Vertical federated regression
//!
//! Two parties hold different columns of the same population of samples. The
//! *guest* holds some features, the *host* holds the remaining features and the
//! target label. This crate lets them train a linear or a logistic regression
//! model together, and later score new inputs together, without either party
//! revealing its raw columns, its labels or its intermediate predictions.
//!
//! The building blocks are:
//!
//! - [`crypto::paillier`]: additively homomorphic Paillier encryption over
//!   signed big integers. Every value that crosses the party boundary during
//!   training is encrypted under the key of the party that will eventually
//!   decrypt it, and masked with fresh noise known only to the party that
//!   computed it.
//! - [`psi`]: an elliptic-curve Diffie-Hellman private set intersection over
//!   P-256. Before training the parties learn which sample ids they share and
//!   nothing about the others, and align their tables on the intersection.
//! - [`numeric`]: the fixed-point codec that maps reals onto the Paillier
//!   plaintext space, Z-score standardization and its inverse, mini-batch
//!   selection and evaluation metrics.
//! - [`learner`]: the two regression families, regularization, and the
//!   [`Process`] coordinator that carries one party through the protocol round
//!   by round.
//! - [`message`]: the JSON wire payloads exchanged between the parties.
//!
//! ## A training round
//!
//! In every round each party computes its partial prediction on the current
//! batch, encrypts the parts the peer needs and sends them over. Each party then
//! combines its own plaintext parts with the peer's ciphertexts into encrypted
//! gradients and an encrypted cost, blinds them with noise and sends them back
//! for decryption. After removing its noise a party holds its true gradient and
//! the true cost, updates its coefficients and votes on convergence. Training
//! stops when both parties vote to stop.
//!
//! The protocol assumes honest-but-curious parties that follow it faithfully.
#[macro_use]
extern crate serde;
#[macro_use]
extern crate tracing;

pub mod crypto;
pub mod learner;
pub mod message;
pub mod numeric;
pub mod psi;

use thiserror::Error;

pub use self::learner::{Process, TrainParams};

#[derive(Error, Debug)]
#[error("initialization failed: insufficient system entropy to generate secrets")]
/// An error related to insufficient system entropy for secrets at program startup.
pub struct InitError;

/// Initializes the crypto layer.
///
/// Must be called once before keys or noise are generated. Calling it more than once is harmless.
///
/// # Errors
/// Fails if libsodium cannot be initialized.
pub fn init() -> Result<(), InitError> {
    sodiumoxide::init().map_err(|_| InitError)
}

/// The coarse classification of every error the crate can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Key generation drew the same prime twice.
    PrimesEqual,
    /// A plaintext does not fit into the key's message space.
    MessageOutOfRange,
    /// A payload, point or ciphertext could not be decoded.
    DecodingError,
    /// A table cell could not be parsed as a number.
    ParseError,
    /// The sample id column is not in the table header.
    IdColumnMissing,
    /// A table, id list or batch is empty.
    EmptyInput,
    /// A protocol step was called out of order or for the wrong round.
    ProtocolSequence,
    /// The parties' data disagree in a way alignment should have ruled out.
    InternalInvariant,
    /// The training parameters or the data are unusable.
    InvalidInput,
}
