//! Federated gradient descent for vertically partitioned data.
//!
//! A regression family implements [`Regression`]: how a party imports and standardizes its
//! table, which partial values it contributes each round, and how it combines them with the
//! peer's encrypted contribution into encrypted gradients and cost. [`linear::Linear`] and
//! [`logistic::Logistic`] are the two families; [`Process`] drives either through the rounds.
//!
//! # Scales
//! Values are fixed-point encoded at accuracy `A` before they enter the homomorphic domain. Every
//! term of a per-sample gradient or cost is a product of two encoded values, so decrypted results
//! carry the factor `10^(2A)`. Single encoded terms are lifted to that scale by multiplying with
//! `10^A`.

pub mod linear;
pub mod logistic;
pub mod model;
pub mod predict;
pub mod process;
pub mod regularization;

use std::{collections::BTreeMap, fmt};

use num::bigint::BigInt;
use thiserror::Error;

pub use self::{
    model::Model,
    process::Process,
    regularization::{RegMode, Regularization},
};
use crate::{
    crypto::{Ciphertext, PaillierError, PublicKey},
    message::{EncSampleMap, Payload},
    numeric::{DataError, DataSet, StandardizedDataSet, TrainRow},
    ErrorKind,
};

/// The fixed-point accuracy used when none is configured.
pub const DEFAULT_ACCURACY: u32 = 10;

/// The largest accuracy whose doubled scale still fits the `f64` mantissa without loss.
pub const MAX_ACCURACY: u32 = 15;

/// Bits reserved for the magnitude of per-sample terms on top of the fixed-point scale.
const HEADROOM_BITS: u64 = 32;

/// Bits taken up by the blinding noise.
const NOISE_BITS: u64 = 64;

#[derive(Debug, Error)]
/// Errors related to the training and prediction protocol.
pub enum LearnerError {
    #[error("homomorphic operation failed: {0}")]
    Paillier(#[from] PaillierError),
    #[error("invalid sample data: {0}")]
    Data(#[from] DataError),
    #[error("protocol step out of sequence: {0}")]
    ProtocolSequence(String),
    #[error("inconsistent {stage}: {detail}")]
    InternalInvariant { stage: &'static str, detail: String },
    #[error("invalid training parameters: {0}")]
    InvalidParams(String),
    #[error(
        "a {bits} bit modulus cannot hold values at accuracy {accuracy}, at least {required} bits are needed"
    )]
    InsufficientModulus {
        bits: u64,
        accuracy: u32,
        required: u64,
    },
    #[error("process state is poisoned by a panic in another thread")]
    Poisoned,
}

impl LearnerError {
    /// Gets the coarse classification of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LearnerError::Paillier(err) => err.kind(),
            LearnerError::Data(err) => err.kind(),
            LearnerError::ProtocolSequence(_) => ErrorKind::ProtocolSequence,
            LearnerError::InternalInvariant { .. } | LearnerError::Poisoned => {
                ErrorKind::InternalInvariant
            }
            LearnerError::InvalidParams(_) | LearnerError::InsufficientModulus { .. } => {
                ErrorKind::InvalidInput
            }
        }
    }

    pub(crate) fn missing(stage: &'static str, id: usize) -> Self {
        LearnerError::InternalInvariant {
            stage,
            detail: format!("sample {} is missing", id),
        }
    }

    pub(crate) fn sequence(detail: impl fmt::Display) -> Self {
        LearnerError::ProtocolSequence(detail.to_string())
    }
}

impl PaillierError {
    /// Gets the coarse classification of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaillierError::PrimesEqual => ErrorKind::PrimesEqual,
            PaillierError::MessageOutOfRange => ErrorKind::MessageOutOfRange,
            PaillierError::InvalidCiphertext | PaillierError::InvalidKey(_) => {
                ErrorKind::DecodingError
            }
            PaillierError::InvalidPrimeLength(_) => ErrorKind::InvalidInput,
        }
    }
}

impl DataError {
    /// Gets the coarse classification of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::Parse { .. } => ErrorKind::ParseError,
            DataError::EmptyInput(_) => ErrorKind::EmptyInput,
            _ => ErrorKind::InvalidInput,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// The parameters of a training task.
pub struct TrainParams {
    /// The name of the label column.
    pub label: String,
    /// For logistic regression, the label value of the positive class.
    #[serde(default)]
    pub label_name: Option<String>,
    #[serde(default)]
    pub reg_mode: RegMode,
    #[serde(default)]
    pub reg_param: f64,
    /// The learning rate.
    pub alpha: f64,
    /// Training converges once the cost changes by less than this between two rounds.
    pub amplitude: f64,
    /// The fixed-point accuracy, in decimal digits.
    #[serde(default = "default_accuracy")]
    pub accuracy: u32,
    /// Whether this party holds the label.
    #[serde(default)]
    pub is_tag_part: bool,
    /// Samples per round; `0` uses the whole train set every round.
    #[serde(default)]
    pub batch_size: usize,
}

fn default_accuracy() -> u32 {
    DEFAULT_ACCURACY
}

impl TrainParams {
    /// Checks that the parameters describe a trainable task.
    ///
    /// # Errors
    /// Fails if a parameter is out of its range.
    pub fn check(&self) -> Result<(), LearnerError> {
        let invalid = |detail: &str| Err(LearnerError::InvalidParams(detail.to_string()));
        if self.label.is_empty() {
            return invalid("label name is empty");
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return invalid("learning rate must be positive");
        }
        if !(self.amplitude.is_finite() && self.amplitude > 0.0) {
            return invalid("convergence amplitude must be positive");
        }
        if !(self.reg_param.is_finite() && self.reg_param >= 0.0) {
            return invalid("regularization parameter must not be negative");
        }
        if self.accuracy > MAX_ACCURACY {
            return invalid("accuracy exceeds the precision of a double");
        }
        Ok(())
    }

    /// The regularization described by the parameters.
    pub fn regularization(&self) -> Regularization {
        Regularization {
            mode: self.reg_mode,
            param: self.reg_param,
        }
    }
}

/// Checks that a Paillier modulus can hold the noisy per-sample terms at the given accuracy
/// without wrapping around the half-range boundary.
///
/// # Errors
/// Fails with [`LearnerError::InsufficientModulus`] if the modulus is too short.
pub fn check_capacity(key: &PublicKey, accuracy: u32) -> Result<(), LearnerError> {
    let scale_bits = (2.0 * f64::from(accuracy) * 10_f64.log2()).ceil() as u64;
    // one bit for the sign and one for the sum of two noisy terms
    let required = scale_bits + HEADROOM_BITS + NOISE_BITS + 2;
    if key.bits() < required {
        return Err(LearnerError::InsufficientModulus {
            bits: key.bits(),
            accuracy,
            required,
        });
    }
    Ok(())
}

/// A regression family.
///
/// Every method is a pure function of its inputs; round state lives in the [`Process`].
pub trait Regression: Send + Sync + 'static {
    /// The plaintext parts a party keeps for itself.
    type RawPart: Send + Sync;
    /// The encrypted parts a party sends to its peer.
    type EncPart: Payload + Clone + fmt::Debug + Send + Sync;

    /// A human readable name for logs.
    const NAME: &'static str;

    /// Imports an aligned sample table.
    fn import(rows: &[Vec<String>], params: &TrainParams) -> Result<DataSet, DataError>;

    /// Standardizes an imported data set.
    fn standardize(dataset: &DataSet, params: &TrainParams)
        -> Result<StandardizedDataSet, DataError>;

    /// Computes the raw and encrypted parts of a batch under the local public key.
    ///
    /// `reg_cost` is the local share of the regularization cost.
    fn local_parts(
        batch: &[TrainRow],
        thetas: &[f64],
        reg_cost: f64,
        params: &TrainParams,
        local_key: &PublicKey,
    ) -> Result<(Self::RawPart, Self::EncPart), LearnerError>;

    /// Computes the noisy encrypted gradient terms of coefficient `feature` under the peer's key.
    fn enc_gradient(
        raw: &Self::RawPart,
        peer: &Self::EncPart,
        batch: &[TrainRow],
        feature: usize,
        noise: u64,
        params: &TrainParams,
        peer_key: &PublicKey,
    ) -> Result<EncSampleMap, LearnerError>;

    /// Computes the noisy encrypted cost terms under the peer's key.
    fn enc_cost(
        raw: &Self::RawPart,
        peer: &Self::EncPart,
        batch: &[TrainRow],
        noise: u64,
        params: &TrainParams,
        peer_key: &PublicKey,
    ) -> Result<EncSampleMap, LearnerError>;

    /// Turns the sum of the real per-sample cost terms of a batch into the cost.
    fn real_cost(sum: f64, batch_len: usize) -> f64;

    /// Turns the summed local parts of both parties into final predictions.
    fn finalize_predictions(model: &Model, sums: Vec<f64>) -> Result<Vec<f64>, LearnerError>;
}

/// Looks up the value of a sample.
pub(crate) fn lookup<'a, V>(
    map: &'a BTreeMap<usize, V>,
    id: usize,
    stage: &'static str,
) -> Result<&'a V, LearnerError> {
    map.get(&id).ok_or_else(|| LearnerError::missing(stage, id))
}

/// Computes the partial prediction `Σ θᵢ·xᵢ` of a row.
pub(crate) fn partial_prediction(row: &TrainRow, thetas: &[f64]) -> f64 {
    row.x.iter().zip(thetas).map(|(x, theta)| x * theta).sum()
}

/// Encrypts a map of fixed-point values under `key`.
pub(crate) fn encrypt_map(
    values: &BTreeMap<usize, BigInt>,
    key: &PublicKey,
) -> Result<EncSampleMap, LearnerError> {
    use rayon::prelude::*;

    values
        .par_iter()
        .map(|(id, value)| -> Result<_, LearnerError> { Ok((*id, key.encrypt_signed(value)?)) })
        .collect()
}

/// Encrypts a single fixed-point value under `key`.
pub(crate) fn encrypt_value(value: &BigInt, key: &PublicKey) -> Result<Ciphertext, LearnerError> {
    Ok(key.encrypt_signed(value)?)
}
