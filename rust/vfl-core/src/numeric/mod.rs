//! Numeric pipeline of the protocol.
//!
//! Sample tables are imported into column-wise [`DataSet`]s, standardized, and reshaped into
//! row-wise [`TrainDataSet`]s. Reals are mapped onto the Paillier plaintext space by the fixed-point
//! codec in [`fixed`].

pub mod batch;
pub mod dataset;
pub mod fixed;
pub mod metrics;

use thiserror::Error;

pub use self::{
    batch::batch_select,
    dataset::{
        de_standardize_both_thetas,
        de_standardize_output,
        de_standardize_thetas,
        import_features,
        import_features_recoding_label,
        standardize,
        DataFeature,
        DataSet,
        StandardizedDataSet,
        TrainDataSet,
        TrainRow,
        INTERCEPT,
    },
    fixed::{from_fixed, scale, to_fixed},
};

#[derive(Debug, Error, PartialEq)]
/// Errors related to importing, standardizing and encoding sample data.
pub enum DataError {
    #[error("cell {value:?} in row {row} of column {column:?} is not a number")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },
    #[error("table does not contain the label column {0:?}")]
    LabelMissing(String),
    #[error("table of a party without label contains the label column {0:?}")]
    UnexpectedLabel(String),
    #[error("{0} is empty")]
    EmptyInput(&'static str),
    #[error("row {0} has a different number of cells than the header")]
    RaggedRow(usize),
    #[error("feature {0:?} has zero variance and cannot be standardized")]
    ZeroVariance(String),
    #[error("value {0} is not finite and has no fixed-point representation")]
    NonFinite(f64),
    #[error("feature {0:?} is missing")]
    FeatureMissing(String),
    #[error("{coefficients} feature coefficients but {means} means and {deviations} deviations")]
    LengthMismatch {
        coefficients: usize,
        means: usize,
        deviations: usize,
    },
}
