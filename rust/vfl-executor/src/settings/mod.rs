//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. An example
//! configuration file can be found in the `configs/` directory located in the repository root.

use std::{fmt, path::Path, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use vfl_core::{
    crypto::paillier::DEFAULT_PRIME_LENGTH,
    learner::{RegMode, DEFAULT_ACCURACY},
    TrainParams,
};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    pub log: LoggingSettings,
    #[serde(default)]
    #[validate]
    pub paillier: PaillierSettings,
    #[validate]
    pub train: TrainSettings,
    pub data: DataSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("vfl").separator("__"))?;
        config.try_into()
    }
}

#[derive(Debug, Validate, Deserialize, Clone, Copy)]
/// Paillier key settings.
pub struct PaillierSettings {
    /// The bit length of each of the two primes of a party's key.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [paillier]
    /// prime_length = 512
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// VFL_PAILLIER__PRIME_LENGTH=512
    /// ```
    // the validate attribute only accepts literals, the lower bound is the key generation minimum
    #[validate(range(min = 16, max = 4096))]
    pub prime_length: u64,
}

impl Default for PaillierSettings {
    fn default() -> Self {
        Self {
            prime_length: DEFAULT_PRIME_LENGTH,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
/// The regression family to train.
pub enum Family {
    Linear,
    Logistic,
}

#[derive(Debug, Validate, Deserialize, Clone)]
#[validate(schema(function = "validate_train"))]
/// Training task settings, shared by both parties.
///
/// # Examples
///
/// **TOML**
/// ```text
/// [train]
/// family = "linear"
/// label = "MEDV"
/// reg_mode = "ridge"
/// reg_param = 0.1
/// alpha = 0.1
/// amplitude = 0.0001
/// ```
///
/// **Environment variable**
/// ```text
/// VFL_TRAIN__ALPHA=0.05
/// ```
pub struct TrainSettings {
    pub family: Family,
    /// The name of the label column in the host's table.
    pub label: String,
    /// For logistic regression, the label value of the positive class. Without it, labels must
    /// already be `0` or `1`.
    #[serde(default)]
    pub label_name: Option<String>,
    #[serde(default)]
    pub reg_mode: RegMode,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub reg_param: f64,
    /// The learning rate.
    pub alpha: f64,
    /// Training stops once the cost changes by less than this between two rounds.
    pub amplitude: f64,
    /// The fixed-point accuracy, in decimal digits.
    #[serde(default = "default_accuracy")]
    #[validate(range(max = 15))]
    pub accuracy: u32,
    /// Samples per round; `0` uses the whole train set.
    #[serde(default)]
    pub batch_size: usize,
    /// The number of rounds after which training stops without convergence.
    #[validate(range(min = 1))]
    pub max_rounds: u64,
}

fn default_accuracy() -> u32 {
    DEFAULT_ACCURACY
}

impl TrainSettings {
    /// Gets the parameters of one party's process.
    pub fn params(&self, is_tag_part: bool) -> TrainParams {
        TrainParams {
            label: self.label.clone(),
            label_name: self.label_name.clone(),
            reg_mode: self.reg_mode,
            reg_param: self.reg_param,
            alpha: self.alpha,
            amplitude: self.amplitude,
            accuracy: self.accuracy,
            is_tag_part,
            batch_size: self.batch_size,
        }
    }
}

fn validate_train(s: &TrainSettings) -> Result<(), ValidationError> {
    if s.label.is_empty() {
        return Err(ValidationError::new("empty label name"));
    }
    if !(s.alpha.is_finite() && s.alpha > 0.) {
        return Err(ValidationError::new("learning rate must be positive"));
    }
    if !(s.amplitude.is_finite() && s.amplitude > 0.) {
        return Err(ValidationError::new("convergence amplitude must be positive"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Clone)]
/// Input and output locations.
///
/// Sample tables are comma-separated files with a header row. The id column must be present in
/// every table; the label column only in the host's tables.
///
/// # Examples
///
/// **TOML**
/// ```text
/// [data]
/// id_name = "id"
/// guest_train = "data/guest_train.csv"
/// host_train = "data/host_train.csv"
/// output_dir = "out"
/// ```
///
/// **Environment variable**
/// ```text
/// VFL_DATA__OUTPUT_DIR=/tmp/vfl
/// ```
pub struct DataSettings {
    /// The name of the sample id column.
    pub id_name: String,
    pub guest_train: PathBuf,
    pub host_train: PathBuf,
    /// Tables to score with the trained model. Prediction is skipped unless both are given.
    #[serde(default)]
    pub guest_predict: Option<PathBuf>,
    #[serde(default)]
    pub host_predict: Option<PathBuf>,
    /// The directory the models and predictions are written to.
    pub output_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// VFL_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
