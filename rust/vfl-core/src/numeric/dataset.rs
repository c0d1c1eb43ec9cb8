//! Data sets, standardization and the train set layout.

use std::collections::BTreeMap;

use super::DataError;

/// The name of the intercept coefficient of a label holder.
pub const INTERCEPT: &str = "Intercept";

/// A single feature column, indexed by sample position.
#[derive(Clone, Debug, PartialEq)]
pub struct DataFeature {
    pub name: String,
    pub values: Vec<f64>,
}

impl DataFeature {
    /// Population mean and standard deviation of the column.
    pub fn mean_and_sigma(&self) -> (f64, f64) {
        let count = self.values.len() as f64;
        let mean = self.values.iter().sum::<f64>() / count;
        let variance = self
            .values
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / count;
        (mean, variance.sqrt())
    }
}

/// A column-wise sample table.
#[derive(Clone, Debug, PartialEq)]
pub struct DataSet {
    pub features: Vec<DataFeature>,
}

impl DataSet {
    /// Gets the number of samples.
    pub fn len(&self) -> usize {
        self.features.first().map_or(0, |feature| feature.values.len())
    }

    /// Checks whether the data set has no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets a feature by name.
    pub fn feature(&self, name: &str) -> Option<&DataFeature> {
        self.features.iter().find(|feature| feature.name == name)
    }
}

fn import_with<F>(rows: &[Vec<String>], mut parse: F) -> Result<DataSet, DataError>
where
    F: FnMut(&str, &str) -> Option<f64>,
{
    let header = rows.first().ok_or(DataError::EmptyInput("sample table"))?;
    if header.is_empty() {
        return Err(DataError::EmptyInput("table header"));
    }
    if rows.len() < 2 {
        return Err(DataError::EmptyInput("sample table"));
    }

    let mut features: Vec<DataFeature> = header
        .iter()
        .map(|name| DataFeature {
            name: name.clone(),
            values: Vec::with_capacity(rows.len() - 1),
        })
        .collect();
    for (index, row) in rows.iter().enumerate().skip(1) {
        if row.len() != header.len() {
            return Err(DataError::RaggedRow(index));
        }
        for (feature, cell) in features.iter_mut().zip(row) {
            let value = parse(&feature.name, cell).ok_or_else(|| DataError::Parse {
                row: index,
                column: feature.name.clone(),
                value: cell.clone(),
            })?;
            feature.values.push(value);
        }
    }
    Ok(DataSet { features })
}

/// Imports an aligned sample table whose cells are all numeric.
///
/// # Errors
/// Fails if the table has no samples, a row is ragged or a cell is not a number.
pub fn import_features(rows: &[Vec<String>]) -> Result<DataSet, DataError> {
    import_with(rows, |_, cell| cell.trim().parse().ok())
}

/// Imports an aligned sample table whose `label` column holds class names.
///
/// Label cells equal to `positive_class` become `1.0`, every other label becomes `0.0`.
///
/// # Errors
/// Fails if the table has no samples, a row is ragged or a feature cell is not a number.
pub fn import_features_recoding_label(
    rows: &[Vec<String>],
    label: &str,
    positive_class: &str,
) -> Result<DataSet, DataError> {
    import_with(rows, |column, cell| {
        if column == label {
            Some(if cell.trim() == positive_class { 1.0 } else { 0.0 })
        } else {
            cell.trim().parse().ok()
        }
    })
}

/// A standardized data set together with the parameters needed to invert the standardization.
#[derive(Clone, Debug, PartialEq)]
pub struct StandardizedDataSet {
    pub features: Vec<DataFeature>,
    pub xbars: BTreeMap<String, f64>,
    pub sigmas: BTreeMap<String, f64>,
    pub original: Vec<DataFeature>,
}

/// Z-score standardizes every feature with its population mean and standard deviation, except
/// the feature named `skip` which passes through unchanged.
///
/// # Errors
/// Fails if a standardized feature has zero variance.
pub fn standardize(dataset: &DataSet, skip: Option<&str>) -> Result<StandardizedDataSet, DataError> {
    let mut xbars = BTreeMap::new();
    let mut sigmas = BTreeMap::new();
    let features = dataset
        .features
        .iter()
        .map(|feature| {
            if Some(feature.name.as_str()) == skip {
                return Ok(feature.clone());
            }
            let (mean, sigma) = feature.mean_and_sigma();
            if sigma == 0.0 || !sigma.is_finite() {
                return Err(DataError::ZeroVariance(feature.name.clone()));
            }
            xbars.insert(feature.name.clone(), mean);
            sigmas.insert(feature.name.clone(), sigma);
            Ok(DataFeature {
                name: feature.name.clone(),
                values: feature
                    .values
                    .iter()
                    .map(|value| (value - mean) / sigma)
                    .collect(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(StandardizedDataSet {
        features,
        xbars,
        sigmas,
        original: dataset.features.clone(),
    })
}

/// Maps a standardized prediction back onto the label scale.
pub fn de_standardize_output(ybar: f64, sigma: f64, output: f64) -> f64 {
    output * sigma + ybar
}

/// Maps coefficients learned on standardized data back onto the original scale.
///
/// `thetas[0]` is the intercept, `thetas[i]` belongs to the feature with mean `xbars[i - 1]` and
/// standard deviation `sigmas[i - 1]`; `ybar` and `sigma_y` describe the label.
///
/// # Errors
/// Fails with [`DataError::LengthMismatch`] unless there is exactly one mean and one deviation
/// per feature coefficient.
pub fn de_standardize_thetas(
    thetas: &[f64],
    xbars: &[f64],
    sigmas: &[f64],
    ybar: f64,
    sigma_y: f64,
) -> Result<Vec<f64>, DataError> {
    let coefficients = thetas.len().saturating_sub(1);
    if xbars.len() != coefficients || sigmas.len() != coefficients {
        return Err(DataError::LengthMismatch {
            coefficients,
            means: xbars.len(),
            deviations: sigmas.len(),
        });
    }
    let mut plain = thetas.to_vec();
    for i in 1..plain.len() {
        plain[0] -= plain[i] * xbars[i - 1] / sigmas[i - 1];
        plain[i] = plain[i] * sigma_y / sigmas[i - 1];
    }
    if let Some(intercept) = plain.first_mut() {
        *intercept = *intercept * sigma_y + ybar;
    }
    Ok(plain)
}

/// Collapses the coefficients of both parties into one de-standardized vector
/// `[intercept, guest features..., host features...]`.
///
/// `guest` holds coefficients with the matching feature means and deviations, `host` the same
/// for the label holder's features, with the intercept passed separately. `ybar` and `sigma_y`
/// describe the label.
///
/// # Errors
/// Fails with [`DataError::LengthMismatch`] if a party's means or deviations do not match its
/// coefficients.
pub fn de_standardize_both_thetas(
    intercept: f64,
    guest: (&[f64], &[f64], &[f64]),
    host: (&[f64], &[f64], &[f64]),
    ybar: f64,
    sigma_y: f64,
) -> Result<Vec<f64>, DataError> {
    for (thetas, xbars, sigmas) in [guest, host].iter() {
        if xbars.len() != thetas.len() || sigmas.len() != thetas.len() {
            return Err(DataError::LengthMismatch {
                coefficients: thetas.len(),
                means: xbars.len(),
                deviations: sigmas.len(),
            });
        }
    }
    let mut thetas = Vec::with_capacity(1 + guest.0.len() + host.0.len());
    thetas.push(intercept);
    thetas.extend_from_slice(guest.0);
    thetas.extend_from_slice(host.0);
    let xbars = [guest.1, host.1].concat();
    let sigmas = [guest.2, host.2].concat();
    de_standardize_thetas(&thetas, &xbars, &sigmas, ybar, sigma_y)
}

/// One sample of a train set.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainRow {
    /// The dense sample id, i.e. the position of the sample after alignment.
    pub id: usize,
    /// The feature values; for a label holder the first value is the constant `1.0` of the
    /// intercept.
    pub x: Vec<f64>,
    /// The label, present only for a label holder.
    pub y: Option<f64>,
}

/// The row-wise train set of one party.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainDataSet {
    /// Names of the coefficients, aligned with [`TrainRow::x`]; a label holder's list starts with
    /// [`INTERCEPT`].
    pub feature_names: Vec<String>,
    pub rows: Vec<TrainRow>,
    pub xbars: BTreeMap<String, f64>,
    pub sigmas: BTreeMap<String, f64>,
    pub label: Option<String>,
}

impl TrainDataSet {
    /// Reshapes a standardized data set into train rows.
    ///
    /// A label holder gets the intercept column and the label split off as `y`; a party without
    /// label must not have a column named `label`.
    ///
    /// # Errors
    /// Fails if the label column is missing for a label holder or present otherwise, or there
    /// are no samples.
    pub fn new(
        dataset: StandardizedDataSet,
        label: &str,
        is_label_holder: bool,
    ) -> Result<Self, DataError> {
        let has_label = dataset.features.iter().any(|feature| feature.name == label);
        if is_label_holder && !has_label {
            return Err(DataError::LabelMissing(label.to_string()));
        }
        if !is_label_holder && has_label {
            return Err(DataError::UnexpectedLabel(label.to_string()));
        }

        let (labels, features): (Vec<DataFeature>, Vec<DataFeature>) = dataset
            .features
            .into_iter()
            .partition(|feature| feature.name == label);
        let count = labels
            .first()
            .or_else(|| features.first())
            .map_or(0, |feature| feature.values.len());
        if count == 0 {
            return Err(DataError::EmptyInput("train set"));
        }

        let mut feature_names = Vec::with_capacity(features.len() + 1);
        if is_label_holder {
            feature_names.push(INTERCEPT.to_string());
        }
        feature_names.extend(features.iter().map(|feature| feature.name.clone()));

        let rows = (0..count)
            .map(|id| {
                let mut x = Vec::with_capacity(feature_names.len());
                if is_label_holder {
                    x.push(1.0);
                }
                x.extend(features.iter().map(|feature| feature.values[id]));
                TrainRow {
                    id,
                    x,
                    y: labels.first().map(|feature| feature.values[id]),
                }
            })
            .collect();

        Ok(Self {
            feature_names,
            rows,
            xbars: dataset.xbars,
            sigmas: dataset.sigmas,
            label: if is_label_holder {
                Some(label.to_string())
            } else {
                None
            },
        })
    }
}
