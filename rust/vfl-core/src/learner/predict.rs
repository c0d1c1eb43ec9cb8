//! Joint prediction with a trained model.
//!
//! Each party standardizes its aligned prediction table with the statistics of its train set and
//! computes its partial prediction. The label holder adds the peer's partial predictions to its
//! own and maps the sums onto the label scale with [`Regression::finalize_predictions`].

use super::{LearnerError, Model, Regression};
use crate::numeric::{DataError, INTERCEPT};

/// Computes the partial predictions of an aligned prediction table.
///
/// The first row is the header; every further row is one sample. Columns without a coefficient in
/// the model, like an id or a label column kept for evaluation, are ignored. A label holder's
/// partial predictions include the intercept.
///
/// # Errors
/// Fails if a column of the model is missing from the table, lacks its standardization, or a cell
/// of it is not a number.
pub fn predict_local_part(model: &Model, rows: &[Vec<String>]) -> Result<Vec<f64>, LearnerError> {
    let header = rows.first().ok_or(DataError::EmptyInput("prediction table"))?;
    let columns = model
        .feature_thetas()
        .map(|(name, theta)| {
            let index = header
                .iter()
                .position(|column| column == name)
                .ok_or_else(|| DataError::FeatureMissing(name.clone()))?;
            let xbar = model.xbars.get(name);
            let sigma = model.sigmas.get(name);
            match (xbar, sigma) {
                (Some(xbar), Some(sigma)) => Ok((name, index, *theta, *xbar, *sigma)),
                _ => Err(DataError::FeatureMissing(name.clone())),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    let intercept = if model.is_tag_part {
        model
            .intercept()
            .ok_or_else(|| DataError::FeatureMissing(INTERCEPT.to_string()))?
    } else {
        0.0
    };

    rows.iter()
        .enumerate()
        .skip(1)
        .map(|(row_index, row)| -> Result<f64, LearnerError> {
            if row.len() != header.len() {
                return Err(DataError::RaggedRow(row_index).into());
            }
            columns
                .iter()
                .try_fold(intercept, |sum, (name, index, theta, xbar, sigma)| -> Result<f64, LearnerError> {
                    let cell = &row[*index];
                    let value: f64 = cell.trim().parse().map_err(|_| DataError::Parse {
                        row: row_index,
                        column: (*name).clone(),
                        value: cell.clone(),
                    })?;
                    Ok(sum + theta * (value - xbar) / sigma)
                })
        })
        .collect()
}

/// Combines the label holder's partial predictions with the peer's into final predictions.
///
/// # Errors
/// Fails if the parts differ in length or the model cannot map sums onto the label scale.
pub fn predict<R: Regression>(
    model: &Model,
    local: &[f64],
    peer: &[f64],
) -> Result<Vec<f64>, LearnerError> {
    if local.len() != peer.len() {
        return Err(LearnerError::InternalInvariant {
            stage: "prediction parts",
            detail: format!("{} local against {} peer predictions", local.len(), peer.len()),
        });
    }
    let sums = local.iter().zip(peer).map(|(a, b)| a + b).collect();
    R::finalize_predictions(model, sums)
}

/// Lays out predictions as a table `[[id_name, "value"], [id, value], ..]`.
///
/// # Errors
/// Fails if there are not as many ids as predictions.
pub fn prediction_table(
    id_name: &str,
    ids: &[String],
    predictions: &[f64],
) -> Result<Vec<Vec<String>>, LearnerError> {
    if ids.len() != predictions.len() {
        return Err(LearnerError::InternalInvariant {
            stage: "prediction table",
            detail: format!("{} ids for {} predictions", ids.len(), predictions.len()),
        });
    }
    let header = vec![id_name.to_string(), "value".to_string()];
    Ok(std::iter::once(header)
        .chain(
            ids.iter()
                .zip(predictions)
                .map(|(id, value)| vec![id.clone(), value.to_string()]),
        )
        .collect())
}
