//! The trained model of one party.

use std::collections::BTreeMap;

use super::{LearnerError, TrainParams};
use crate::{
    message::Payload,
    numeric::{de_standardize_both_thetas, DataError, TrainDataSet, INTERCEPT},
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
/// One party's share of a trained model.
///
/// Coefficients apply to standardized inputs; `xbars` and `sigmas` hold the standardization of
/// every column the party trained on, the label included for a linear label holder.
pub struct Model {
    /// Coefficients by feature name; a label holder's map contains the `"Intercept"`.
    pub thetas: BTreeMap<String, f64>,
    pub xbars: BTreeMap<String, f64>,
    pub sigmas: BTreeMap<String, f64>,
    /// The name of the label column.
    pub label: String,
    /// Whether the model belongs to the label holder.
    pub is_tag_part: bool,
}

impl Payload for Model {}

impl Model {
    /// Assembles a model from a train set and its coefficients.
    ///
    /// # Errors
    /// Fails if the number of coefficients does not match the train set's features.
    pub fn new(
        train_set: &TrainDataSet,
        thetas: &[f64],
        params: &TrainParams,
    ) -> Result<Self, LearnerError> {
        if thetas.len() != train_set.feature_names.len() {
            return Err(LearnerError::InternalInvariant {
                stage: "model",
                detail: format!(
                    "{} coefficients for {} features",
                    thetas.len(),
                    train_set.feature_names.len()
                ),
            });
        }
        Ok(Self {
            thetas: train_set
                .feature_names
                .iter()
                .cloned()
                .zip(thetas.iter().copied())
                .collect(),
            xbars: train_set.xbars.clone(),
            sigmas: train_set.sigmas.clone(),
            label: params.label.clone(),
            is_tag_part: params.is_tag_part,
        })
    }

    /// Gets the coefficients of the model's features, without the intercept.
    pub fn feature_thetas(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.thetas.iter().filter(|(name, _)| name.as_str() != INTERCEPT)
    }

    /// Gets the intercept, present only in a label holder's model.
    pub fn intercept(&self) -> Option<f64> {
        self.thetas.get(INTERCEPT).copied()
    }

    /// Collapses both parties' models into coefficients on the original scale of the inputs.
    ///
    /// The result holds the `"Intercept"` and one coefficient per feature of either party. A label
    /// without standardization, as in logistic regression, is taken as is.
    ///
    /// # Errors
    /// Fails if `host` is not a label holder's model, a feature lacks its standardization or both
    /// parties share a feature name.
    pub fn de_standardize(guest: &Model, host: &Model) -> Result<BTreeMap<String, f64>, LearnerError> {
        let intercept = host.intercept().ok_or_else(|| LearnerError::InternalInvariant {
            stage: "model",
            detail: "the label holder's model has no intercept".to_string(),
        })?;
        let (guest_names, guest_part) = standardized_columns(guest)?;
        let (host_names, host_part) = standardized_columns(host)?;
        if let Some(name) = guest_names.iter().find(|name| host_names.contains(*name)) {
            return Err(LearnerError::InternalInvariant {
                stage: "model",
                detail: format!("both parties hold the feature {:?}", name),
            });
        }

        let ybar = host.xbars.get(&host.label).copied().unwrap_or(0.0);
        let sigma_y = host.sigmas.get(&host.label).copied().unwrap_or(1.0);
        let plain = de_standardize_both_thetas(
            intercept,
            (&guest_part.0[..], &guest_part.1[..], &guest_part.2[..]),
            (&host_part.0[..], &host_part.1[..], &host_part.2[..]),
            ybar,
            sigma_y,
        )?;

        let names = std::iter::once(INTERCEPT.to_string())
            .chain(guest_names)
            .chain(host_names);
        Ok(names.zip(plain).collect())
    }
}

type Columns = (Vec<f64>, Vec<f64>, Vec<f64>);

fn standardized_columns(model: &Model) -> Result<(Vec<String>, Columns), LearnerError> {
    let mut names = Vec::new();
    let mut columns: Columns = Default::default();
    for (name, theta) in model.feature_thetas() {
        let missing = || DataError::FeatureMissing(name.clone());
        names.push(name.clone());
        columns.0.push(*theta);
        columns.1.push(*model.xbars.get(name).ok_or_else(missing)?);
        columns.2.push(*model.sigmas.get(name).ok_or_else(missing)?);
    }
    Ok((names, columns))
}
