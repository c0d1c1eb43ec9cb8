//! Linear regression with squared loss.
//!
//! The prediction for sample `j` is `predA(j) + predB(j)`, with the guest's part `predA` and the
//! label holder's part `predB` including the intercept. Each party contributes one value `u` per
//! sample, `u = predA` for the guest and `u = predB - y` for the label holder, so that the residual
//! is `uA + uB` and
//!
//! - the gradient of coefficient `i` is `Σⱼ (uA + uB)·xᵢⱼ / m`,
//! - the cost is `Σⱼ (uA + uB)² / (2m)`, expanded as `uA² + uB² + 2·uA·uB`.
//!
//! Both roles combine their parts the same way; only the raw values differ.

use std::collections::BTreeMap;

use num::bigint::BigInt;
use rayon::prelude::*;

use super::{
    encrypt_map,
    encrypt_value,
    lookup,
    partial_prediction,
    LearnerError,
    Model,
    Regression,
    TrainParams,
};
use crate::{
    crypto::{Ciphertext, PublicKey},
    message::{EncSampleMap, Payload},
    numeric::{
        de_standardize_output,
        import_features,
        scale,
        standardize,
        to_fixed,
        DataError,
        DataSet,
        StandardizedDataSet,
        TrainRow,
    },
};

/// The linear regression family.
pub struct Linear;

/// The plaintext values a party keeps for itself.
pub struct RawPart {
    /// `u` per sample at accuracy `A`.
    pub grad_part: BTreeMap<usize, BigInt>,
    /// `u²` per sample at accuracy `2A`.
    pub grad_part_square: BTreeMap<usize, BigInt>,
    /// The local regularization cost at accuracy `A`.
    pub reg_cost: BigInt,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// The encrypted values a party sends to its peer, under its own key.
pub struct EncPart {
    pub enc_grad_part: EncSampleMap,
    pub enc_grad_part_square: EncSampleMap,
    pub enc_reg_cost: Ciphertext,
}

impl Payload for EncPart {}

impl Regression for Linear {
    type RawPart = RawPart;
    type EncPart = EncPart;

    const NAME: &'static str = "linear regression";

    fn import(rows: &[Vec<String>], _params: &TrainParams) -> Result<DataSet, DataError> {
        import_features(rows)
    }

    fn standardize(
        dataset: &DataSet,
        _params: &TrainParams,
    ) -> Result<StandardizedDataSet, DataError> {
        standardize(dataset, None)
    }

    fn local_parts(
        batch: &[TrainRow],
        thetas: &[f64],
        reg_cost: f64,
        params: &TrainParams,
        local_key: &PublicKey,
    ) -> Result<(RawPart, EncPart), LearnerError> {
        let grad_part = batch
            .par_iter()
            .map(|row| -> Result<_, LearnerError> {
                let prediction = partial_prediction(row, thetas);
                let value = if params.is_tag_part {
                    let y = row.y.ok_or_else(|| LearnerError::missing("labels", row.id))?;
                    prediction - y
                } else {
                    prediction
                };
                Ok((row.id, to_fixed(value, params.accuracy)?))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        let grad_part_square = grad_part
            .iter()
            .map(|(id, value)| (*id, value * value))
            .collect();
        let reg_cost = to_fixed(reg_cost, params.accuracy)?;

        let enc_part = EncPart {
            enc_grad_part: encrypt_map(&grad_part, local_key)?,
            enc_grad_part_square: encrypt_map(&grad_part_square, local_key)?,
            enc_reg_cost: encrypt_value(&reg_cost, local_key)?,
        };
        let raw_part = RawPart {
            grad_part,
            grad_part_square,
            reg_cost,
        };
        Ok((raw_part, enc_part))
    }

    fn enc_gradient(
        raw: &RawPart,
        peer: &EncPart,
        batch: &[TrainRow],
        feature: usize,
        noise: u64,
        params: &TrainParams,
        peer_key: &PublicKey,
    ) -> Result<EncSampleMap, LearnerError> {
        let noise = BigInt::from(noise);
        batch
            .par_iter()
            .map(|row| -> Result<_, LearnerError> {
                let x = feature_value(row, feature)?;
                let x = to_fixed(x, params.accuracy)?;
                let own = lookup(&raw.grad_part, row.id, "local gradient parts")?;
                let other = lookup(&peer.enc_grad_part, row.id, "peer gradient parts")?;
                // (uA + uB)·x + noise
                let term = peer_key.mul_plain(other, &x);
                let term = peer_key.add_plain(&term, &(own * &x + &noise));
                Ok((row.id, term))
            })
            .collect()
    }

    fn enc_cost(
        raw: &RawPart,
        peer: &EncPart,
        batch: &[TrainRow],
        noise: u64,
        params: &TrainParams,
        peer_key: &PublicKey,
    ) -> Result<EncSampleMap, LearnerError> {
        let noise = BigInt::from(noise);
        let unit = scale(params.accuracy);
        // each sample carries 2·(regA + regB) so that the sum over 2m samples yields regA + regB
        let peer_reg = peer_key.mul_plain(&peer.enc_reg_cost, &(&unit * 2));
        let own_reg = &raw.reg_cost * &unit * 2;
        batch
            .par_iter()
            .map(|row| -> Result<_, LearnerError> {
                let own = lookup(&raw.grad_part, row.id, "local gradient parts")?;
                let own_square = lookup(&raw.grad_part_square, row.id, "local squared parts")?;
                let other = lookup(&peer.enc_grad_part, row.id, "peer gradient parts")?;
                let other_square =
                    lookup(&peer.enc_grad_part_square, row.id, "peer squared parts")?;
                // uA² + uB² + 2·uA·uB + 2·reg + noise
                let cross = peer_key.mul_plain(other, &(own * 2));
                let term = peer_key.sum(vec![&cross, other_square, &peer_reg]);
                let term = peer_key.add_plain(&term, &(own_square + &own_reg + &noise));
                Ok((row.id, term))
            })
            .collect()
    }

    fn real_cost(sum: f64, batch_len: usize) -> f64 {
        sum / (2.0 * batch_len as f64)
    }

    fn finalize_predictions(model: &Model, sums: Vec<f64>) -> Result<Vec<f64>, LearnerError> {
        let ybar = model.xbars.get(&model.label);
        let sigma = model.sigmas.get(&model.label);
        match (ybar, sigma) {
            (Some(ybar), Some(sigma)) => Ok(sums
                .into_iter()
                .map(|sum| de_standardize_output(*ybar, *sigma, sum))
                .collect()),
            _ => Err(DataError::FeatureMissing(model.label.clone()).into()),
        }
    }
}

pub(crate) fn feature_value(row: &TrainRow, feature: usize) -> Result<f64, LearnerError> {
    row.x
        .get(feature)
        .copied()
        .ok_or_else(|| LearnerError::InternalInvariant {
            stage: "train rows",
            detail: format!("sample {} has no feature {}", row.id, feature),
        })
}
