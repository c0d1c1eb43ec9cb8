//! Logistic regression with a Taylor approximated log loss.
//!
//! With `z = predA + predB` and a label `y ∈ {0, 1}`, the log likelihood of a sample is expanded
//! around zero as `ln σ(z) ≈ ln ½ + (y - ½)·z - z²/8`. The cost is the negated mean, and the
//! gradient of coefficient `i` becomes `Σⱼ (½ + z/4 - y)·xᵢⱼ / m`.
//!
//! The label holder splits its contribution into five parts, the guest into two, so that either
//! party can assemble every term from its own plaintexts and the peer's ciphertexts:
//!
//! | part | guest | label holder |
//! |---|---|---|
//! | 1 | `predA` | `y - ½` |
//! | 2 | `predA²/8` | `(y - ½)·predB` |
//! | 3 | | `predB²/8` |
//! | 4 | | `predB/4` |
//! | 5 | | `½ + predB/4 - y` |

use std::collections::BTreeMap;

use num::bigint::BigInt;
use rayon::prelude::*;

use super::{
    encrypt_map,
    encrypt_value,
    linear::feature_value,
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
        import_features,
        import_features_recoding_label,
        scale,
        standardize,
        to_fixed,
        DataError,
        DataSet,
        StandardizedDataSet,
        TrainRow,
    },
};

/// The logistic regression family.
pub struct Logistic;

type FixedMap = BTreeMap<usize, BigInt>;

/// The plaintext values a party keeps for itself, at accuracy `A`.
pub enum RawPart {
    LabelHolder {
        part_1: FixedMap,
        part_2: FixedMap,
        part_3: FixedMap,
        part_4: FixedMap,
        part_5: FixedMap,
        reg_cost: BigInt,
    },
    Guest {
        part_1: FixedMap,
        part_2: FixedMap,
        reg_cost: BigInt,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// The encrypted parts of a label holder.
pub struct HolderEncPart {
    pub enc_part_1: EncSampleMap,
    pub enc_part_2: EncSampleMap,
    pub enc_part_3: EncSampleMap,
    pub enc_part_4: EncSampleMap,
    pub enc_part_5: EncSampleMap,
    pub enc_reg_cost: Ciphertext,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// The encrypted parts of a guest.
pub struct GuestEncPart {
    pub enc_part_1: EncSampleMap,
    pub enc_part_2: EncSampleMap,
    pub enc_reg_cost: Ciphertext,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
/// The encrypted values a party sends to its peer, under its own key.
///
/// The wire form carries no role tag; the variants are told apart by their fields.
pub enum EncPart {
    LabelHolder(HolderEncPart),
    Guest(GuestEncPart),
}

impl Payload for EncPart {}

fn role_mismatch(detail: &str) -> LearnerError {
    LearnerError::InternalInvariant {
        stage: "logistic parts",
        detail: detail.to_string(),
    }
}

/// The logistic function.
pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Regression for Logistic {
    type RawPart = RawPart;
    type EncPart = EncPart;

    const NAME: &'static str = "logistic regression";

    fn import(rows: &[Vec<String>], params: &TrainParams) -> Result<DataSet, DataError> {
        match (&params.label_name, params.is_tag_part) {
            (Some(positive), true) => import_features_recoding_label(rows, &params.label, positive),
            _ => import_features(rows),
        }
    }

    fn standardize(
        dataset: &DataSet,
        params: &TrainParams,
    ) -> Result<StandardizedDataSet, DataError> {
        standardize(dataset, Some(&params.label))
    }

    fn local_parts(
        batch: &[TrainRow],
        thetas: &[f64],
        reg_cost: f64,
        params: &TrainParams,
        local_key: &PublicKey,
    ) -> Result<(RawPart, EncPart), LearnerError> {
        let accuracy = params.accuracy;
        let reg_cost = to_fixed(reg_cost, accuracy)?;
        let enc_reg_cost = encrypt_value(&reg_cost, local_key)?;

        if params.is_tag_part {
            let parts = batch
                .par_iter()
                .map(|row| -> Result<_, LearnerError> {
                    let y = row.y.ok_or_else(|| LearnerError::missing("labels", row.id))?;
                    let pred = partial_prediction(row, thetas);
                    Ok((
                        row.id,
                        [
                            to_fixed(y - 0.5, accuracy)?,
                            to_fixed((y - 0.5) * pred, accuracy)?,
                            to_fixed(pred * pred / 8.0, accuracy)?,
                            to_fixed(pred / 4.0, accuracy)?,
                            to_fixed(0.5 + pred / 4.0 - y, accuracy)?,
                        ],
                    ))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let mut maps: [FixedMap; 5] = Default::default();
            for (id, values) in parts {
                for (map, value) in maps.iter_mut().zip(values.iter()) {
                    map.insert(id, value.clone());
                }
            }
            let [part_1, part_2, part_3, part_4, part_5] = maps;
            let enc_part = HolderEncPart {
                enc_part_1: encrypt_map(&part_1, local_key)?,
                enc_part_2: encrypt_map(&part_2, local_key)?,
                enc_part_3: encrypt_map(&part_3, local_key)?,
                enc_part_4: encrypt_map(&part_4, local_key)?,
                enc_part_5: encrypt_map(&part_5, local_key)?,
                enc_reg_cost,
            };
            let raw_part = RawPart::LabelHolder {
                part_1,
                part_2,
                part_3,
                part_4,
                part_5,
                reg_cost,
            };
            Ok((raw_part, EncPart::LabelHolder(enc_part)))
        } else {
            let (part_1, part_2): (FixedMap, FixedMap) = batch
                .par_iter()
                .map(|row| -> Result<_, LearnerError> {
                    let pred = partial_prediction(row, thetas);
                    Ok((
                        (row.id, to_fixed(pred, accuracy)?),
                        (row.id, to_fixed(pred * pred / 8.0, accuracy)?),
                    ))
                })
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .unzip();
            let enc_part = GuestEncPart {
                enc_part_1: encrypt_map(&part_1, local_key)?,
                enc_part_2: encrypt_map(&part_2, local_key)?,
                enc_reg_cost,
            };
            let raw_part = RawPart::Guest {
                part_1,
                part_2,
                reg_cost,
            };
            Ok((raw_part, EncPart::Guest(enc_part)))
        }
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
        let accuracy = params.accuracy;
        match (raw, peer) {
            (RawPart::Guest { part_1, .. }, EncPart::LabelHolder(peer)) => batch
                .par_iter()
                .map(|row| -> Result<_, LearnerError> {
                    let x = feature_value(row, feature)?;
                    let own = lookup(part_1, row.id, "local parts")?;
                    let other = lookup(&peer.enc_part_5, row.id, "peer parts")?;
                    // (½ + predB/4 - y)·x + predA/4·x + noise
                    let term = peer_key.mul_plain(other, &to_fixed(x, accuracy)?);
                    let plain = own * to_fixed(x / 4.0, accuracy)? + &noise;
                    Ok((row.id, peer_key.add_plain(&term, &plain)))
                })
                .collect(),
            (RawPart::LabelHolder { part_5, .. }, EncPart::Guest(peer)) => batch
                .par_iter()
                .map(|row| -> Result<_, LearnerError> {
                    let x = feature_value(row, feature)?;
                    let own = lookup(part_5, row.id, "local parts")?;
                    let other = lookup(&peer.enc_part_1, row.id, "peer parts")?;
                    // predA·x/4 + (½ + predB/4 - y)·x + noise
                    let term = peer_key.mul_plain(other, &to_fixed(x / 4.0, accuracy)?);
                    let plain = own * to_fixed(x, accuracy)? + &noise;
                    Ok((row.id, peer_key.add_plain(&term, &plain)))
                })
                .collect(),
            _ => Err(role_mismatch("both parties claim the same role")),
        }
    }

    fn enc_cost(
        raw: &RawPart,
        peer: &EncPart,
        batch: &[TrainRow],
        noise: u64,
        params: &TrainParams,
        peer_key: &PublicKey,
    ) -> Result<EncSampleMap, LearnerError> {
        let unit = scale(params.accuracy);
        let neg_unit = -&unit;
        let ln_half = to_fixed(0.5_f64.ln(), 2 * params.accuracy)?;
        let noise = BigInt::from(noise);
        match (raw, peer) {
            (
                RawPart::Guest {
                    part_1,
                    part_2,
                    reg_cost,
                },
                EncPart::LabelHolder(peer),
            ) => {
                let peer_reg = peer_key.mul_plain(&peer.enc_reg_cost, &neg_unit);
                let constant = &ln_half - reg_cost * &unit + &noise;
                batch
                    .par_iter()
                    .map(|row| -> Result<_, LearnerError> {
                        let a1 = lookup(part_1, row.id, "local parts")?;
                        let a2 = lookup(part_2, row.id, "local parts")?;
                        let e1 = lookup(&peer.enc_part_1, row.id, "peer parts")?;
                        let e2 = lookup(&peer.enc_part_2, row.id, "peer parts")?;
                        let e3 = lookup(&peer.enc_part_3, row.id, "peer parts")?;
                        let e4 = lookup(&peer.enc_part_4, row.id, "peer parts")?;
                        // (y - ½)·z - z²/8 + ln ½ - reg + noise
                        let terms = [
                            peer_key.mul_plain(e1, a1),
                            peer_key.mul_plain(e2, &unit),
                            peer_key.mul_plain(e3, &neg_unit),
                            peer_key.mul_plain(e4, &-a1),
                            peer_reg.clone(),
                        ];
                        let term = peer_key.sum(terms.iter());
                        let plain = -(a2 * &unit) + &constant;
                        Ok((row.id, peer_key.add_plain(&term, &plain)))
                    })
                    .collect()
            }
            (
                RawPart::LabelHolder {
                    part_1,
                    part_2,
                    part_3,
                    part_4,
                    reg_cost,
                    ..
                },
                EncPart::Guest(peer),
            ) => {
                let peer_reg = peer_key.mul_plain(&peer.enc_reg_cost, &neg_unit);
                let constant = &ln_half - reg_cost * &unit + &noise;
                batch
                    .par_iter()
                    .map(|row| -> Result<_, LearnerError> {
                        let b1 = lookup(part_1, row.id, "local parts")?;
                        let b2 = lookup(part_2, row.id, "local parts")?;
                        let b3 = lookup(part_3, row.id, "local parts")?;
                        let b4 = lookup(part_4, row.id, "local parts")?;
                        let e1 = lookup(&peer.enc_part_1, row.id, "peer parts")?;
                        let e2 = lookup(&peer.enc_part_2, row.id, "peer parts")?;
                        let terms = [
                            peer_key.mul_plain(e1, b1),
                            peer_key.mul_plain(e2, &neg_unit),
                            peer_key.mul_plain(e1, &-b4),
                            peer_reg.clone(),
                        ];
                        let term = peer_key.sum(terms.iter());
                        let plain = (b2 - b3) * &unit + &constant;
                        Ok((row.id, peer_key.add_plain(&term, &plain)))
                    })
                    .collect()
            }
            _ => Err(role_mismatch("both parties claim the same role")),
        }
    }

    fn real_cost(sum: f64, batch_len: usize) -> f64 {
        -sum / batch_len as f64
    }

    fn finalize_predictions(_model: &Model, sums: Vec<f64>) -> Result<Vec<f64>, LearnerError> {
        Ok(sums.into_iter().map(sigmoid).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::PrivateKey,
        learner::tests::params,
        message::{FromBytes, ToBytes},
        numeric::from_fixed,
    };

    fn decrypt_real(key: &PrivateKey, map: &EncSampleMap, noise: u64, accuracy: u32) -> Vec<f64> {
        map.values()
            .map(|c| from_fixed(&(key.decrypt_signed(c).unwrap() - BigInt::from(noise)), 2 * accuracy))
            .collect()
    }

    struct Setup {
        guest_key: PrivateKey,
        host_key: PrivateKey,
        guest_rows: Vec<TrainRow>,
        host_rows: Vec<TrainRow>,
        guest_thetas: Vec<f64>,
        host_thetas: Vec<f64>,
    }

    fn setup() -> Setup {
        crate::init().unwrap();
        Setup {
            guest_key: PrivateKey::generate(128).unwrap(),
            host_key: PrivateKey::generate(128).unwrap(),
            guest_rows: vec![
                TrainRow { id: 0, x: vec![0.5], y: None },
                TrainRow { id: 1, x: vec![-1.5], y: None },
                TrainRow { id: 2, x: vec![1.0], y: None },
            ],
            host_rows: vec![
                TrainRow { id: 0, x: vec![1.0, 0.2], y: Some(1.0) },
                TrainRow { id: 1, x: vec![1.0, -0.7], y: Some(0.0) },
                TrainRow { id: 2, x: vec![1.0, 1.1], y: Some(1.0) },
            ],
            guest_thetas: vec![0.4],
            host_thetas: vec![-0.1, 0.6],
        }
    }

    #[test]
    fn test_gradients_match_plaintext() {
        let s = setup();
        let (guest_params, host_params) = (params(false), params(true));
        let (guest_raw, guest_enc) = Logistic::local_parts(
            &s.guest_rows,
            &s.guest_thetas,
            0.0,
            &guest_params,
            s.guest_key.public_key(),
        )
        .unwrap();
        let (host_raw, host_enc) = Logistic::local_parts(
            &s.host_rows,
            &s.host_thetas,
            0.0,
            &host_params,
            s.host_key.public_key(),
        )
        .unwrap();

        let factors: Vec<f64> = (0..3)
            .map(|j| {
                let z = partial_prediction(&s.guest_rows[j], &s.guest_thetas)
                    + partial_prediction(&s.host_rows[j], &s.host_thetas);
                0.5 + z / 4.0 - s.host_rows[j].y.unwrap()
            })
            .collect();

        let noise = 42;
        let guest_grad = Logistic::enc_gradient(
            &guest_raw,
            &host_enc,
            &s.guest_rows,
            0,
            noise,
            &guest_params,
            s.host_key.public_key(),
        )
        .unwrap();
        for (j, term) in decrypt_real(&s.host_key, &guest_grad, noise, 10).iter().enumerate() {
            assert!((term - factors[j] * s.guest_rows[j].x[0]).abs() < 1e-8);
        }

        let host_grad = Logistic::enc_gradient(
            &host_raw,
            &guest_enc,
            &s.host_rows,
            1,
            noise,
            &host_params,
            s.guest_key.public_key(),
        )
        .unwrap();
        for (j, term) in decrypt_real(&s.guest_key, &host_grad, noise, 10).iter().enumerate() {
            assert!((term - factors[j] * s.host_rows[j].x[1]).abs() < 1e-8);
        }
    }

    #[test]
    fn test_costs_agree() {
        let s = setup();
        let (guest_params, host_params) = (params(false), params(true));
        let (guest_raw, guest_enc) = Logistic::local_parts(
            &s.guest_rows,
            &s.guest_thetas,
            0.01,
            &guest_params,
            s.guest_key.public_key(),
        )
        .unwrap();
        let (host_raw, host_enc) = Logistic::local_parts(
            &s.host_rows,
            &s.host_thetas,
            0.02,
            &host_params,
            s.host_key.public_key(),
        )
        .unwrap();
        let guest_enc = EncPart::from_bytes(&guest_enc.to_bytes().unwrap()).unwrap();
        let host_enc = EncPart::from_bytes(&host_enc.to_bytes().unwrap()).unwrap();

        let guest_cost = Logistic::enc_cost(
            &guest_raw,
            &host_enc,
            &s.guest_rows,
            7,
            &guest_params,
            s.host_key.public_key(),
        )
        .unwrap();
        let host_cost = Logistic::enc_cost(
            &host_raw,
            &guest_enc,
            &s.host_rows,
            9,
            &host_params,
            s.guest_key.public_key(),
        )
        .unwrap();
        let guest_cost: f64 = decrypt_real(&s.host_key, &guest_cost, 7, 10).iter().sum();
        let host_cost: f64 = decrypt_real(&s.guest_key, &host_cost, 9, 10).iter().sum();

        let expected = (0..3)
            .map(|j| {
                let z = partial_prediction(&s.guest_rows[j], &s.guest_thetas)
                    + partial_prediction(&s.host_rows[j], &s.host_thetas);
                let y = s.host_rows[j].y.unwrap();
                -(0.5_f64.ln() + (y - 0.5) * z - z * z / 8.0)
            })
            .sum::<f64>()
            / 3.0
            + 0.03;
        assert!((Logistic::real_cost(guest_cost, 3) - expected).abs() < 1e-8);
        assert!((Logistic::real_cost(host_cost, 3) - expected).abs() < 1e-8);
    }

    #[test]
    fn test_wire_form_tells_roles_apart() {
        let s = setup();
        let (_, guest_enc) = Logistic::local_parts(
            &s.guest_rows,
            &s.guest_thetas,
            0.0,
            &params(false),
            s.guest_key.public_key(),
        )
        .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&guest_enc.to_bytes().unwrap()).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["enc_part_1", "enc_part_2", "enc_reg_cost"]);
        match EncPart::from_bytes(&guest_enc.to_bytes().unwrap()).unwrap() {
            EncPart::Guest(_) => {}
            EncPart::LabelHolder(_) => panic!("guest part decoded as label holder part"),
        }
    }

    #[test]
    fn test_role_mismatch() {
        let s = setup();
        let (guest_raw, guest_enc) = Logistic::local_parts(
            &s.guest_rows,
            &s.guest_thetas,
            0.0,
            &params(false),
            s.guest_key.public_key(),
        )
        .unwrap();
        let err = Logistic::enc_cost(
            &guest_raw,
            &guest_enc,
            &s.guest_rows,
            0,
            &params(false),
            s.guest_key.public_key(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InternalInvariant);
    }

    #[test]
    fn test_import_recodes_label_of_holder() {
        let rows: Vec<Vec<String>> = vec![
            vec!["x".into(), "y".into()],
            vec!["1".into(), "yes".into()],
            vec!["2".into(), "no".into()],
        ];
        let mut holder = params(true);
        holder.label_name = Some("yes".into());
        let dataset = Logistic::import(&rows, &holder).unwrap();
        assert_eq!(dataset.feature("y").unwrap().values, vec![1.0, 0.0]);

        let standardized = Logistic::standardize(&dataset, &holder).unwrap();
        assert_eq!(standardized.features[1].values, vec![1.0, 0.0]);
    }

    #[test]
    fn test_sigmoid() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(20.0) > 0.999_999);
        assert!((sigmoid(-1.0) + sigmoid(1.0) - 1.0).abs() < 1e-12);
    }
}
