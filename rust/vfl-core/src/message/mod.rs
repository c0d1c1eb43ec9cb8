//! Payloads exchanged between the parties and their wire form.
//!
//! Every payload is JSON. Big integers, both ciphertexts and decrypted plaintexts, are written as
//! decimal strings; per-sample maps are JSON objects keyed by the dense sample id.
//!
//! | payload | form |
//! |---|---|
//! | [`PublicKey`] | `{"N": "..", "G": ".."}` |
//! | [`EncIdSet`] | `{"<hex point>": index, ..}` |
//! | family specific encrypted parts | see [`linear::EncPart`] and [`logistic::EncPart`] |
//! | [`EncGradientAndCost`] | `{"gradients": [{"<id>": "<c>"}, ..], "cost": {"<id>": "<c>"}}` |
//! | [`DecGradientAndCost`] | the same shape with decrypted values |
//! | [`PredictPart`] | `[<partial prediction>, ..]` |
//! | [`Model`] | `{"thetas": {..}, "xbars": {..}, "sigmas": {..}, "label": "..", "is_tag_part": ..}` |
//!
//! [`PublicKey`]: crate::crypto::PublicKey
//! [`EncIdSet`]: crate::psi::EncIdSet
//! [`linear::EncPart`]: crate::learner::linear::EncPart
//! [`logistic::EncPart`]: crate::learner::logistic::EncPart
//! [`Model`]: crate::learner::Model

mod traits;

use std::{collections::BTreeMap, str::FromStr};

use derive_more::{From, Into};
use num::bigint::BigInt;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

pub use self::traits::{DecodeError, EncodeError, FromBytes, Payload, ToBytes};
use crate::{crypto::PublicKey, crypto::Ciphertext, psi::EncIdSet};

/// Ciphertexts keyed by sample id.
pub type EncSampleMap = BTreeMap<usize, Ciphertext>;

/// Decrypted values keyed by sample id.
pub type DecSampleMap = BTreeMap<usize, Plaintext>;

#[derive(Clone, Debug, PartialEq, Eq, From, Into)]
/// A decrypted signed integer.
///
/// Serialized as a decimal string.
pub struct Plaintext(BigInt);

impl Plaintext {
    /// Gets the value.
    pub fn as_bigint(&self) -> &BigInt {
        &self.0
    }
}

impl Serialize for Plaintext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Plaintext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let digits = String::deserialize(deserializer)?;
        BigInt::from_str(&digits)
            .map(Self)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(&digits), &"a decimal integer"))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
/// The noisy encrypted gradients and cost one party computed for the other to decrypt.
///
/// `gradients[i]` belongs to the `i`-th coefficient of the computing party.
pub struct EncGradientAndCost {
    pub gradients: Vec<EncSampleMap>,
    pub cost: EncSampleMap,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
/// The decrypted, still noisy, counterpart of an [`EncGradientAndCost`].
pub struct DecGradientAndCost {
    pub gradients: Vec<DecSampleMap>,
    pub cost: DecSampleMap,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
/// The partial predictions of one party, in the row order of the aligned prediction table.
pub struct PredictPart(pub Vec<f64>);

impl Payload for PublicKey {}
impl Payload for EncIdSet {}
impl Payload for EncGradientAndCost {}
impl Payload for DecGradientAndCost {}
impl Payload for PredictPart {}

#[cfg(test)]
mod tests {
    use num::bigint::BigUint;

    use super::*;

    #[test]
    fn test_gradient_and_cost_wire_form() {
        let mut cost = EncSampleMap::new();
        cost.insert(0, Ciphertext::from(BigUint::from(11_u8)));
        cost.insert(1, Ciphertext::from(BigUint::from(12_u8)));
        let payload = EncGradientAndCost {
            gradients: vec![cost.clone()],
            cost,
        };
        let bytes = payload.to_bytes().unwrap();
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            r#"{"gradients":[{"0":"11","1":"12"}],"cost":{"0":"11","1":"12"}}"#
        );
        assert_eq!(EncGradientAndCost::from_bytes(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_decrypted_values_are_signed() {
        let mut cost = DecSampleMap::new();
        cost.insert(3, Plaintext::from(BigInt::from(-42)));
        let payload = DecGradientAndCost {
            gradients: Vec::new(),
            cost,
        };
        let bytes = payload.to_bytes().unwrap();
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            r#"{"gradients":[],"cost":{"3":"-42"}}"#
        );
        assert_eq!(DecGradientAndCost::from_bytes(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_predict_part_wire_form() {
        let part = PredictPart(vec![0.5, -2.0]);
        assert_eq!(part.to_bytes().unwrap(), b"[0.5,-2.0]".to_vec());
        assert_eq!(PredictPart::from_bytes("[1]").unwrap(), PredictPart(vec![1.0]));
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        assert!(DecGradientAndCost::from_bytes(r#"{"gradients":[],"cost":{"3":"x"}}"#).is_err());
        assert!(EncGradientAndCost::from_bytes("not json").is_err());
    }
}
