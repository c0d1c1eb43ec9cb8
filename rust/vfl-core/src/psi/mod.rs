//! Private set intersection over the P-256 curve.
//!
//! Every party hashes its sample ids onto scalars and multiplies them with its own public point,
//! then every other party multiplies the result with its own secret scalar. Since scalar
//! multiplication commutes, an id shared by all parties ends up as the same point in every set,
//! while the points of the remaining ids reveal nothing.
//!
//! 1. [`encrypt_sample_ids`]: `{encode(H(id)·Q) → index}` under the local key pair.
//! 2. [`re_encrypt_id_set`]: `{encode(d·P) → index}` applied by every other party.
//! 3. [`intersect`]: the ids whose fully encrypted point appears in every other party's set.
//!
//! With more than two parties the second round is applied once per other party. [`align`] then
//! rewrites the sample tables along the intersection, and [`PsiSession`] carries one party
//! through a two-party run.

pub mod align;
mod session;

use std::collections::{BTreeMap, HashSet};

use p256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
    },
    AffinePoint,
    EncodedPoint,
    FieldBytes,
    ProjectivePoint,
    Scalar,
    SecretKey,
};
use rand::rngs::OsRng;
use rayon::prelude::*;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::{crypto::Sha256, ErrorKind};

pub use self::{
    align::{rearrange_rows, retrieve_ids},
    session::{AlignedSamples, PsiSession},
};

#[derive(Debug, Error, PartialEq, Eq)]
/// Errors related to the private set intersection and the alignment of sample tables.
pub enum PsiError {
    #[error("encrypted id set contains an invalid curve point")]
    InvalidPoint,
    #[error("sample id at position {0} is empty")]
    EmptySampleId(usize),
    #[error("sample id {0:?} occurs more than once")]
    DuplicateSampleId(String),
    #[error("sample id {0:?} of the intersection does not occur in the table")]
    UnknownSampleId(String),
    #[error("encrypted id set refers to sample index {0} which does not exist")]
    UnknownSampleIndex(usize),
    #[error("table does not contain the sample id column {0:?}")]
    IdColumnMissing(String),
    #[error("{0} is empty")]
    EmptyInput(&'static str),
    #[error("row {0} has fewer cells than the header")]
    RaggedRow(usize),
    #[error("party {0:?} does not take part in this intersection")]
    UnknownParty(String),
}

impl PsiError {
    /// Gets the coarse classification of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PsiError::InvalidPoint => ErrorKind::DecodingError,
            PsiError::IdColumnMissing(_) => ErrorKind::IdColumnMissing,
            PsiError::EmptyInput(_) => ErrorKind::EmptyInput,
            PsiError::UnknownSampleIndex(_) | PsiError::UnknownSampleId(_) => {
                ErrorKind::InternalInvariant
            }
            PsiError::UnknownParty(_) => ErrorKind::ProtocolSequence,
            PsiError::EmptySampleId(_) | PsiError::DuplicateSampleId(_) | PsiError::RaggedRow(_) => {
                ErrorKind::InvalidInput
            }
        }
    }
}

/// A P-256 key pair for the intersection.
///
/// The secret scalar is zeroized on drop.
pub struct PsiKeyPair {
    secret: SecretKey,
}

impl PsiKeyPair {
    /// Generates a fresh key pair.
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Gets the public point `Q = d·G`.
    pub fn public_point(&self) -> ProjectivePoint {
        self.secret.public_key().to_projective()
    }

    fn secret_scalar(&self) -> Scalar {
        *self.secret.to_nonzero_scalar()
    }
}

/// Maps a sample id onto a scalar: `SHA-256(id)` read as a big-endian integer, reduced modulo the
/// group order.
pub fn hash_to_scalar(id: &str) -> Scalar {
    let digest = Sha256::hash(id.as_bytes());
    <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(digest.as_slice()))
}

fn encode(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(false).as_bytes().to_vec()
}

fn decode(bytes: &[u8]) -> Result<ProjectivePoint, PsiError> {
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| PsiError::InvalidPoint)?;
    Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .map(ProjectivePoint::from)
        .ok_or(PsiError::InvalidPoint)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// A set of encrypted sample ids, mapping each encoded curve point to the index of its id in the
/// owner's id list.
///
/// Serialized as a JSON object from the hex encoded point to the index.
pub struct EncIdSet(BTreeMap<Vec<u8>, usize>);

impl EncIdSet {
    /// Gets the number of encrypted ids.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for EncIdSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(point, index)| (hex::encode(point), index)))
    }
}

impl<'de> Deserialize<'de> for EncIdSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, usize>::deserialize(deserializer)?
            .into_iter()
            .map(|(point, index)| {
                hex::decode(&point)
                    .map(|bytes| (bytes, index))
                    .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(&point), &"a hex encoded point"))
            })
            .collect::<Result<_, _>>()
            .map(Self)
    }
}

fn check_ids(ids: &[String]) -> Result<(), PsiError> {
    if ids.is_empty() {
        return Err(PsiError::EmptyInput("sample id list"));
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for (index, id) in ids.iter().enumerate() {
        if id.is_empty() {
            return Err(PsiError::EmptySampleId(index));
        }
        if !seen.insert(id.as_str()) {
            return Err(PsiError::DuplicateSampleId(id.clone()));
        }
    }
    Ok(())
}

/// Encrypts the local sample ids under the local key pair: `{encode(H(id)·Q) → index}`.
///
/// # Errors
/// Fails if the id list is empty or contains empty or duplicated ids.
pub fn encrypt_sample_ids(ids: &[String], keys: &PsiKeyPair) -> Result<EncIdSet, PsiError> {
    check_ids(ids)?;
    let public = keys.public_point();
    Ok(EncIdSet(
        ids.par_iter()
            .enumerate()
            .map(|(index, id)| (encode(&(public * hash_to_scalar(id))), index))
            .collect(),
    ))
}

/// Re-encrypts another party's encrypted id set with the local secret scalar:
/// `{encode(d·P) → index}`.
///
/// # Errors
/// Fails if the set is empty or contains a byte string that is not a valid curve point.
pub fn re_encrypt_id_set(set: &EncIdSet, keys: &PsiKeyPair) -> Result<EncIdSet, PsiError> {
    if set.is_empty() {
        return Err(PsiError::EmptyInput("encrypted id set"));
    }
    let secret = keys.secret_scalar();
    set.0
        .par_iter()
        .map(|(point, index)| Ok((encode(&(decode(point)? * secret)), *index)))
        .collect::<Result<BTreeMap<_, _>, PsiError>>()
        .map(EncIdSet)
}

/// Intersects the local fully encrypted id set with the fully encrypted sets of all other
/// parties.
///
/// Returns the shared ids of `ids`, sorted ascending.
///
/// # Errors
/// Fails if the local set refers to an index outside of `ids`.
pub fn intersect(
    ids: &[String],
    local: &EncIdSet,
    others: &[EncIdSet],
) -> Result<Vec<String>, PsiError> {
    let mut shared = local
        .0
        .iter()
        .filter(|(point, _)| others.iter().all(|other| other.0.contains_key(*point)))
        .map(|(_, index)| {
            ids.get(*index)
                .cloned()
                .ok_or(PsiError::UnknownSampleIndex(*index))
        })
        .collect::<Result<Vec<_>, _>>()?;
    shared.sort();
    Ok(shared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FromBytes, ToBytes};

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_hash_to_scalar_is_deterministic() {
        crate::init().unwrap();
        assert_eq!(hash_to_scalar("10"), hash_to_scalar("10"));
        assert_ne!(hash_to_scalar("10"), hash_to_scalar("11"));
    }

    #[test]
    fn test_two_party_intersection() {
        crate::init().unwrap();
        let ids_a = ids(&["1", "2", "3", "4"]);
        let ids_b = ids(&["3", "4", "5"]);
        let keys_a = PsiKeyPair::generate();
        let keys_b = PsiKeyPair::generate();

        let enc_a = encrypt_sample_ids(&ids_a, &keys_a).unwrap();
        let enc_b = encrypt_sample_ids(&ids_b, &keys_b).unwrap();
        let final_a = re_encrypt_id_set(&enc_a, &keys_b).unwrap();
        let final_b = re_encrypt_id_set(&enc_b, &keys_a).unwrap();

        let shared_a = intersect(&ids_a, &final_a, &[final_b.clone()]).unwrap();
        let shared_b = intersect(&ids_b, &final_b, &[final_a]).unwrap();
        assert_eq!(shared_a, ids(&["3", "4"]));
        assert_eq!(shared_a, shared_b);
    }

    /// Runs a full intersection among all parties and returns the result of each party.
    fn intersect_all(all: &[Vec<String>]) -> Vec<Vec<String>> {
        let keys: Vec<PsiKeyPair> = all.iter().map(|_| PsiKeyPair::generate()).collect();

        let finals: Vec<EncIdSet> = all
            .iter()
            .enumerate()
            .map(|(owner, ids)| {
                let mut set = encrypt_sample_ids(ids, &keys[owner]).unwrap();
                for (other, key) in keys.iter().enumerate() {
                    if other != owner {
                        set = re_encrypt_id_set(&set, key).unwrap();
                    }
                }
                set
            })
            .collect();

        all.iter()
            .enumerate()
            .map(|(owner, ids)| {
                let others: Vec<EncIdSet> = finals
                    .iter()
                    .enumerate()
                    .filter(|(other, _)| *other != owner)
                    .map(|(_, set)| set.clone())
                    .collect();
                intersect(ids, &finals[owner], &others).unwrap()
            })
            .collect()
    }

    fn numeric_ids(raw: &[u32]) -> Vec<String> {
        raw.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_three_party_intersection() {
        crate::init().unwrap();
        let all = [
            ids(&["a", "b", "c", "d"]),
            ids(&["b", "c", "d", "e"]),
            ids(&["c", "d", "f"]),
        ];
        for shared in intersect_all(&all) {
            assert_eq!(shared, ids(&["c", "d"]));
        }
    }

    #[test]
    fn test_intersection_of_numeric_ids() {
        crate::init().unwrap();
        let a = numeric_ids(&[10000, 10001, 10002, 10003, 10004, 10005, 10006]);
        let b = numeric_ids(&[10000, 10001, 10005, 10006, 10007, 10008, 10009]);
        let c = numeric_ids(&[88888, 99999, 10001, 10005, 10008, 10010, 10011]);

        for shared in intersect_all(&[a.clone(), b.clone()]) {
            assert_eq!(shared, numeric_ids(&[10000, 10001, 10005, 10006]));
        }
        for shared in intersect_all(&[a, b, c]) {
            assert_eq!(shared, numeric_ids(&[10001, 10005]));
        }
    }

    #[test]
    fn test_disjoint_ids_share_nothing() {
        crate::init().unwrap();
        let a = numeric_ids(&[10000, 10001, 10002]);
        let b = numeric_ids(&[20000, 20001]);
        for shared in intersect_all(&[a, b]) {
            assert!(shared.is_empty());
        }
    }

    #[test]
    fn test_rejects_bad_ids() {
        let keys = PsiKeyPair::generate();
        assert_eq!(
            encrypt_sample_ids(&[], &keys).unwrap_err(),
            PsiError::EmptyInput("sample id list")
        );
        assert_eq!(
            encrypt_sample_ids(&ids(&["1", ""]), &keys).unwrap_err(),
            PsiError::EmptySampleId(1)
        );
        assert_eq!(
            encrypt_sample_ids(&ids(&["1", "2", "1"]), &keys).unwrap_err(),
            PsiError::DuplicateSampleId("1".into())
        );
    }

    #[test]
    fn test_rejects_invalid_points() {
        crate::init().unwrap();
        let keys = PsiKeyPair::generate();
        let mut set = BTreeMap::new();
        set.insert(vec![4_u8; 65], 0);
        assert_eq!(
            re_encrypt_id_set(&EncIdSet(set), &keys).unwrap_err(),
            PsiError::InvalidPoint
        );
        assert!(EncIdSet::from_bytes(br#"{"zz": 0}"#).is_err());
    }

    #[test]
    fn test_wire_form() {
        crate::init().unwrap();
        let keys = PsiKeyPair::generate();
        let set = encrypt_sample_ids(&ids(&["x", "y"]), &keys).unwrap();
        let bytes = set.to_bytes().unwrap();
        let json: BTreeMap<String, usize> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json.len(), 2);
        assert!(json.keys().all(|point| point.len() == 130 && point.starts_with("04")));
        assert_eq!(EncIdSet::from_bytes(&bytes).unwrap(), set);
    }
}
