use super::{
    align::{rearrange_rows, retrieve_ids},
    encrypt_sample_ids,
    intersect,
    re_encrypt_id_set,
    EncIdSet,
    PsiError,
    PsiKeyPair,
};

/// A sample table aligned along the intersection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlignedSamples {
    /// The header row followed by one row per shared id, id column stripped.
    pub rows: Vec<Vec<String>>,
    /// The shared ids, sorted ascending. Row `i + 1` of `rows` belongs to `ids[i]`.
    pub ids: Vec<String>,
}

/// One party's side of a two-party intersection.
///
/// The exchange runs as follows, with `A` and `B` each holding a session:
///
/// 1. `A.encrypt_sample_ids()` is sent to `B`, which answers with `B.re_encrypt_for("A", ..)`.
/// 2. `A.set_re_encrypted_ids("B", ..)` stores its own fully encrypted set and `A` forwards it to
///    `B`, which stores it with `B.set_peer_final_ids("A", ..)`.
/// 3. The same happens in the other direction, after which both sides can [`intersect`].
///
/// [`intersect`]: PsiSession::intersect
pub struct PsiSession {
    peer: String,
    keys: PsiKeyPair,
    id_name: String,
    rows: Vec<Vec<String>>,
    ids: Vec<String>,
    own_final: Option<EncIdSet>,
    peer_final: Option<EncIdSet>,
    result: Option<AlignedSamples>,
}

impl PsiSession {
    /// Creates a session over a sample table with the id column `id_name`.
    ///
    /// # Errors
    /// Fails if the sample ids cannot be read from the table.
    pub fn new(
        rows: Vec<Vec<String>>,
        id_name: impl Into<String>,
        peer: impl Into<String>,
    ) -> Result<Self, PsiError> {
        let id_name = id_name.into();
        let ids = retrieve_ids(&rows, &id_name)?;
        Ok(Self {
            peer: peer.into(),
            keys: PsiKeyPair::generate(),
            id_name,
            rows,
            ids,
            own_final: None,
            peer_final: None,
            result: None,
        })
    }

    /// Gets the local sample ids in table order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    fn check_peer(&self, party: &str) -> Result<(), PsiError> {
        if party == self.peer {
            Ok(())
        } else {
            Err(PsiError::UnknownParty(party.to_string()))
        }
    }

    /// Encrypts the local sample ids under the session key.
    ///
    /// # Errors
    /// Fails if the ids are empty, empty strings or duplicated.
    pub fn encrypt_sample_ids(&self) -> Result<EncIdSet, PsiError> {
        encrypt_sample_ids(&self.ids, &self.keys)
    }

    /// Re-encrypts the peer's encrypted ids with the session key.
    ///
    /// # Errors
    /// Fails if `party` is not the peer or the set is malformed.
    pub fn re_encrypt_for(&self, party: &str, set: &EncIdSet) -> Result<EncIdSet, PsiError> {
        self.check_peer(party)?;
        re_encrypt_id_set(set, &self.keys)
    }

    /// Stores the local ids as re-encrypted by the peer.
    ///
    /// The first stored set is kept.
    ///
    /// # Errors
    /// Fails if `party` is not the peer.
    pub fn set_re_encrypted_ids(&mut self, party: &str, set: EncIdSet) -> Result<(), PsiError> {
        self.check_peer(party)?;
        self.own_final.get_or_insert(set);
        Ok(())
    }

    /// Stores the peer's fully encrypted ids.
    ///
    /// The first stored set is kept.
    ///
    /// # Errors
    /// Fails if `party` is not the peer.
    pub fn set_peer_final_ids(&mut self, party: &str, set: EncIdSet) -> Result<(), PsiError> {
        self.check_peer(party)?;
        self.peer_final.get_or_insert(set);
        Ok(())
    }

    /// Intersects and aligns the local table once both fully encrypted sets are present.
    ///
    /// Returns `None` while either set is missing; once computed, the same result is returned on
    /// every further call.
    ///
    /// # Errors
    /// Fails if the sets refer to unknown samples or the table cannot be aligned.
    pub fn intersect(&mut self) -> Result<Option<&AlignedSamples>, PsiError> {
        if self.result.is_none() {
            let (own, peer) = match (&self.own_final, &self.peer_final) {
                (Some(own), Some(peer)) => (own, peer),
                _ => return Ok(None),
            };
            let ids = intersect(&self.ids, own, std::slice::from_ref(peer))?;
            let rows = rearrange_rows(&self.rows, &self.id_name, &ids)?;
            self.result = Some(AlignedSamples { rows, ids });
        }
        Ok(self.result.as_ref())
    }
}
