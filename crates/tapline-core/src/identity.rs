//! Participant identities and the pairing relation.
//!
//! Every participant belongs to at most one pair, and a pair has exactly two
//! slots. The directory keeps pair records in an arena keyed by [`PairId`]
//! with a reverse index from participant to pair, so resolving a sender's
//! counterpart is two map lookups.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Maximum length of a participant identifier.
pub const MAX_PARTICIPANT_ID_LEN: usize = 64;

/// Length of generated invite codes.
pub const INVITE_CODE_LEN: usize = 6;

/// Unambiguous uppercase alphabet for invite codes (no 0/O, 1/I).
const INVITE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identity errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// Identifier has an invalid shape.
    #[error("Invalid participant id: {0}")]
    Invalid(&'static str),

    /// Identifier is not a member of any pair.
    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    /// Participant has no counterpart yet.
    #[error("Participant {0} is not paired")]
    NotPaired(ParticipantId),

    /// Participant already belongs to a pair.
    #[error("Participant {0} already belongs to a pair")]
    AlreadyPaired(ParticipantId),

    /// Pair id is already taken.
    #[error("Pair {0} already exists")]
    DuplicatePair(PairId),

    /// A pair needs two distinct members.
    #[error("Participant {0} cannot pair with itself")]
    SelfPair(ParticipantId),

    /// Invite code is unknown or already used.
    #[error("Invalid invite code")]
    InvalidInviteCode,
}

/// Validate a participant identifier's shape.
///
/// # Errors
///
/// Returns a static description of the first violated rule.
pub fn validate_participant_id(raw: &str) -> Result<(), &'static str> {
    if raw.is_empty() {
        return Err("participant id cannot be empty");
    }

    if raw.len() > MAX_PARTICIPANT_ID_LEN {
        return Err("participant id too long");
    }

    if !raw
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err("participant id contains invalid characters");
    }

    Ok(())
}

/// A participant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Parse an identifier, checking its shape only.
    ///
    /// Membership in a pair is checked by [`PairDirectory::resolve`].
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Invalid`] if the shape is wrong.
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        validate_participant_id(&raw).map_err(IdentityError::Invalid)?;
        Ok(Self(raw))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ParticipantId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

/// A pair identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairId(String);

impl PairId {
    /// Create a pair ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh pair ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("pair_{:x}", next_seed()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pair of participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairRecord {
    /// Pair identifier.
    pub id: PairId,
    /// Member who opened the pair.
    pub first: ParticipantId,
    /// Member who joined, once the invite was used.
    pub second: Option<ParticipantId>,
}

impl PairRecord {
    /// Check if both slots are filled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.second.is_some()
    }

    /// Get the member in the other slot.
    #[must_use]
    pub fn other(&self, member: &ParticipantId) -> Option<&ParticipantId> {
        if &self.first == member {
            self.second.as_ref()
        } else if self.second.as_ref() == Some(member) {
            Some(&self.first)
        } else {
            None
        }
    }
}

/// Time-salted counter, mixed so consecutive values look unrelated.
fn next_seed() -> u64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    // splitmix64 finalizer
    let mut z = timestamp.wrapping_add(counter.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Generate an invite code from the thread-local CSPRNG.
#[must_use]
pub fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

/// Directory of pairs and their members.
#[derive(Debug, Default)]
pub struct PairDirectory {
    /// Pair records indexed by pair id.
    pairs: DashMap<PairId, PairRecord>,
    /// Reverse index: member -> pair id.
    members: DashMap<ParticipantId, PairId>,
    /// Outstanding invite codes.
    invites: DashMap<String, PairId>,
}

impl PairDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a raw identifier to a known participant.
    ///
    /// Only exact members of a registered pair are accepted. Input is never
    /// trimmed or case-folded.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::UnknownParticipant`] otherwise.
    pub fn resolve(&self, raw: &str) -> Result<ParticipantId, IdentityError> {
        match self.members.get(raw) {
            Some(entry) => Ok(entry.key().clone()),
            None => Err(IdentityError::UnknownParticipant(raw.to_string())),
        }
    }

    /// Get the other member of `id`'s pair.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NotPaired`] while the second slot is empty,
    /// or [`IdentityError::UnknownParticipant`] if `id` has no pair.
    pub fn counterpart(&self, id: &ParticipantId) -> Result<ParticipantId, IdentityError> {
        let pair_id = self
            .members
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| IdentityError::UnknownParticipant(id.to_string()))?;

        self.pairs
            .get(&pair_id)
            .and_then(|pair| pair.other(id).cloned())
            .ok_or_else(|| IdentityError::NotPaired(id.clone()))
    }

    /// Register a complete pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the pair id is taken, a member already belongs
    /// to a pair, or both members are the same.
    pub fn seed_pair(
        &self,
        id: PairId,
        first: ParticipantId,
        second: ParticipantId,
    ) -> Result<PairRecord, IdentityError> {
        if first == second {
            return Err(IdentityError::SelfPair(first));
        }

        let Entry::Vacant(slot) = self.pairs.entry(id.clone()) else {
            return Err(IdentityError::DuplicatePair(id));
        };

        self.claim(&first, &id)?;
        if let Err(e) = self.claim(&second, &id) {
            self.members.remove(&first);
            return Err(e);
        }

        let record = PairRecord {
            id,
            first,
            second: Some(second),
        };
        slot.insert(record.clone());

        info!(pair = %record.id, "Seeded pair");
        Ok(record)
    }

    /// Open a new pair with one member and issue an invite code.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::AlreadyPaired`] if the founder has a pair.
    pub fn create_pair(&self, founder: ParticipantId) -> Result<(PairRecord, String), IdentityError> {
        let id = PairId::generate();
        self.claim(&founder, &id)?;

        let record = PairRecord {
            id: id.clone(),
            first: founder,
            second: None,
        };
        self.pairs.insert(id.clone(), record.clone());

        let code = loop {
            let code = generate_invite_code();
            if let Entry::Vacant(slot) = self.invites.entry(code.clone()) {
                slot.insert(id.clone());
                break code;
            }
        };

        debug!(pair = %id, founder = %record.first, "Created pair");
        Ok((record, code))
    }

    /// Fill the second slot of the pair behind an invite code.
    ///
    /// The code is consumed on success.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidInviteCode`] for unknown or used codes
    /// and [`IdentityError::AlreadyPaired`] if `member` has a pair.
    pub fn join_pair(&self, code: &str, member: ParticipantId) -> Result<PairRecord, IdentityError> {
        let (code, pair_id) = self
            .invites
            .remove(code)
            .ok_or(IdentityError::InvalidInviteCode)?;

        if let Err(e) = self.claim(&member, &pair_id) {
            self.invites.insert(code, pair_id);
            return Err(e);
        }

        match self.pairs.get_mut(&pair_id) {
            Some(mut pair) => {
                pair.second = Some(member);
                debug!(pair = %pair_id, "Pair completed");
                Ok(pair.clone())
            }
            None => {
                self.members.remove(&member);
                Err(IdentityError::InvalidInviteCode)
            }
        }
    }

    /// Get the pair a participant belongs to.
    #[must_use]
    pub fn pair_of(&self, id: &ParticipantId) -> Option<PairRecord> {
        let pair_id = self.members.get(id)?.value().clone();
        self.pairs.get(&pair_id).map(|pair| pair.clone())
    }

    /// Get all known participants, sorted.
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.members.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Get the number of pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    fn claim(&self, member: &ParticipantId, pair_id: &PairId) -> Result<(), IdentityError> {
        match self.members.entry(member.clone()) {
            Entry::Occupied(_) => Err(IdentityError::AlreadyPaired(member.clone())),
            Entry::Vacant(slot) => {
                slot.insert(pair_id.clone());
                Ok(())
            }
        }
    }
}
