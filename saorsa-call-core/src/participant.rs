//! Call participants and membership
//!
//! Participants are keyed by identity, so a roster can never hold the same
//! peer twice. Rosters are values: applying updates produces a new roster and
//! leaves the original untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// String-based participant identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Create a new participant identity
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Membership status of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    /// Invited or admitted, media not flowing yet
    Joining,
    /// In the call
    Joined,
    /// Gone; removes the participant when applied
    Left,
}

/// A single membership change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    /// Who changed
    pub participant: ParticipantId,
    /// New status
    pub status: MembershipStatus,
}

impl ParticipantUpdate {
    /// Participant joined
    pub fn joined(participant: impl Into<ParticipantId>) -> Self {
        Self {
            participant: participant.into(),
            status: MembershipStatus::Joined,
        }
    }

    /// Participant is joining
    pub fn joining(participant: impl Into<ParticipantId>) -> Self {
        Self {
            participant: participant.into(),
            status: MembershipStatus::Joining,
        }
    }

    /// Participant left
    pub fn left(participant: impl Into<ParticipantId>) -> Self {
        Self {
            participant: participant.into(),
            status: MembershipStatus::Left,
        }
    }
}

/// Roster of a call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Participants(BTreeMap<ParticipantId, MembershipStatus>);

impl Participants {
    /// Empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Roster where every given identity is `Joining`
    pub fn joining<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = ParticipantId>,
    {
        Self(
            ids.into_iter()
                .map(|id| (id, MembershipStatus::Joining))
                .collect(),
        )
    }

    /// Number of participants
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the roster is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Status of a participant, if present
    pub fn status(&self, id: &ParticipantId) -> Option<MembershipStatus> {
        self.0.get(id).copied()
    }

    /// Whether a participant is present
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.0.contains_key(id)
    }

    /// Iterate over participants in identity order
    pub fn iter(&self) -> impl Iterator<Item = (&ParticipantId, MembershipStatus)> {
        self.0.iter().map(|(id, status)| (id, *status))
    }

    /// Roster after applying `updates` in order
    ///
    /// `Left` removes the participant; any other status inserts or replaces.
    #[must_use]
    pub fn apply(&self, updates: &[ParticipantUpdate]) -> Self {
        let mut next = self.0.clone();
        for update in updates {
            match update.status {
                MembershipStatus::Left => {
                    next.remove(&update.participant);
                }
                status => {
                    next.insert(update.participant.clone(), status);
                }
            }
        }
        Self(next)
    }
}

impl FromIterator<(ParticipantId, MembershipStatus)> for Participants {
    fn from_iter<T: IntoIterator<Item = (ParticipantId, MembershipStatus)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
