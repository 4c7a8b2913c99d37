//! Call types and data structures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    /// Create a new random call ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CallId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Call topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    /// No call topology chosen yet
    None,
    /// Direct peer-to-peer call
    OneToOne,
    /// Group call by invitation
    Group,
    /// Call joined through a shareable link
    CallLink,
}

impl CallMode {
    /// Whether the mode carries group-style membership
    #[must_use]
    pub fn has_membership(self) -> bool {
        matches!(self, Self::Group | Self::CallLink)
    }
}

/// Call mode name not recognised
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown call mode: {0}")]
pub struct UnknownCallMode(pub String);

impl FromStr for CallMode {
    type Err = UnknownCallMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "one_to_one" => Ok(Self::OneToOne),
            "group" => Ok(Self::Group),
            "call_link" => Ok(Self::CallLink),
            other => Err(UnknownCallMode(other.to_string())),
        }
    }
}

/// Connectivity of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No call in progress
    Idle,
    /// Outgoing one-to-one offer sent, waiting for the callee
    Dialing,
    /// Handshake in progress
    Connecting,
    /// Call is live
    Connected,
    /// Call link lost connectivity after having been live
    Reconnecting,
    /// One-to-one or group call lost connectivity
    NetworkUnavailable,
    /// Call is over
    Terminated,
}

impl ConnectionState {
    /// Whether no further transition can leave this state
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }

    /// Whether connectivity is currently degraded
    #[must_use]
    pub fn is_degraded(self) -> bool {
        matches!(self, Self::Reconnecting | Self::NetworkUnavailable)
    }
}

/// Call-link specific state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallLinkState {
    /// Set the first time the link reaches `Connected`, never cleared
    pub ever_connected: bool,
}

/// Local audio/video enablement
///
/// Opaque to the processors: carried through every transition unless a
/// `LocalDeviceChanged` event replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDeviceStatus {
    /// Capture audio
    pub audio_enabled: bool,
    /// Capture video
    pub video_enabled: bool,
    /// Microphone muted
    pub microphone_muted: bool,
    /// Output routed to speaker
    pub speaker_on: bool,
}

impl LocalDeviceStatus {
    /// Audio-only device setup
    pub fn audio_only() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: false,
            microphone_muted: false,
            speaker_on: false,
        }
    }

    /// Video call with audio
    pub fn video_call() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            microphone_muted: false,
            speaker_on: true,
        }
    }
}

impl Default for LocalDeviceStatus {
    fn default() -> Self {
        Self::audio_only()
    }
}

/// Identifies one reconnect timer
///
/// `outage` counts the connectivity losses of a call, so a timer armed during
/// an earlier outage never matches the timer of a later one even when both
/// carry the same attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReconnectToken {
    /// Outage the timer belongs to, 1-based
    pub outage: u32,
    /// Attempt within that outage, 1-based
    pub attempt: u32,
}

impl ReconnectToken {
    /// First attempt of `outage`
    #[must_use]
    pub fn first(outage: u32) -> Self {
        Self { outage, attempt: 1 }
    }

    /// Following attempt of the same outage
    #[must_use]
    pub fn next(self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self
        }
    }
}

/// Lookup key selecting a processor variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModeKey {
    /// Call topology
    pub mode: CallMode,
    /// Connectivity
    pub connection: ConnectionState,
    /// Call-link `ever_connected`, `false` for other modes
    pub ever_connected: bool,
}

impl fmt::Display for ModeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:?}, {:?}, ever_connected={})",
            self.mode, self.connection, self.ever_connected
        )
    }
}
