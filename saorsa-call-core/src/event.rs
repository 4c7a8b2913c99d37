//! Inbound call events
//!
//! Events reach the state machine either already typed ([`CallEvent`]) or in
//! their wire form ([`RawCallEvent`]). Raw events are validated here, at the
//! boundary; a malformed event never reaches a processor.

use crate::participant::{ParticipantId, ParticipantUpdate};
use crate::types::{CallId, CallMode, LocalDeviceStatus, ReconnectToken};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors for events rejected at the boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Kind not known to the state machine
    #[error("Unknown event kind: {0}")]
    UnknownKind(String),

    /// Required field absent
    #[error("Event {kind} is missing required field `{field}`")]
    MissingField {
        /// Event kind
        kind: String,
        /// Field name
        field: &'static str,
    },

    /// Field present but unusable
    #[error("Event {kind} has invalid field `{field}`: {reason}")]
    InvalidField {
        /// Event kind
        kind: String,
        /// Field name
        field: &'static str,
        /// What was wrong
        reason: String,
    },
}

/// Discriminant of an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Local user starts a call
    StartCall,
    /// Remote offer, answer or join received
    OfferOrJoinReceived,
    /// Connectivity lost
    NetworkUnavailable,
    /// Roster changed
    MembershipChanged,
    /// Roster refresh requested
    RequestMembershipUpdate,
    /// Local audio/video settings changed
    LocalDeviceChanged,
    /// Local user hung up
    LocalHangup,
    /// Remote side hung up
    RemoteHangup,
    /// Handshake or re-join succeeded
    ConnectedAck,
    /// Reconnect timer fired
    ReconnectTimeout,
    /// All teardown for a terminated call has finished
    CallConcluded,
}

impl EventKind {
    /// Every kind, in declaration order
    pub const ALL: [EventKind; 11] = [
        EventKind::StartCall,
        EventKind::OfferOrJoinReceived,
        EventKind::NetworkUnavailable,
        EventKind::MembershipChanged,
        EventKind::RequestMembershipUpdate,
        EventKind::LocalDeviceChanged,
        EventKind::LocalHangup,
        EventKind::RemoteHangup,
        EventKind::ConnectedAck,
        EventKind::ReconnectTimeout,
        EventKind::CallConcluded,
    ];

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartCall => "start_call",
            Self::OfferOrJoinReceived => "offer_or_join_received",
            Self::NetworkUnavailable => "network_unavailable",
            Self::MembershipChanged => "membership_changed",
            Self::RequestMembershipUpdate => "request_membership_update",
            Self::LocalDeviceChanged => "local_device_changed",
            Self::LocalHangup => "local_hangup",
            Self::RemoteHangup => "remote_hangup",
            Self::ConnectedAck => "connected_ack",
            Self::ReconnectTimeout => "reconnect_timeout",
            Self::CallConcluded => "call_concluded",
        }
    }

    /// Whether an event of this kind may create a call
    #[must_use]
    pub fn opens_call(self) -> bool {
        matches!(self, Self::StartCall | Self::OfferOrJoinReceived)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventError::UnknownKind(s.to_string()))
    }
}

/// Typed event data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EventPayload {
    /// Local user starts a call
    StartCall {
        /// Topology of the new call
        mode: CallMode,
        /// Invited peers
        participants: Vec<ParticipantId>,
    },
    /// Remote offer/answer (one-to-one) or join (group, call link)
    OfferOrJoinReceived {
        /// Topology of the call
        mode: CallMode,
        /// Peers named by the offer
        participants: Vec<ParticipantId>,
    },
    /// Connectivity lost
    NetworkUnavailable,
    /// Roster changed
    MembershipChanged {
        /// Changes in arrival order
        updates: Vec<ParticipantUpdate>,
    },
    /// Roster refresh requested
    RequestMembershipUpdate,
    /// Local audio/video settings changed
    LocalDeviceChanged {
        /// New settings
        status: LocalDeviceStatus,
    },
    /// Local user hung up
    LocalHangup,
    /// Remote side hung up
    RemoteHangup {
        /// Reason given by the remote side
        reason: Option<String>,
    },
    /// Handshake or re-join succeeded
    ConnectedAck,
    /// Reconnect timer fired
    ReconnectTimeout {
        /// Timer that fired
        token: ReconnectToken,
    },
    /// All teardown for a terminated call has finished
    CallConcluded,
}

impl EventPayload {
    /// Discriminant
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StartCall { .. } => EventKind::StartCall,
            Self::OfferOrJoinReceived { .. } => EventKind::OfferOrJoinReceived,
            Self::NetworkUnavailable => EventKind::NetworkUnavailable,
            Self::MembershipChanged { .. } => EventKind::MembershipChanged,
            Self::RequestMembershipUpdate => EventKind::RequestMembershipUpdate,
            Self::LocalDeviceChanged { .. } => EventKind::LocalDeviceChanged,
            Self::LocalHangup => EventKind::LocalHangup,
            Self::RemoteHangup { .. } => EventKind::RemoteHangup,
            Self::ConnectedAck => EventKind::ConnectedAck,
            Self::ReconnectTimeout { .. } => EventKind::ReconnectTimeout,
            Self::CallConcluded => EventKind::CallConcluded,
        }
    }
}

/// Event addressed to one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallEvent {
    /// Target call
    pub call_id: CallId,
    /// Event data
    pub payload: EventPayload,
}

impl CallEvent {
    /// Create an event
    pub fn new(call_id: CallId, payload: EventPayload) -> Self {
        Self { call_id, payload }
    }

    /// Discriminant
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Local user starts a call
    pub fn start_call(call_id: CallId, mode: CallMode, participants: Vec<ParticipantId>) -> Self {
        Self::new(call_id, EventPayload::StartCall { mode, participants })
    }

    /// Remote offer or join received
    pub fn offer_or_join(
        call_id: CallId,
        mode: CallMode,
        participants: Vec<ParticipantId>,
    ) -> Self {
        Self::new(
            call_id,
            EventPayload::OfferOrJoinReceived { mode, participants },
        )
    }

    /// Roster changed
    pub fn membership_changed(call_id: CallId, updates: Vec<ParticipantUpdate>) -> Self {
        Self::new(call_id, EventPayload::MembershipChanged { updates })
    }

    /// Connectivity lost
    pub fn network_unavailable(call_id: CallId) -> Self {
        Self::new(call_id, EventPayload::NetworkUnavailable)
    }

    /// Handshake succeeded
    pub fn connected_ack(call_id: CallId) -> Self {
        Self::new(call_id, EventPayload::ConnectedAck)
    }

    /// Local user hung up
    pub fn local_hangup(call_id: CallId) -> Self {
        Self::new(call_id, EventPayload::LocalHangup)
    }

    /// Remote side hung up
    pub fn remote_hangup(call_id: CallId) -> Self {
        Self::new(call_id, EventPayload::RemoteHangup { reason: None })
    }

    /// Reconnect timer fired
    pub fn reconnect_timeout(call_id: CallId, token: ReconnectToken) -> Self {
        Self::new(call_id, EventPayload::ReconnectTimeout { token })
    }
}

/// Event as it arrives on the wire
///
/// ```json
/// {"kind": "membership_changed", "call_id": "…", "payload": {"updates": [
///     {"participant": "alice", "status": "left"}]}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCallEvent {
    /// Event kind wire name
    pub kind: String,
    /// Target call UUID
    #[serde(default)]
    pub call_id: Option<String>,
    /// Kind-specific data
    #[serde(default)]
    pub payload: Value,
}

impl TryFrom<RawCallEvent> for CallEvent {
    type Error = EventError;

    fn try_from(raw: RawCallEvent) -> Result<Self, Self::Error> {
        let kind: EventKind = raw.kind.parse()?;
        let name = kind.as_str();

        let call_id = raw.call_id.ok_or_else(|| EventError::MissingField {
            kind: name.to_string(),
            field: "call_id",
        })?;
        let call_id: CallId = call_id.parse().map_err(|e: uuid::Error| {
            EventError::InvalidField {
                kind: name.to_string(),
                field: "call_id",
                reason: e.to_string(),
            }
        })?;

        let payload = &raw.payload;
        let payload = match kind {
            EventKind::StartCall => EventPayload::StartCall {
                mode: call_mode(payload, name)?,
                participants: optional(payload, name, "participants")?.unwrap_or_default(),
            },
            EventKind::OfferOrJoinReceived => EventPayload::OfferOrJoinReceived {
                mode: call_mode(payload, name)?,
                participants: optional(payload, name, "participants")?.unwrap_or_default(),
            },
            EventKind::NetworkUnavailable => EventPayload::NetworkUnavailable,
            EventKind::MembershipChanged => EventPayload::MembershipChanged {
                updates: required(payload, name, "updates")?,
            },
            EventKind::RequestMembershipUpdate => EventPayload::RequestMembershipUpdate,
            EventKind::LocalDeviceChanged => EventPayload::LocalDeviceChanged {
                status: required(payload, name, "status")?,
            },
            EventKind::LocalHangup => EventPayload::LocalHangup,
            EventKind::RemoteHangup => EventPayload::RemoteHangup {
                reason: optional(payload, name, "reason")?,
            },
            EventKind::ConnectedAck => EventPayload::ConnectedAck,
            EventKind::ReconnectTimeout => {
                let attempt = required(payload, name, "attempt")?;
                let outage = required(payload, name, "outage")?;
                EventPayload::ReconnectTimeout {
                    token: ReconnectToken { outage, attempt },
                }
            }
            EventKind::CallConcluded => EventPayload::CallConcluded,
        };

        Ok(CallEvent { call_id, payload })
    }
}

fn optional<T: DeserializeOwned>(
    payload: &Value,
    kind: &str,
    field: &'static str,
) -> Result<Option<T>, EventError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| EventError::InvalidField {
                kind: kind.to_string(),
                field,
                reason: e.to_string(),
            }),
    }
}

fn required<T: DeserializeOwned>(
    payload: &Value,
    kind: &str,
    field: &'static str,
) -> Result<T, EventError> {
    optional(payload, kind, field)?.ok_or_else(|| EventError::MissingField {
        kind: kind.to_string(),
        field,
    })
}

fn call_mode(payload: &Value, kind: &str) -> Result<CallMode, EventError> {
    let mode: CallMode = required(payload, kind, "mode")?;
    if mode == CallMode::None {
        return Err(EventError::InvalidField {
            kind: kind.to_string(),
            field: "mode",
            reason: "a call needs a topology".to_string(),
        });
    }
    Ok(mode)
}
