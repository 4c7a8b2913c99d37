//! Outbound effect requests
//!
//! Processors never perform I/O. They describe what should happen as
//! [`Effect`]s and the engine hands those to the [`Interactor`](crate::interactor::Interactor).

use crate::participant::ParticipantId;
use crate::types::{CallId, LocalDeviceStatus, ReconnectToken};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Signaling message the interactor should send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundSignal {
    /// One-to-one offer to the callee
    Offer {
        /// Callee(s)
        to: Vec<ParticipantId>,
    },
    /// Accept a one-to-one offer
    Accept,
    /// Join a group call or call link
    Join,
    /// Re-offer or re-join after connectivity loss
    Rejoin {
        /// Reconnect attempt this request belongs to
        attempt: u32,
    },
    /// Local hangup notification
    Hangup,
    /// Local audio/video settings
    DeviceStatus {
        /// New settings
        status: LocalDeviceStatus,
    },
}

/// Side effect requested by a processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Send a signaling message
    SendSignal {
        /// Message to send
        signal: OutboundSignal,
    },
    /// Fire `ReconnectTimeout { token }` after `delay`
    ScheduleTimer {
        /// Delay before the timer fires
        delay: Duration,
        /// Outage and attempt the timer belongs to
        token: ReconnectToken,
    },
    /// Release all media for the call
    TeardownMedia,
    /// Fetch the current roster
    QueryMembership,
}

impl Effect {
    /// Shorthand for [`Effect::SendSignal`]
    pub fn signal(signal: OutboundSignal) -> Self {
        Self::SendSignal { signal }
    }
}

/// Effect bound to the call that requested it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectRequest {
    /// Requesting call
    pub call_id: CallId,
    /// What to do
    pub effect: Effect,
}

impl EffectRequest {
    /// Bind an effect to a call
    pub fn new(call_id: CallId, effect: Effect) -> Self {
        Self { call_id, effect }
    }
}
