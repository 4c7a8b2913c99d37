//! Call state snapshot
//!
//! A [`CallState`] is never mutated in place. Every transition copies the
//! current snapshot through [`CallState::to_builder`], overrides the fields it
//! cares about and re-validates the result with [`CallStateBuilder::build`].

use crate::participant::Participants;
use crate::types::{
    CallId, CallLinkState, CallMode, ConnectionState, LocalDeviceStatus, ModeKey, ReconnectToken,
};
use serde::Serialize;
use thiserror::Error;

/// Invariant violations rejected when building a snapshot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Call-link mode without call-link state
    #[error("call link state missing for call-link call")]
    MissingCallLinkState,

    /// Call-link state on a call of another mode
    #[error("call link state present for {0:?} call")]
    UnexpectedCallLinkState(CallMode),

    /// `ever_connected` went from true back to false
    #[error("ever_connected cannot be cleared once set")]
    EverConnectedRegressed,

    /// Connected call link whose flag was not flipped in the same copy
    #[error("call link is connected but ever_connected is false")]
    ConnectedWithoutEverConnected,

    /// Reconnecting call link that never connected
    #[error("call link cannot reconnect before it has connected")]
    ReconnectingBeforeConnected,

    /// Outage counter went backwards
    #[error("outage counter cannot decrease")]
    OutagesRegressed,

    /// Armed reconnect timer from another outage
    #[error("reconnect timer for outage {timer} armed during outage {current}")]
    ForeignReconnectTimer {
        /// Outage named by the timer
        timer: u32,
        /// Current outage
        current: u32,
    },

    /// A call in progress must have a topology
    #[error("connection state {0:?} requires a call mode")]
    ModeRequired(ConnectionState),
}

/// Snapshot of one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallState {
    call_id: CallId,
    call_mode: CallMode,
    connection_state: ConnectionState,
    call_link: Option<CallLinkState>,
    participants: Participants,
    local_device: LocalDeviceStatus,
    outages: u32,
    pending_reconnect: Option<ReconnectToken>,
}

impl CallState {
    /// Fresh state for a call that has not started yet
    pub fn new(call_id: CallId) -> Self {
        Self {
            call_id,
            call_mode: CallMode::None,
            connection_state: ConnectionState::Idle,
            call_link: None,
            participants: Participants::new(),
            local_device: LocalDeviceStatus::default(),
            outages: 0,
            pending_reconnect: None,
        }
    }

    /// Call identifier
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Call topology
    pub fn call_mode(&self) -> CallMode {
        self.call_mode
    }

    /// Connectivity
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    /// Call-link state, present only for call links
    pub fn call_link(&self) -> Option<CallLinkState> {
        self.call_link
    }

    /// Whether a call link has ever reached `Connected`
    pub fn ever_connected(&self) -> bool {
        self.call_link.is_some_and(|link| link.ever_connected)
    }

    /// Roster
    pub fn participants(&self) -> &Participants {
        &self.participants
    }

    /// Local device status
    pub fn local_device(&self) -> LocalDeviceStatus {
        self.local_device
    }

    /// Connectivity losses seen since the call started
    pub fn outages(&self) -> u32 {
        self.outages
    }

    /// Reconnect timer currently armed
    pub fn pending_reconnect(&self) -> Option<ReconnectToken> {
        self.pending_reconnect
    }

    /// Key used to select the processor variant for this snapshot
    pub fn mode_key(&self) -> ModeKey {
        ModeKey {
            mode: self.call_mode,
            connection: self.connection_state,
            ever_connected: self.ever_connected(),
        }
    }

    /// Whether the call is over
    pub fn is_terminated(&self) -> bool {
        self.connection_state.is_terminal()
    }

    /// Start a copy of this snapshot
    pub fn to_builder(&self) -> CallStateBuilder {
        CallStateBuilder {
            base_ever_connected: self.ever_connected(),
            base_outages: self.outages,
            next: self.clone(),
        }
    }

    /// Copy moved to `Terminated`
    ///
    /// Infallible: `Terminated` is valid for every mode.
    #[must_use]
    pub fn into_terminated(self) -> Self {
        Self {
            connection_state: ConnectionState::Terminated,
            pending_reconnect: None,
            ..self
        }
    }
}

/// Copy-with-changes builder for [`CallState`]
///
/// Fields that are not overridden keep the value of the source snapshot.
#[derive(Debug, Clone)]
pub struct CallStateBuilder {
    base_ever_connected: bool,
    base_outages: u32,
    next: CallState,
}

impl CallStateBuilder {
    /// Set the topology; switching to call-link mode creates call-link state
    #[must_use]
    pub fn call_mode(mut self, mode: CallMode) -> Self {
        self.next.call_mode = mode;
        if mode == CallMode::CallLink && self.next.call_link.is_none() {
            self.next.call_link = Some(CallLinkState::default());
        }
        self
    }

    /// Set connectivity
    #[must_use]
    pub fn connection_state(mut self, state: ConnectionState) -> Self {
        self.next.connection_state = state;
        self
    }

    /// Move to `Connected`, flipping `ever_connected` for call links
    #[must_use]
    pub fn mark_connected(mut self) -> Self {
        self.next.connection_state = ConnectionState::Connected;
        if let Some(link) = self.next.call_link.as_mut() {
            link.ever_connected = true;
        }
        self
    }

    /// Override call-link state directly
    #[must_use]
    pub fn call_link(mut self, call_link: Option<CallLinkState>) -> Self {
        self.next.call_link = call_link;
        self
    }

    /// Replace the roster
    #[must_use]
    pub fn participants(mut self, participants: Participants) -> Self {
        self.next.participants = participants;
        self
    }

    /// Replace local device status
    #[must_use]
    pub fn local_device(mut self, status: LocalDeviceStatus) -> Self {
        self.next.local_device = status;
        self
    }

    /// Record the start of a new outage
    #[must_use]
    pub fn outages(mut self, outages: u32) -> Self {
        self.next.outages = outages;
        self
    }

    /// Set or clear the armed reconnect timer
    #[must_use]
    pub fn pending_reconnect(mut self, token: Option<ReconnectToken>) -> Self {
        self.next.pending_reconnect = token;
        self
    }

    /// Validate and produce the snapshot
    ///
    /// # Errors
    ///
    /// Returns the first [`StateError`] the candidate violates.
    pub fn build(self) -> Result<CallState, StateError> {
        let next = self.next;

        match (next.call_mode, next.call_link) {
            (CallMode::CallLink, None) => return Err(StateError::MissingCallLinkState),
            (mode, Some(_)) if mode != CallMode::CallLink => {
                return Err(StateError::UnexpectedCallLinkState(mode));
            }
            _ => {}
        }

        if self.base_ever_connected && !next.ever_connected() {
            return Err(StateError::EverConnectedRegressed);
        }

        if next.outages < self.base_outages {
            return Err(StateError::OutagesRegressed);
        }
        if let Some(token) = next.pending_reconnect {
            if token.outage != next.outages {
                return Err(StateError::ForeignReconnectTimer {
                    timer: token.outage,
                    current: next.outages,
                });
            }
        }

        if next.call_mode == CallMode::CallLink && !next.ever_connected() {
            match next.connection_state {
                ConnectionState::Connected => {
                    return Err(StateError::ConnectedWithoutEverConnected);
                }
                ConnectionState::Reconnecting => {
                    return Err(StateError::ReconnectingBeforeConnected);
                }
                _ => {}
            }
        }

        if next.call_mode == CallMode::None
            && !matches!(
                next.connection_state,
                ConnectionState::Idle | ConnectionState::Terminated
            )
        {
            return Err(StateError::ModeRequired(next.connection_state));
        }

        Ok(next)
    }
}
