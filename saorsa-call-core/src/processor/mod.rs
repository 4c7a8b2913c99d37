//! Action processors
//!
//! A processor variant owns one orchestration mode of a call, e.g. "group call,
//! connected" or "call link, reconnecting". Every variant accepts every
//! [`EventKind`]; the dispatch table in `ProcessorVariant::handler` names the
//! operations a variant overrides and everything else falls back to
//! `default_handler`, which leaves the state untouched.
//!
//! # Variant selection
//!
//! | variant                      | mode     | connection         | ever connected |
//! |------------------------------|----------|--------------------|----------------|
//! | `Idle`                       | None     | Idle               | -              |
//! | `Dialing`                    | OneToOne | Dialing            | -              |
//! | `OneToOneConnecting`         | OneToOne | Connecting         | -              |
//! | `GroupConnecting`            | Group    | Connecting         | -              |
//! | `CallLinkPreJoin`            | CallLink | Connecting         | false          |
//! | `OneToOneConnected`          | OneToOne | Connected          | -              |
//! | `GroupConnected`             | Group    | Connected          | -              |
//! | `CallLinkConnected`          | CallLink | Connected          | true           |
//! | `OneToOneNetworkUnavailable` | OneToOne | NetworkUnavailable | -              |
//! | `GroupNetworkUnavailable`    | Group    | NetworkUnavailable | -              |
//! | `CallLinkNetworkUnavailable` | CallLink | Reconnecting       | true           |
//! | `Terminated`                 | any      | Terminated         | any            |

mod connected;
mod network_unavailable;
mod setup;

use crate::config::ReconnectPolicy;
use crate::effect::{Effect, OutboundSignal};
use crate::event::{EventKind, EventPayload};
use crate::state::{CallState, StateError};
use crate::types::{CallMode, ConnectionState, ModeKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of processor variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessorVariant {
    /// No call yet
    Idle,
    /// Outgoing one-to-one offer sent
    Dialing,
    /// One-to-one handshake
    OneToOneConnecting,
    /// Group join handshake
    GroupConnecting,
    /// Call link join handshake, never connected
    CallLinkPreJoin,
    /// Live one-to-one call
    OneToOneConnected,
    /// Live group call
    GroupConnected,
    /// Live call link
    CallLinkConnected,
    /// One-to-one call without network
    OneToOneNetworkUnavailable,
    /// Group call without network
    GroupNetworkUnavailable,
    /// Previously live call link without network
    CallLinkNetworkUnavailable,
    /// Call is over
    Terminated,
}

/// Operation implementing one (variant, event kind) cell of the table
pub(crate) type Handler =
    fn(&ProcessorContext<'_>, &CallState, &EventPayload) -> Result<Step, StateError>;

impl ProcessorVariant {
    /// Every variant
    pub const ALL: [ProcessorVariant; 12] = [
        ProcessorVariant::Idle,
        ProcessorVariant::Dialing,
        ProcessorVariant::OneToOneConnecting,
        ProcessorVariant::GroupConnecting,
        ProcessorVariant::CallLinkPreJoin,
        ProcessorVariant::OneToOneConnected,
        ProcessorVariant::GroupConnected,
        ProcessorVariant::CallLinkConnected,
        ProcessorVariant::OneToOneNetworkUnavailable,
        ProcessorVariant::GroupNetworkUnavailable,
        ProcessorVariant::CallLinkNetworkUnavailable,
        ProcessorVariant::Terminated,
    ];

    /// Variant responsible for `key`, `None` when the key is inconsistent
    #[must_use]
    pub fn for_key(key: ModeKey) -> Option<Self> {
        use CallMode as M;
        use ConnectionState as C;

        let variant = match (key.mode, key.connection, key.ever_connected) {
            (_, C::Terminated, _) => Self::Terminated,
            (M::None, C::Idle, false) => Self::Idle,
            (M::OneToOne, C::Dialing, _) => Self::Dialing,
            (M::OneToOne, C::Connecting, _) => Self::OneToOneConnecting,
            (M::Group, C::Connecting, _) => Self::GroupConnecting,
            (M::CallLink, C::Connecting, false) => Self::CallLinkPreJoin,
            (M::OneToOne, C::Connected, _) => Self::OneToOneConnected,
            (M::Group, C::Connected, _) => Self::GroupConnected,
            (M::CallLink, C::Connected, true) => Self::CallLinkConnected,
            (M::OneToOne, C::NetworkUnavailable, _) => Self::OneToOneNetworkUnavailable,
            (M::Group, C::NetworkUnavailable, _) => Self::GroupNetworkUnavailable,
            (M::CallLink, C::Reconnecting, true) => Self::CallLinkNetworkUnavailable,
            _ => return None,
        };
        Some(variant)
    }

    /// Variant responsible for `state`
    #[must_use]
    pub fn for_state(state: &CallState) -> Option<Self> {
        Self::for_key(state.mode_key())
    }

    /// Connection state this variant is installed for
    #[must_use]
    pub fn connection_state(self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Idle,
            Self::Dialing => ConnectionState::Dialing,
            Self::OneToOneConnecting | Self::GroupConnecting | Self::CallLinkPreJoin => {
                ConnectionState::Connecting
            }
            Self::OneToOneConnected | Self::GroupConnected | Self::CallLinkConnected => {
                ConnectionState::Connected
            }
            Self::OneToOneNetworkUnavailable | Self::GroupNetworkUnavailable => {
                ConnectionState::NetworkUnavailable
            }
            Self::CallLinkNetworkUnavailable => ConnectionState::Reconnecting,
            Self::Terminated => ConnectionState::Terminated,
        }
    }

    /// Degraded variant a connected variant hands over to on network loss
    ///
    /// The single place deciding the forward edge; [`Self::resolve_connected_processor`]
    /// is its inverse.
    #[must_use]
    pub fn resolve_network_unavailable_processor(self) -> Option<Self> {
        match self {
            Self::OneToOneConnected => Some(Self::OneToOneNetworkUnavailable),
            Self::GroupConnected => Some(Self::GroupNetworkUnavailable),
            Self::CallLinkConnected => Some(Self::CallLinkNetworkUnavailable),
            _ => None,
        }
    }

    /// Connected variant a degraded variant returns to once re-joined
    #[must_use]
    pub fn resolve_connected_processor(self) -> Option<Self> {
        match self {
            Self::OneToOneNetworkUnavailable => Some(Self::OneToOneConnected),
            Self::GroupNetworkUnavailable => Some(Self::GroupConnected),
            Self::CallLinkNetworkUnavailable => Some(Self::CallLinkConnected),
            _ => None,
        }
    }

    /// Whether this is one of the degraded variants
    #[must_use]
    pub fn is_network_unavailable(self) -> bool {
        self.resolve_connected_processor().is_some()
    }

    /// Operation overriding `kind`, `None` for the shared no-op
    pub(crate) fn handler(self, kind: EventKind) -> Option<Handler> {
        use EventKind as K;
        use ProcessorVariant as P;

        let handler: Handler = match (self, kind) {
            // Idle / setup
            (P::Idle, K::StartCall) => setup::handle_start_call,
            (P::Idle, K::OfferOrJoinReceived) => setup::handle_received_offer_or_join,
            (P::Dialing, K::OfferOrJoinReceived) => setup::handle_remote_answer,
            (P::OneToOneConnecting | P::GroupConnecting | P::CallLinkPreJoin, K::ConnectedAck) => {
                setup::handle_connected
            }
            (P::CallLinkPreJoin, K::NetworkUnavailable) => {
                setup::handle_pre_join_network_unavailable
            }

            // Connected base
            (P::OneToOneConnected | P::GroupConnected | P::CallLinkConnected, K::NetworkUnavailable) => {
                connected::handle_network_unavailable
            }
            (
                P::GroupConnecting | P::CallLinkPreJoin | P::GroupConnected | P::CallLinkConnected,
                K::MembershipChanged,
            ) => connected::handle_membership_update,
            (P::GroupConnected, K::RequestMembershipUpdate) => {
                connected::handle_group_request_update_members
            }
            (P::CallLinkConnected, K::RequestMembershipUpdate) => {
                connected::handle_call_link_request_update_members
            }

            // Network unavailable
            (p, K::OfferOrJoinReceived) if p.is_network_unavailable() => {
                network_unavailable::handle_received_offer_or_join
            }
            (p, K::ConnectedAck) if p.is_network_unavailable() => {
                network_unavailable::handle_connected
            }
            (p, K::ReconnectTimeout) if p.is_network_unavailable() => {
                network_unavailable::handle_reconnect_timeout
            }

            // Shared by every live variant
            (P::Idle | P::Terminated, K::LocalHangup | K::RemoteHangup | K::LocalDeviceChanged) => {
                return None;
            }
            (_, K::LocalHangup) => handle_local_hangup,
            (_, K::RemoteHangup) => handle_remote_hangup,
            (_, K::LocalDeviceChanged) => handle_local_device_changed,

            (P::Terminated, K::CallConcluded) => handle_call_concluded,

            _ => return None,
        };
        Some(handler)
    }

    /// Run the operation matching `payload` against `state`
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the operation computes a snapshot that
    /// violates a state invariant.
    pub fn process(
        self,
        policy: &ReconnectPolicy,
        state: &CallState,
        payload: &EventPayload,
    ) -> Result<Step, StateError> {
        let ctx = ProcessorContext {
            variant: self,
            policy,
        };
        match self.handler(payload.kind()) {
            Some(handler) => handler(&ctx, state, payload),
            None => Ok(default_handler(&ctx, state, payload)),
        }
    }
}

impl fmt::Display for ProcessorVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Inputs shared by every operation
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProcessorContext<'a> {
    pub(crate) variant: ProcessorVariant,
    pub(crate) policy: &'a ReconnectPolicy,
}

/// Result of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Snapshot after the operation
    pub state: CallState,
    /// Requested side effects, in order
    pub effects: Vec<Effect>,
    /// `false` when the shared no-op handled the event
    pub handled: bool,
    /// Variant the operation means to hand over to, if it decided one
    pub expected: Option<ProcessorVariant>,
}

impl Step {
    /// Operation applied, moving to `state`
    pub(crate) fn to(state: CallState) -> Self {
        Self {
            state,
            effects: Vec::new(),
            handled: true,
            expected: None,
        }
    }

    /// Event not meaningful here; state unchanged
    pub(crate) fn ignored(state: &CallState) -> Self {
        Self {
            handled: false,
            ..Self::to(state.clone())
        }
    }

    pub(crate) fn with(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub(crate) fn handing_over_to(self, variant: ProcessorVariant) -> Self {
        self.handing_over_to_opt(Some(variant))
    }

    /// `None` leaves the successor to be derived from the new state
    pub(crate) fn handing_over_to_opt(mut self, variant: Option<ProcessorVariant>) -> Self {
        self.expected = variant;
        self
    }
}

/// Shared fallback for events a variant does not override
pub(crate) fn default_handler(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    payload: &EventPayload,
) -> Step {
    tracing::debug!(
        call_id = %state.call_id(),
        processor = %ctx.variant,
        event = %payload.kind(),
        "Event not handled by processor, state unchanged"
    );
    Step::ignored(state)
}

fn handle_local_hangup(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    _payload: &EventPayload,
) -> Result<Step, StateError> {
    tracing::info!(call_id = %state.call_id(), processor = %ctx.variant, "Local hangup");

    Ok(Step::to(state.clone().into_terminated())
        .with(Effect::signal(OutboundSignal::Hangup))
        .with(Effect::TeardownMedia)
        .handing_over_to(ProcessorVariant::Terminated))
}

fn handle_remote_hangup(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    payload: &EventPayload,
) -> Result<Step, StateError> {
    let reason = match payload {
        EventPayload::RemoteHangup { reason } => reason.as_deref(),
        _ => None,
    };
    tracing::info!(
        call_id = %state.call_id(),
        processor = %ctx.variant,
        reason = reason.unwrap_or("none"),
        "Remote hangup"
    );

    Ok(Step::to(state.clone().into_terminated())
        .with(Effect::TeardownMedia)
        .handing_over_to(ProcessorVariant::Terminated))
}

fn handle_local_device_changed(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    payload: &EventPayload,
) -> Result<Step, StateError> {
    let EventPayload::LocalDeviceChanged { status } = payload else {
        return Ok(default_handler(ctx, state, payload));
    };
    if *status == state.local_device() {
        return Ok(Step::to(state.clone()));
    }

    let next = state.to_builder().local_device(*status).build()?;
    let step = Step::to(next);
    // Degraded calls pick the new settings up on re-join
    if state.connection_state().is_degraded() {
        return Ok(step);
    }
    Ok(step.with(Effect::signal(OutboundSignal::DeviceStatus { status: *status })))
}

fn handle_call_concluded(
    _ctx: &ProcessorContext<'_>,
    state: &CallState,
    _payload: &EventPayload,
) -> Result<Step, StateError> {
    tracing::debug!(call_id = %state.call_id(), "Call concluded, releasing processor");
    Ok(Step::to(state.clone()))
}
