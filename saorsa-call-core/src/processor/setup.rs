//! Idle, dialing and connecting processors

use super::{default_handler, ProcessorContext, ProcessorVariant, Step};
use crate::effect::{Effect, OutboundSignal};
use crate::event::EventPayload;
use crate::participant::{MembershipStatus, ParticipantId, Participants};
use crate::state::{CallState, StateError};
use crate::types::{CallMode, ConnectionState};

fn connecting_variant(mode: CallMode) -> Option<ProcessorVariant> {
    match mode {
        CallMode::OneToOne => Some(ProcessorVariant::OneToOneConnecting),
        CallMode::Group => Some(ProcessorVariant::GroupConnecting),
        CallMode::CallLink => Some(ProcessorVariant::CallLinkPreJoin),
        CallMode::None => None,
    }
}

fn connected_variant(mode: CallMode) -> Option<ProcessorVariant> {
    match mode {
        CallMode::OneToOne => Some(ProcessorVariant::OneToOneConnected),
        CallMode::Group => Some(ProcessorVariant::GroupConnected),
        CallMode::CallLink => Some(ProcessorVariant::CallLinkConnected),
        CallMode::None => None,
    }
}

fn roster(participants: &[ParticipantId]) -> Participants {
    Participants::joining(participants.iter().cloned())
}

/// Idle: local user places a call
pub(super) fn handle_start_call(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    payload: &EventPayload,
) -> Result<Step, StateError> {
    let EventPayload::StartCall { mode, participants } = payload else {
        return Ok(default_handler(ctx, state, payload));
    };

    let builder = state
        .to_builder()
        .call_mode(*mode)
        .participants(roster(participants));

    match mode {
        CallMode::None => {
            tracing::warn!(call_id = %state.call_id(), "Start call without a call mode");
            Ok(Step::ignored(state))
        }
        CallMode::OneToOne => {
            tracing::info!(
                call_id = %state.call_id(),
                peers = participants.len(),
                "Dialing one-to-one call"
            );
            let next = builder.connection_state(ConnectionState::Dialing).build()?;
            Ok(Step::to(next)
                .with(Effect::signal(OutboundSignal::Offer {
                    to: participants.clone(),
                }))
                .handing_over_to(ProcessorVariant::Dialing))
        }
        CallMode::Group | CallMode::CallLink => {
            tracing::info!(call_id = %state.call_id(), mode = ?mode, "Joining call");
            let next = builder
                .connection_state(ConnectionState::Connecting)
                .build()?;
            Ok(Step::to(next)
                .with(Effect::signal(OutboundSignal::Join))
                .handing_over_to_opt(connecting_variant(*mode)))
        }
    }
}

/// Idle: remote offer (one-to-one) or join (group, call link)
pub(super) fn handle_received_offer_or_join(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    payload: &EventPayload,
) -> Result<Step, StateError> {
    let EventPayload::OfferOrJoinReceived { mode, participants } = payload else {
        return Ok(default_handler(ctx, state, payload));
    };

    let response = match mode {
        CallMode::None => {
            tracing::warn!(call_id = %state.call_id(), "Offer without a call mode");
            return Ok(Step::ignored(state));
        }
        CallMode::OneToOne => OutboundSignal::Accept,
        CallMode::Group | CallMode::CallLink => OutboundSignal::Join,
    };

    tracing::info!(call_id = %state.call_id(), mode = ?mode, "Received offer or join");

    let next = state
        .to_builder()
        .call_mode(*mode)
        .connection_state(ConnectionState::Connecting)
        .participants(roster(participants))
        .build()?;

    Ok(Step::to(next)
        .with(Effect::signal(response))
        .handing_over_to_opt(connecting_variant(*mode)))
}

/// Dialing: the callee answered
pub(super) fn handle_remote_answer(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    payload: &EventPayload,
) -> Result<Step, StateError> {
    let EventPayload::OfferOrJoinReceived { mode, .. } = payload else {
        return Ok(default_handler(ctx, state, payload));
    };
    if *mode != state.call_mode() {
        tracing::warn!(
            call_id = %state.call_id(),
            expected = ?state.call_mode(),
            received = ?mode,
            "Answer for a different call mode, ignoring"
        );
        return Ok(Step::ignored(state));
    }

    let next = state
        .to_builder()
        .connection_state(ConnectionState::Connecting)
        .build()?;
    Ok(Step::to(next).handing_over_to(ProcessorVariant::OneToOneConnecting))
}

/// Connecting: handshake finished
pub(super) fn handle_connected(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    _payload: &EventPayload,
) -> Result<Step, StateError> {
    let mode = state.call_mode();
    let mut builder = state.to_builder().mark_connected();

    if mode == CallMode::OneToOne {
        let joined = state
            .participants()
            .iter()
            .map(|(id, _)| (id.clone(), MembershipStatus::Joined))
            .collect();
        builder = builder.participants(joined);
    }

    let next = builder.build()?;
    tracing::info!(
        call_id = %state.call_id(),
        processor = %ctx.variant,
        ever_connected = next.ever_connected(),
        "Call connected"
    );

    let step = Step::to(next).handing_over_to_opt(connected_variant(mode));
    if mode.has_membership() {
        return Ok(step.with(Effect::QueryMembership));
    }
    Ok(step)
}

/// Call link pre-join: losing the network before the first connection is fatal
pub(super) fn handle_pre_join_network_unavailable(
    _ctx: &ProcessorContext<'_>,
    state: &CallState,
    _payload: &EventPayload,
) -> Result<Step, StateError> {
    tracing::warn!(
        call_id = %state.call_id(),
        "Call link lost network before it ever connected, terminating"
    );
    Ok(Step::to(state.clone().into_terminated())
        .with(Effect::TeardownMedia)
        .handing_over_to(ProcessorVariant::Terminated))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::config::ReconnectPolicy;
    use crate::effect::{Effect, OutboundSignal};
    use crate::event::EventPayload;
    use crate::participant::{MembershipStatus, ParticipantId};
    use crate::processor::ProcessorVariant;
    use crate::state::CallState;
    use crate::types::{CallId, CallMode, ConnectionState};

    fn run(variant: ProcessorVariant, state: &CallState, payload: EventPayload) -> super::Step {
        variant
            .process(&ReconnectPolicy::default(), state, &payload)
            .unwrap()
    }

    fn peers() -> Vec<ParticipantId> {
        vec![ParticipantId::new("bob")]
    }

    #[test]
    fn test_start_one_to_one_dials() {
        let state = CallState::new(CallId::new());
        let step = run(
            ProcessorVariant::Idle,
            &state,
            EventPayload::StartCall {
                mode: CallMode::OneToOne,
                participants: peers(),
            },
        );

        assert_eq!(step.state.connection_state(), ConnectionState::Dialing);
        assert_eq!(step.expected, Some(ProcessorVariant::Dialing));
        assert_eq!(
            step.effects,
            vec![Effect::signal(OutboundSignal::Offer { to: peers() })]
        );
        assert_eq!(
            step.state.participants().status(&"bob".into()),
            Some(MembershipStatus::Joining)
        );
    }

    #[test]
    fn test_start_call_link_joins() {
        let state = CallState::new(CallId::new());
        let step = run(
            ProcessorVariant::Idle,
            &state,
            EventPayload::StartCall {
                mode: CallMode::CallLink,
                participants: vec![],
            },
        );

        assert_eq!(step.state.connection_state(), ConnectionState::Connecting);
        assert_eq!(step.state.call_mode(), CallMode::CallLink);
        assert!(!step.state.ever_connected());
        assert_eq!(step.expected, Some(ProcessorVariant::CallLinkPreJoin));
        assert_eq!(step.effects, vec![Effect::signal(OutboundSignal::Join)]);
    }

    #[test]
    fn test_start_without_mode_is_ignored() {
        let state = CallState::new(CallId::new());
        let step = run(
            ProcessorVariant::Idle,
            &state,
            EventPayload::StartCall {
                mode: CallMode::None,
                participants: vec![],
            },
        );
        assert!(!step.handled);
        assert_eq!(step.state, state);
    }

    #[test]
    fn test_incoming_offer_is_accepted() {
        let state = CallState::new(CallId::new());
        let step = run(
            ProcessorVariant::Idle,
            &state,
            EventPayload::OfferOrJoinReceived {
                mode: CallMode::OneToOne,
                participants: peers(),
            },
        );
        assert_eq!(step.state.connection_state(), ConnectionState::Connecting);
        assert_eq!(step.effects, vec![Effect::signal(OutboundSignal::Accept)]);
        assert_eq!(step.expected, Some(ProcessorVariant::OneToOneConnecting));
    }

    #[test]
    fn test_answer_with_wrong_mode_is_ignored() {
        let idle = CallState::new(CallId::new());
        let dialing = run(
            ProcessorVariant::Idle,
            &idle,
            EventPayload::StartCall {
                mode: CallMode::OneToOne,
                participants: peers(),
            },
        )
        .state;

        let step = run(
            ProcessorVariant::Dialing,
            &dialing,
            EventPayload::OfferOrJoinReceived {
                mode: CallMode::Group,
                participants: vec![],
            },
        );
        assert!(!step.handled);
        assert_eq!(step.state, dialing);
    }

    #[test]
    fn test_one_to_one_connect_marks_peer_joined() {
        let idle = CallState::new(CallId::new());
        let connecting = run(
            ProcessorVariant::Idle,
            &idle,
            EventPayload::OfferOrJoinReceived {
                mode: CallMode::OneToOne,
                participants: peers(),
            },
        )
        .state;

        let step = run(
            ProcessorVariant::OneToOneConnecting,
            &connecting,
            EventPayload::ConnectedAck,
        );
        assert_eq!(step.state.connection_state(), ConnectionState::Connected);
        assert_eq!(
            step.state.participants().status(&"bob".into()),
            Some(MembershipStatus::Joined)
        );
        assert!(step.effects.is_empty());
    }

    #[test]
    fn test_connect_hands_over_per_mode() {
        let cases = [
            (
                CallMode::OneToOne,
                ProcessorVariant::OneToOneConnecting,
                ProcessorVariant::OneToOneConnected,
            ),
            (
                CallMode::Group,
                ProcessorVariant::GroupConnecting,
                ProcessorVariant::GroupConnected,
            ),
            (
                CallMode::CallLink,
                ProcessorVariant::CallLinkPreJoin,
                ProcessorVariant::CallLinkConnected,
            ),
        ];

        for (mode, connecting, connected) in cases {
            let idle = CallState::new(CallId::new());
            let joining = run(
                ProcessorVariant::Idle,
                &idle,
                EventPayload::OfferOrJoinReceived {
                    mode,
                    participants: peers(),
                },
            );
            assert_eq!(joining.expected, Some(connecting), "{mode:?}");

            let step = run(connecting, &joining.state, EventPayload::ConnectedAck);
            assert_eq!(step.expected, Some(connected), "{mode:?}");
            assert_eq!(
                ProcessorVariant::for_state(&step.state),
                Some(connected),
                "{mode:?}"
            );
            assert_eq!(
                step.effects.contains(&Effect::QueryMembership),
                mode.has_membership(),
                "{mode:?}"
            );
        }
    }

    #[test]
    fn test_pre_join_network_loss_terminates() {
        let idle = CallState::new(CallId::new());
        let connecting = run(
            ProcessorVariant::Idle,
            &idle,
            EventPayload::StartCall {
                mode: CallMode::CallLink,
                participants: vec![],
            },
        )
        .state;

        let step = run(
            ProcessorVariant::CallLinkPreJoin,
            &connecting,
            EventPayload::NetworkUnavailable,
        );
        assert_eq!(step.state.connection_state(), ConnectionState::Terminated);
        assert_eq!(step.effects, vec![Effect::TeardownMedia]);
    }
}
