//! Degraded processors
//!
//! Installed while a previously connected call has lost connectivity. The
//! call keeps its mode; the only ways out are a re-join acknowledgement, a
//! hangup, or running out of reconnect attempts.

use super::{default_handler, ProcessorContext, ProcessorVariant, Step};
use crate::effect::{Effect, OutboundSignal};
use crate::event::EventPayload;
use crate::state::{CallState, StateError};

/// Remote side offered or re-joined while we are degraded: answer with a re-join
pub(super) fn handle_received_offer_or_join(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    _payload: &EventPayload,
) -> Result<Step, StateError> {
    let attempt = state.pending_reconnect().map_or(0, |token| token.attempt);
    tracing::debug!(
        call_id = %state.call_id(),
        processor = %ctx.variant,
        attempt,
        "Offer while degraded, re-joining"
    );
    Ok(Step::to(state.clone()).with(Effect::signal(OutboundSignal::Rejoin { attempt })))
}

/// Re-join acknowledged: back to the connected variant of the same mode
pub(super) fn handle_connected(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    payload: &EventPayload,
) -> Result<Step, StateError> {
    let Some(connected) = ctx.variant.resolve_connected_processor() else {
        return Ok(default_handler(ctx, state, payload));
    };

    let next = state
        .to_builder()
        .mark_connected()
        .pending_reconnect(None)
        .build()?;

    tracing::info!(
        call_id = %state.call_id(),
        from = %ctx.variant,
        to = %connected,
        "Network restored"
    );

    let mut step = Step::to(next).handing_over_to(connected);
    if state.call_mode().has_membership() {
        step = step.with(Effect::QueryMembership);
    }
    Ok(step)
}

/// Reconnect timer fired
pub(super) fn handle_reconnect_timeout(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    payload: &EventPayload,
) -> Result<Step, StateError> {
    let EventPayload::ReconnectTimeout { token } = payload else {
        return Ok(default_handler(ctx, state, payload));
    };
    let token = *token;

    if state.pending_reconnect() != Some(token) {
        tracing::debug!(
            call_id = %state.call_id(),
            timer = ?token,
            pending = ?state.pending_reconnect(),
            "Stale reconnect timer"
        );
        return Ok(Step::ignored(state));
    }

    if !ctx.policy.allows_retry_after(token.attempt) {
        tracing::warn!(
            call_id = %state.call_id(),
            processor = %ctx.variant,
            outage = token.outage,
            attempts = token.attempt,
            "Reconnect attempts exhausted, terminating call"
        );
        return Ok(Step::to(state.clone().into_terminated())
            .with(Effect::TeardownMedia)
            .handing_over_to(ProcessorVariant::Terminated));
    }

    let next_token = token.next();
    let delay = ctx.policy.delay_for(next_token.attempt);
    let next = state
        .to_builder()
        .pending_reconnect(Some(next_token))
        .build()?;

    tracing::debug!(
        call_id = %state.call_id(),
        outage = token.outage,
        attempt = token.attempt,
        delay = ?delay,
        "Reconnect attempt"
    );

    Ok(Step::to(next)
        .with(Effect::signal(OutboundSignal::Rejoin {
            attempt: token.attempt,
        }))
        .with(Effect::ScheduleTimer {
            delay,
            token: next_token,
        })
        .handing_over_to(ctx.variant))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::config::ReconnectPolicy;
    use crate::effect::{Effect, OutboundSignal};
    use crate::event::EventPayload;
    use crate::processor::ProcessorVariant;
    use crate::state::CallState;
    use crate::types::{CallId, CallMode, ConnectionState, ReconnectToken};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn degraded(mode: CallMode) -> (ProcessorVariant, CallState) {
        let policy = ReconnectPolicy::default();
        let connected = CallState::new(CallId::new())
            .to_builder()
            .call_mode(mode)
            .connection_state(ConnectionState::Connecting)
            .build()
            .unwrap()
            .to_builder()
            .mark_connected()
            .build()
            .unwrap();
        let variant = ProcessorVariant::for_state(&connected).unwrap();
        let step = variant
            .process(&policy, &connected, &EventPayload::NetworkUnavailable)
            .unwrap();
        (step.expected.unwrap(), step.state)
    }

    fn run(
        policy: &ReconnectPolicy,
        variant: ProcessorVariant,
        state: &CallState,
        payload: EventPayload,
    ) -> super::Step {
        variant.process(policy, state, &payload).unwrap()
    }

    #[test]
    fn test_reconnect_restores_same_mode() {
        for mode in [CallMode::OneToOne, CallMode::Group, CallMode::CallLink] {
            let (variant, state) = degraded(mode);
            let step = run(
                &ReconnectPolicy::default(),
                variant,
                &state,
                EventPayload::ConnectedAck,
            );

            assert_eq!(step.state.connection_state(), ConnectionState::Connected);
            assert_eq!(step.state.call_mode(), mode);
            assert_eq!(step.state.pending_reconnect(), None);
            assert_eq!(step.expected, variant.resolve_connected_processor());
            assert_eq!(
                step.effects.contains(&Effect::QueryMembership),
                mode.has_membership()
            );
        }
    }

    #[test]
    fn test_offer_while_degraded_rejoins() {
        let (variant, state) = degraded(CallMode::OneToOne);
        let step = run(
            &ReconnectPolicy::default(),
            variant,
            &state,
            EventPayload::OfferOrJoinReceived {
                mode: CallMode::OneToOne,
                participants: vec![],
            },
        );
        assert_eq!(
            step.effects,
            vec![Effect::signal(OutboundSignal::Rejoin { attempt: 1 })]
        );
        assert_eq!(step.state, state);
    }

    #[test]
    fn test_timeout_schedules_next_attempt() {
        let (variant, state) = degraded(CallMode::Group);
        let step = run(
            &ReconnectPolicy::default(),
            variant,
            &state,
            EventPayload::ReconnectTimeout {
                token: ReconnectToken::first(1),
            },
        );

        assert_eq!(
            step.state.pending_reconnect(),
            Some(ReconnectToken { outage: 1, attempt: 2 })
        );
        assert_eq!(
            step.state.connection_state(),
            ConnectionState::NetworkUnavailable
        );
        assert_eq!(
            step.effects,
            vec![
                Effect::signal(OutboundSignal::Rejoin { attempt: 1 }),
                Effect::ScheduleTimer {
                    delay: Duration::from_secs(2),
                    token: ReconnectToken { outage: 1, attempt: 2 },
                },
            ]
        );
    }

    #[test]
    fn test_stale_timeout_is_ignored() {
        let (variant, state) = degraded(CallMode::CallLink);
        let step = run(
            &ReconnectPolicy::default(),
            variant,
            &state,
            EventPayload::ReconnectTimeout {
                token: ReconnectToken { outage: 1, attempt: 3 },
            },
        );
        assert!(!step.handled);
        assert!(step.effects.is_empty());
        assert_eq!(step.state, state);
    }

    #[test]
    fn test_timer_from_earlier_outage_is_ignored() {
        let policy = ReconnectPolicy::default();
        let (variant, first_outage) = degraded(CallMode::Group);
        let restored = run(&policy, variant, &first_outage, EventPayload::ConnectedAck);
        let connected = restored.expected.unwrap();
        let second_outage = run(
            &policy,
            connected,
            &restored.state,
            EventPayload::NetworkUnavailable,
        );
        assert_eq!(
            second_outage.state.pending_reconnect(),
            Some(ReconnectToken::first(2))
        );

        let late = run(
            &policy,
            variant,
            &second_outage.state,
            EventPayload::ReconnectTimeout {
                token: ReconnectToken::first(1),
            },
        );
        assert!(!late.handled);
        assert!(late.effects.is_empty());
        assert_eq!(late.state, second_outage.state);
    }

    #[test]
    fn test_last_timeout_terminates() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        };
        let (variant, state) = degraded(CallMode::CallLink);

        let second = run(
            &policy,
            variant,
            &state,
            EventPayload::ReconnectTimeout {
                token: ReconnectToken::first(1),
            },
        );
        assert_eq!(
            second.state.pending_reconnect(),
            Some(ReconnectToken { outage: 1, attempt: 2 })
        );

        let last = run(
            &policy,
            variant,
            &second.state,
            EventPayload::ReconnectTimeout {
                token: ReconnectToken { outage: 1, attempt: 2 },
            },
        );
        assert!(last.state.is_terminated());
        assert!(last.state.ever_connected());
        assert_eq!(last.effects, vec![Effect::TeardownMedia]);
        assert_eq!(last.expected, Some(ProcessorVariant::Terminated));
    }

    #[test]
    fn test_degraded_call_does_not_signal_device_changes() {
        let (variant, state) = degraded(CallMode::OneToOne);
        let status = crate::types::LocalDeviceStatus::video_call();
        let step = run(
            &ReconnectPolicy::default(),
            variant,
            &state,
            EventPayload::LocalDeviceChanged { status },
        );
        assert_eq!(step.state.local_device(), status);
        assert!(step.effects.is_empty());
    }
}
