//! Connected processors and the roster operations shared with group setup

use super::{default_handler, ProcessorContext, Step};
use crate::effect::Effect;
use crate::event::EventPayload;
use crate::state::{CallState, StateError};
use crate::types::ReconnectToken;

/// Connected: connectivity lost, hand over to the degraded variant
pub(super) fn handle_network_unavailable(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    payload: &EventPayload,
) -> Result<Step, StateError> {
    let Some(degraded) = ctx.variant.resolve_network_unavailable_processor() else {
        return Ok(default_handler(ctx, state, payload));
    };

    let token = ReconnectToken::first(state.outages().saturating_add(1));
    let delay = ctx.policy.delay_for(token.attempt);
    let next = state
        .to_builder()
        .connection_state(degraded.connection_state())
        .outages(token.outage)
        .pending_reconnect(Some(token))
        .build()?;

    tracing::warn!(
        call_id = %state.call_id(),
        from = %ctx.variant,
        to = %degraded,
        outage = token.outage,
        delay = ?delay,
        "Network unavailable, scheduling reconnect"
    );

    Ok(Step::to(next)
        .with(Effect::ScheduleTimer { delay, token })
        .handing_over_to(degraded))
}

/// Group or call link: apply roster changes in arrival order
pub(super) fn handle_membership_update(
    ctx: &ProcessorContext<'_>,
    state: &CallState,
    payload: &EventPayload,
) -> Result<Step, StateError> {
    let EventPayload::MembershipChanged { updates } = payload else {
        return Ok(default_handler(ctx, state, payload));
    };

    let roster = state.participants().apply(updates);
    tracing::debug!(
        call_id = %state.call_id(),
        updates = updates.len(),
        participants = roster.len(),
        "Membership updated"
    );

    let next = state.to_builder().participants(roster).build()?;
    Ok(Step::to(next))
}

/// Group connected: ask the interactor for a fresh roster
pub(super) fn handle_group_request_update_members(
    _ctx: &ProcessorContext<'_>,
    state: &CallState,
    _payload: &EventPayload,
) -> Result<Step, StateError> {
    Ok(Step::to(state.clone()).with(Effect::QueryMembership))
}

/// Call link connected: roster arrives from the call link server on its own
pub(super) fn handle_call_link_request_update_members(
    _ctx: &ProcessorContext<'_>,
    state: &CallState,
    _payload: &EventPayload,
) -> Result<Step, StateError> {
    tracing::info!(
        call_id = %state.call_id(),
        participants = state.participants().len(),
        "Call link membership refresh requested, waiting for server push"
    );
    Ok(Step::to(state.clone()))
}
