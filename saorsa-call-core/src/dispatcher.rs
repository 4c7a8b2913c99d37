//! Event dispatch
//!
//! [`Dispatcher::dispatch`] is a pure function of `(event, state)`: it picks
//! the processor variant for the state, runs the operation for the event kind
//! and checks the result before anyone gets to see it. It never fails. A result
//! that breaks a call invariant is replaced by a forced termination.

use crate::config::ReconnectPolicy;
use crate::effect::{Effect, EffectRequest};
use crate::event::CallEvent;
use crate::processor::{ProcessorVariant, Step};
use crate::state::CallState;
use crate::transition::is_valid_transition;
use crate::types::CallMode;
use serde::Serialize;

/// How the dispatcher treated an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", content = "reason", rename_all = "snake_case")]
pub enum Disposition {
    /// An operation ran and its result was installed
    Applied,
    /// The shared no-op handled the event
    Ignored,
    /// The call was forced to `Terminated`
    InvariantViolated(String),
}

/// Outcome of dispatching one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// Snapshot after the event
    pub state: CallState,
    /// Effects to hand to the interactor, in order
    pub effects: Vec<EffectRequest>,
    /// Variant installed before the event, `None` if the old state resolved to none
    pub previous: Option<ProcessorVariant>,
    /// Variant installed after the event
    pub processor: ProcessorVariant,
    /// How the event was treated
    pub disposition: Disposition,
}

impl Transition {
    /// Whether the installed processor changed
    #[must_use]
    pub fn swapped_processor(&self) -> bool {
        self.previous != Some(self.processor)
    }

    /// Whether the event left the call untouched
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.disposition == Disposition::Ignored
    }
}

/// Stateless dispatcher, parameterised by the reconnect policy
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    policy: ReconnectPolicy,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy }
    }

    /// Reconnect policy handed to processors
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Dispatch `event` against `state`
    pub fn dispatch(&self, event: &CallEvent, state: &CallState) -> Transition {
        self.dispatch_with(None, event, state)
    }

    /// Dispatch `event` against `state`, checking that `installed` is the
    /// variant the state resolves to
    #[must_use]
    pub fn dispatch_with(
        &self,
        installed: Option<ProcessorVariant>,
        event: &CallEvent,
        state: &CallState,
    ) -> Transition {
        let resolved = ProcessorVariant::for_state(state);
        let previous = installed.or(resolved);

        let Some(variant) = resolved else {
            return violation(
                state,
                previous,
                format!("state {} has no processor", state.mode_key()),
            );
        };
        if let Some(installed) = installed {
            if installed != variant {
                return violation(
                    state,
                    previous,
                    format!("installed {installed} but state {} needs {variant}", state.mode_key()),
                );
            }
        }

        if event.call_id != state.call_id() {
            tracing::warn!(
                call_id = %state.call_id(),
                event_call_id = %event.call_id,
                "Event addressed to another call, ignoring"
            );
            return Transition {
                state: state.clone(),
                effects: Vec::new(),
                previous,
                processor: variant,
                disposition: Disposition::Ignored,
            };
        }

        let step = match variant.process(&self.policy, state, &event.payload) {
            Ok(step) => step,
            Err(e) => {
                return violation(state, previous, format!("{variant} on {}: {e}", event.kind()));
            }
        };

        let next = match check_step(state, &step) {
            Ok(next) => next,
            Err(reason) => {
                return violation(state, previous, format!("{variant} on {}: {reason}", event.kind()));
            }
        };

        if next != variant {
            tracing::debug!(
                call_id = %state.call_id(),
                event = %event.kind(),
                old_state = ?state.connection_state(),
                new_state = ?step.state.connection_state(),
                from = %variant,
                to = %next,
                "Processor swapped"
            );
        }

        let call_id = state.call_id();
        Transition {
            effects: step
                .effects
                .into_iter()
                .map(|effect| EffectRequest::new(call_id, effect))
                .collect(),
            state: step.state,
            previous,
            processor: next,
            disposition: if step.handled {
                Disposition::Applied
            } else {
                Disposition::Ignored
            },
        }
    }
}

/// Validate an operation result against the state it was computed from
fn check_step(before: &CallState, step: &Step) -> Result<ProcessorVariant, String> {
    let after = &step.state;

    if after.call_id() != before.call_id() {
        return Err(format!("call id changed to {}", after.call_id()));
    }
    if !is_valid_transition(before.connection_state(), after.connection_state()) {
        return Err(format!(
            "transition {:?} -> {:?} not permitted",
            before.connection_state(),
            after.connection_state()
        ));
    }
    if before.call_mode() != CallMode::None && after.call_mode() != before.call_mode() {
        return Err(format!(
            "call mode changed from {:?} to {:?}",
            before.call_mode(),
            after.call_mode()
        ));
    }
    if before.ever_connected() && !after.ever_connected() {
        return Err("ever_connected regressed".to_string());
    }

    let next = ProcessorVariant::for_state(after)
        .ok_or_else(|| format!("result {} has no processor", after.mode_key()))?;
    match step.expected {
        Some(expected) if expected != next => Err(format!(
            "operation handed over to {expected} but state {} needs {next}",
            after.mode_key()
        )),
        _ => Ok(next),
    }
}

fn violation(state: &CallState, previous: Option<ProcessorVariant>, reason: String) -> Transition {
    tracing::error!(
        call_id = %state.call_id(),
        processor = ?previous,
        %reason,
        "Call invariant violated, terminating call"
    );

    let effects = if state.is_terminated() {
        Vec::new()
    } else {
        vec![EffectRequest::new(state.call_id(), Effect::TeardownMedia)]
    };
    Transition {
        state: state.clone().into_terminated(),
        effects,
        previous,
        processor: ProcessorVariant::Terminated,
        disposition: Disposition::InvariantViolated(reason),
    }
}
