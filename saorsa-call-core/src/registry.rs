//! Call registry
//!
//! Arena of live calls keyed by [`CallId`]. Each slot holds the current
//! snapshot and the processor variant installed for it; both are replaced
//! together, once per event. Nothing outside the registry holds a reference
//! into a slot; readers get clones.

use crate::dispatcher::{Dispatcher, Transition};
use crate::event::{CallEvent, EventKind};
use crate::processor::ProcessorVariant;
use crate::state::CallState;
use crate::types::CallId;
use std::collections::HashMap;
use thiserror::Error;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Opening another call would exceed the configured limit
    #[error("Maximum concurrent calls ({0}) reached")]
    CapacityExceeded(usize),

    /// Event for a call that is not (or no longer) registered
    #[error("Call not found: {0}")]
    UnknownCall(CallId),
}

#[derive(Debug, Clone)]
struct CallSlot {
    state: CallState,
    processor: ProcessorVariant,
}

/// Arena of live calls
#[derive(Debug)]
pub struct CallRegistry {
    dispatcher: Dispatcher,
    calls: HashMap<CallId, CallSlot>,
    max_concurrent_calls: usize,
}

impl CallRegistry {
    /// Create an empty registry
    pub fn new(dispatcher: Dispatcher, max_concurrent_calls: usize) -> Self {
        Self {
            dispatcher,
            calls: HashMap::new(),
            max_concurrent_calls,
        }
    }

    /// Dispatch `event` to its call and install the result
    ///
    /// A `CallConcluded` event on a terminated call releases the slot after
    /// dispatch, as does an opening event that leaves the call `Idle`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownCall`] for events addressed to calls
    /// that are not registered, unless the event opens a call, and
    /// [`RegistryError::CapacityExceeded`] when opening one would exceed the
    /// configured limit.
    pub fn handle(&mut self, event: &CallEvent) -> Result<Transition, RegistryError> {
        let call_id = event.call_id;

        if !self.calls.contains_key(&call_id) {
            if !event.kind().opens_call() {
                tracing::debug!(
                    call_id = %call_id,
                    event = %event.kind(),
                    "Event for unknown call"
                );
                return Err(RegistryError::UnknownCall(call_id));
            }
            if self.calls.len() >= self.max_concurrent_calls {
                tracing::warn!(
                    call_id = %call_id,
                    limit = self.max_concurrent_calls,
                    "Rejecting call, registry full"
                );
                return Err(RegistryError::CapacityExceeded(self.max_concurrent_calls));
            }
            tracing::info!(call_id = %call_id, event = %event.kind(), "Registering call");
            self.calls.insert(
                call_id,
                CallSlot {
                    state: CallState::new(call_id),
                    processor: ProcessorVariant::Idle,
                },
            );
        }

        let slot = self
            .calls
            .get_mut(&call_id)
            .ok_or(RegistryError::UnknownCall(call_id))?;
        let transition = self
            .dispatcher
            .dispatch_with(Some(slot.processor), event, &slot.state);

        slot.state = transition.state.clone();
        slot.processor = transition.processor;

        if event.kind() == EventKind::CallConcluded && slot.state.is_terminated() {
            self.calls.remove(&call_id);
            tracing::info!(call_id = %call_id, "Call released");
        } else if slot.processor == ProcessorVariant::Idle {
            // Opening event was not usable; the call never started
            self.calls.remove(&call_id);
            tracing::debug!(call_id = %call_id, "Call never started, released");
        }

        Ok(transition)
    }

    /// Copy of a call's current snapshot
    pub fn snapshot(&self, call_id: &CallId) -> Option<CallState> {
        self.calls.get(call_id).map(|slot| slot.state.clone())
    }

    /// Processor installed for a call
    pub fn processor_for(&self, call_id: &CallId) -> Option<ProcessorVariant> {
        self.calls.get(call_id).map(|slot| slot.processor)
    }

    /// Whether a call is registered
    pub fn contains(&self, call_id: &CallId) -> bool {
        self.calls.contains_key(call_id)
    }

    /// Registered call ids
    pub fn call_ids(&self) -> Vec<CallId> {
        self.calls.keys().copied().collect()
    }

    /// Number of registered calls
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no call is registered
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
