//! Interactor boundary
//!
//! The interactor performs the I/O processors ask for: signaling, media
//! teardown and roster queries. It never touches call state. Its results come
//! back to the state machine as ordinary events through the engine.

use crate::effect::{Effect, EffectRequest, OutboundSignal};
use crate::participant::ParticipantUpdate;
use crate::types::CallId;
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

/// Interactor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InteractorError {
    /// Signaling message could not be delivered
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Media could not be released
    #[error("Media error: {0}")]
    Media(String),

    /// Roster could not be fetched
    #[error("Membership query failed: {0}")]
    Membership(String),
}

/// Executes effect requests on behalf of the state machine
#[async_trait]
pub trait Interactor: Send + Sync {
    /// Send a signaling message for a call
    async fn send_signal(&self, call_id: CallId, signal: OutboundSignal)
        -> Result<(), InteractorError>;

    /// Release all media held for a call
    async fn teardown_media(&self, call_id: CallId) -> Result<(), InteractorError>;

    /// Fetch the roster of a group call or call link
    async fn query_membership(
        &self,
        call_id: CallId,
    ) -> Result<Vec<ParticipantUpdate>, InteractorError>;
}

/// Interactor that records every request and answers from canned data
///
/// Timers never reach the interactor, so recorded effects are only
/// `SendSignal`, `TeardownMedia` and `QueryMembership`.
#[derive(Debug, Default)]
pub struct RecordingInteractor {
    requests: Mutex<Vec<EffectRequest>>,
    roster: Mutex<Vec<ParticipantUpdate>>,
    fail_signals: Mutex<bool>,
}

impl RecordingInteractor {
    /// Create an interactor with an empty roster that accepts every signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer future roster queries with `updates`
    pub fn set_roster(&self, updates: Vec<ParticipantUpdate>) {
        *self.roster.lock() = updates;
    }

    /// Make future `send_signal` calls fail
    pub fn fail_signals(&self, fail: bool) {
        *self.fail_signals.lock() = fail;
    }

    /// All requests so far, in execution order
    pub fn requests(&self) -> Vec<EffectRequest> {
        self.requests.lock().clone()
    }

    /// Requests made for one call, in execution order
    pub fn requests_for(&self, call_id: CallId) -> Vec<Effect> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.call_id == call_id)
            .map(|r| r.effect.clone())
            .collect()
    }

    /// Signals sent for one call
    pub fn signals_for(&self, call_id: CallId) -> Vec<OutboundSignal> {
        self.requests_for(call_id)
            .into_iter()
            .filter_map(|effect| match effect {
                Effect::SendSignal { signal } => Some(signal),
                _ => None,
            })
            .collect()
    }

    /// Number of teardowns requested for one call
    pub fn teardowns_for(&self, call_id: CallId) -> usize {
        self.requests_for(call_id)
            .iter()
            .filter(|effect| **effect == Effect::TeardownMedia)
            .count()
    }

    fn record(&self, call_id: CallId, effect: Effect) {
        self.requests.lock().push(EffectRequest::new(call_id, effect));
    }
}

#[async_trait]
impl Interactor for RecordingInteractor {
    async fn send_signal(
        &self,
        call_id: CallId,
        signal: OutboundSignal,
    ) -> Result<(), InteractorError> {
        self.record(call_id, Effect::signal(signal));
        if *self.fail_signals.lock() {
            return Err(InteractorError::Signaling("network unreachable".to_string()));
        }
        Ok(())
    }

    async fn teardown_media(&self, call_id: CallId) -> Result<(), InteractorError> {
        self.record(call_id, Effect::TeardownMedia);
        Ok(())
    }

    async fn query_membership(
        &self,
        call_id: CallId,
    ) -> Result<Vec<ParticipantUpdate>, InteractorError> {
        self.record(call_id, Effect::QueryMembership);
        Ok(self.roster.lock().clone())
    }
}
