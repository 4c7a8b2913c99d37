//! Async call engine
//!
//! One tokio task owns the [`CallRegistry`] and consumes a single event queue,
//! so events for a call are dispatched one at a time in arrival order. Effects
//! are handed to a per-call lane task that runs them in order against the
//! [`Interactor`]; lanes of different calls run concurrently. Anything an
//! effect produces (roster answers, send failures, timer expiries) comes back
//! as an event on the same queue.
//!
//! ```text
//!  submit() ──► queue ──► engine loop ──► registry ──► dispatcher
//!                 ▲            │
//!                 │            ▼ effects
//!                 └──────── call lane ──► interactor
//!                   events     └──► timers
//! ```

use crate::config::CallEngineConfig;
use crate::dispatcher::{Dispatcher, Disposition, Transition};
use crate::effect::{Effect, EffectRequest};
use crate::event::{CallEvent, EventError, EventKind, EventPayload, RawCallEvent};
use crate::interactor::Interactor;
use crate::processor::ProcessorVariant;
use crate::registry::{CallRegistry, RegistryError};
use crate::state::CallState;
use crate::types::{CallId, ReconnectToken};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Raw event failed boundary validation
    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] EventError),

    /// Registry refused the event
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Engine loop is not running
    #[error("Call engine is not running")]
    ChannelClosed,

    /// No tokio runtime to spawn the engine on
    #[error("Call engine must be built inside a tokio runtime")]
    NoRuntime,
}

/// Observable change in the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallUpdate {
    /// An operation was applied
    Transitioned {
        /// Call
        call_id: CallId,
        /// Event that caused it
        event: EventKind,
        /// Processor before
        from: Option<ProcessorVariant>,
        /// Processor after
        to: ProcessorVariant,
        /// Snapshot after
        state: CallState,
        /// When it happened
        at: DateTime<Utc>,
    },
    /// The registry refused an event
    Rejected {
        /// Call the event was addressed to
        call_id: CallId,
        /// Refused event
        event: EventKind,
        /// Why
        reason: String,
        /// When it happened
        at: DateTime<Utc>,
    },
    /// A call was forced to `Terminated`
    InvariantViolated {
        /// Call
        call_id: CallId,
        /// Broken invariant
        reason: String,
        /// When it happened
        at: DateTime<Utc>,
    },
    /// A call left the registry
    Released {
        /// Call
        call_id: CallId,
        /// When it happened
        at: DateTime<Utc>,
    },
}

impl CallUpdate {
    /// Call the update is about
    pub fn call_id(&self) -> CallId {
        match self {
            Self::Transitioned { call_id, .. }
            | Self::Rejected { call_id, .. }
            | Self::InvariantViolated { call_id, .. }
            | Self::Released { call_id, .. } => *call_id,
        }
    }

    /// When the update was produced
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Transitioned { at, .. }
            | Self::Rejected { at, .. }
            | Self::InvariantViolated { at, .. }
            | Self::Released { at, .. } => *at,
        }
    }
}

type Reply = oneshot::Sender<Result<Transition, RegistryError>>;

enum Command {
    Event {
        event: CallEvent,
        reply: Option<Reply>,
    },
    Shutdown,
}

/// Handle to a running call engine
pub struct CallEngine {
    commands: mpsc::Sender<Command>,
    snapshots: Arc<RwLock<HashMap<CallId, CallState>>>,
    updates: broadcast::Sender<CallUpdate>,
    task: Mutex<Option<JoinHandle<()>>>,
    config: CallEngineConfig,
}

impl CallEngine {
    /// Start building an engine around `interactor`
    #[must_use]
    pub fn builder(interactor: Arc<dyn Interactor>) -> CallEngineBuilder {
        CallEngineBuilder::new(interactor)
    }

    fn start(
        interactor: Arc<dyn Interactor>,
        config: CallEngineConfig,
    ) -> Result<Self, EngineError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let (commands, receiver) = mpsc::channel(config.event_buffer_size.max(1));
        let (updates, _) = broadcast::channel(config.update_buffer_size.max(1));
        let snapshots = Arc::new(RwLock::new(HashMap::new()));

        let engine_loop = EngineLoop {
            registry: CallRegistry::new(
                Dispatcher::new(config.reconnect.clone()),
                config.max_concurrent_calls,
            ),
            interactor,
            commands: receiver,
            injector: commands.downgrade(),
            lanes: HashMap::new(),
            retired: Vec::new(),
            snapshots: snapshots.clone(),
            updates: updates.clone(),
        };
        let task = runtime.spawn(engine_loop.run());

        tracing::info!(
            max_concurrent_calls = config.max_concurrent_calls,
            max_reconnect_attempts = config.reconnect.max_attempts,
            "Call engine started"
        );

        Ok(Self {
            commands,
            snapshots,
            updates,
            task: Mutex::new(Some(task)),
            config,
        })
    }

    /// Queue an event without waiting for it to be dispatched
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] if the engine has stopped.
    #[tracing::instrument(skip(self, event), fields(call_id = %event.call_id, event = %event.kind()))]
    pub async fn submit(&self, event: CallEvent) -> Result<(), EngineError> {
        self.commands
            .send(Command::Event { event, reply: None })
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Validate a wire event and queue it
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidEvent`] if the event is malformed and
    /// [`EngineError::ChannelClosed`] if the engine has stopped.
    #[tracing::instrument(skip(self, raw), fields(kind = %raw.kind))]
    pub async fn submit_raw(&self, raw: RawCallEvent) -> Result<(), EngineError> {
        let event = CallEvent::try_from(raw).map_err(|e| {
            tracing::warn!(error = %e, "Rejecting malformed event");
            e
        })?;
        self.submit(event).await
    }

    /// Queue an event and wait until it has been dispatched
    ///
    /// Effects of the transition may still be running when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Registry`] if the registry refused the event and
    /// [`EngineError::ChannelClosed`] if the engine has stopped.
    #[tracing::instrument(skip(self, event), fields(call_id = %event.call_id, event = %event.kind()))]
    pub async fn dispatch(&self, event: CallEvent) -> Result<Transition, EngineError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Event {
                event,
                reply: Some(reply),
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let result = response.await.map_err(|_| EngineError::ChannelClosed)?;
        Ok(result?)
    }

    /// Copy of a call's current snapshot
    pub fn snapshot(&self, call_id: &CallId) -> Option<CallState> {
        self.snapshots.read().get(call_id).cloned()
    }

    /// Calls currently registered
    pub fn active_calls(&self) -> Vec<CallId> {
        self.snapshots.read().keys().copied().collect()
    }

    /// Subscribe to call updates
    pub fn subscribe(&self) -> broadcast::Receiver<CallUpdate> {
        self.updates.subscribe()
    }

    /// Configuration the engine runs with
    pub fn config(&self) -> &CallEngineConfig {
        &self.config
    }

    /// Stop the engine loop and wait for every call lane to finish
    ///
    /// Outstanding reconnect timers are cancelled. Calling this twice is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        tracing::info!("Shutting down call engine");
        if self.commands.send(Command::Shutdown).await.is_err() {
            tracing::debug!("Engine loop already stopped");
        }
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Engine loop task failed");
        }
    }
}

/// Call engine builder
pub struct CallEngineBuilder {
    interactor: Arc<dyn Interactor>,
    config: CallEngineConfig,
}

impl CallEngineBuilder {
    /// Create new builder
    #[must_use]
    pub fn new(interactor: Arc<dyn Interactor>) -> Self {
        Self {
            interactor,
            config: CallEngineConfig::default(),
        }
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: CallEngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the engine on the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoRuntime`] when called outside a tokio runtime.
    pub fn build(self) -> Result<CallEngine, EngineError> {
        CallEngine::start(self.interactor, self.config)
    }
}

struct EngineLoop {
    registry: CallRegistry,
    interactor: Arc<dyn Interactor>,
    commands: mpsc::Receiver<Command>,
    injector: mpsc::WeakSender<Command>,
    lanes: HashMap<CallId, Lane>,
    retired: Vec<JoinHandle<()>>,
    snapshots: Arc<RwLock<HashMap<CallId, CallState>>>,
    updates: broadcast::Sender<CallUpdate>,
}

impl EngineLoop {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Event { event, reply } => {
                    let result = self.handle(&event);
                    if let Some(reply) = reply {
                        // Caller may have stopped waiting
                        let _ = reply.send(result);
                    }
                }
                Command::Shutdown => break,
            }
        }
        self.close().await;
        tracing::info!("Call engine stopped");
    }

    fn handle(&mut self, event: &CallEvent) -> Result<Transition, RegistryError> {
        let call_id = event.call_id;
        let transition = match self.registry.handle(event) {
            Ok(transition) => transition,
            Err(e) => {
                tracing::debug!(call_id = %call_id, event = %event.kind(), error = %e, "Event rejected");
                self.publish(CallUpdate::Rejected {
                    call_id,
                    event: event.kind(),
                    reason: e.to_string(),
                    at: Utc::now(),
                });
                return Err(e);
            }
        };

        match &transition.disposition {
            Disposition::Applied => self.publish(CallUpdate::Transitioned {
                call_id,
                event: event.kind(),
                from: transition.previous,
                to: transition.processor,
                state: transition.state.clone(),
                at: Utc::now(),
            }),
            Disposition::Ignored => {}
            Disposition::InvariantViolated(reason) => self.publish(CallUpdate::InvariantViolated {
                call_id,
                reason: reason.clone(),
                at: Utc::now(),
            }),
        }

        if self.registry.contains(&call_id) {
            self.snapshots
                .write()
                .insert(call_id, transition.state.clone());
        } else {
            self.snapshots.write().remove(&call_id);
            self.publish(CallUpdate::Released {
                call_id,
                at: Utc::now(),
            });
        }

        let terminated = transition.state.is_terminated()
            && transition.previous != Some(ProcessorVariant::Terminated);
        if terminated || !transition.effects.is_empty() {
            self.route(call_id, transition.effects.clone(), terminated);
        }

        Ok(transition)
    }

    fn route(&mut self, call_id: CallId, effects: Vec<EffectRequest>, terminated: bool) {
        let interactor = &self.interactor;
        let injector = &self.injector;
        let lane = self
            .lanes
            .entry(call_id)
            .or_insert_with(|| Lane::spawn(call_id, interactor.clone(), injector.clone()));
        if lane.batches.send(Batch { effects, terminated }).is_err() {
            tracing::warn!(call_id = %call_id, "Call lane stopped, dropping effects");
        }

        if terminated {
            if let Some(lane) = self.lanes.remove(&call_id) {
                self.retired.push(lane.task);
            }
        }
        self.retired.retain(|task| !task.is_finished());
    }

    fn publish(&self, update: CallUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    async fn close(&mut self) {
        self.commands.close();
        let tasks: Vec<JoinHandle<()>> = self
            .lanes
            .drain()
            .map(|(_, lane)| lane.task)
            .chain(self.retired.drain(..))
            .collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Call lane task failed");
            }
        }
    }
}

struct Batch {
    effects: Vec<EffectRequest>,
    terminated: bool,
}

/// Ordered effect executor for one call
struct Lane {
    batches: mpsc::UnboundedSender<Batch>,
    task: JoinHandle<()>,
}

impl Lane {
    fn spawn(
        call_id: CallId,
        interactor: Arc<dyn Interactor>,
        injector: mpsc::WeakSender<Command>,
    ) -> Self {
        let (batches, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_lane(call_id, interactor, injector, receiver));
        Self { batches, task }
    }
}

async fn run_lane(
    call_id: CallId,
    interactor: Arc<dyn Interactor>,
    injector: mpsc::WeakSender<Command>,
    mut batches: mpsc::UnboundedReceiver<Batch>,
) {
    let mut timers: Vec<JoinHandle<()>> = Vec::new();

    while let Some(batch) = batches.recv().await {
        timers.retain(|timer| !timer.is_finished());

        for request in batch.effects {
            match request.effect {
                Effect::SendSignal { signal } => {
                    if let Err(e) = interactor.send_signal(call_id, signal).await {
                        tracing::warn!(call_id = %call_id, error = %e, "Signal send failed");
                        inject(&injector, CallEvent::network_unavailable(call_id)).await;
                    }
                }
                Effect::TeardownMedia => {
                    if let Err(e) = interactor.teardown_media(call_id).await {
                        tracing::warn!(call_id = %call_id, error = %e, "Media teardown failed");
                    }
                }
                Effect::QueryMembership => match interactor.query_membership(call_id).await {
                    Ok(updates) => {
                        inject(&injector, CallEvent::membership_changed(call_id, updates)).await;
                    }
                    Err(e) => {
                        tracing::warn!(call_id = %call_id, error = %e, "Membership query failed");
                    }
                },
                Effect::ScheduleTimer { delay, token } => {
                    timers.push(spawn_timer(call_id, delay, token, injector.clone()));
                }
            }
        }

        if batch.terminated {
            break;
        }
    }

    for timer in &timers {
        timer.abort();
    }
    if !timers.is_empty() {
        tracing::debug!(call_id = %call_id, cancelled = timers.len(), "Cancelled reconnect timers");
    }
    inject(
        &injector,
        CallEvent::new(call_id, EventPayload::CallConcluded),
    )
    .await;
}

fn spawn_timer(
    call_id: CallId,
    delay: Duration,
    token: ReconnectToken,
    injector: mpsc::WeakSender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        tracing::debug!(
            call_id = %call_id,
            outage = token.outage,
            attempt = token.attempt,
            "Reconnect timer fired"
        );
        inject(&injector, CallEvent::reconnect_timeout(call_id, token)).await;
    })
}

async fn inject(injector: &mpsc::WeakSender<Command>, event: CallEvent) {
    let Some(commands) = injector.upgrade() else {
        return;
    };
    let kind = event.kind();
    if commands
        .send(Command::Event { event, reply: None })
        .await
        .is_err()
    {
        tracing::debug!(event = %kind, "Engine stopped, dropping event");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::interactor::RecordingInteractor;
    use crate::types::CallMode;

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = CallEngine::builder(Arc::new(RecordingInteractor::new())).build();
        assert!(matches!(result, Err(EngineError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_dispatch_and_snapshot() {
        let engine = CallEngine::builder(Arc::new(RecordingInteractor::new()))
            .build()
            .unwrap();
        let call_id = CallId::new();

        let transition = engine
            .dispatch(CallEvent::start_call(call_id, CallMode::Group, vec![]))
            .await
            .unwrap();
        assert_eq!(transition.processor, ProcessorVariant::GroupConnecting);
        assert_eq!(engine.snapshot(&call_id), Some(transition.state));
        assert_eq!(engine.active_calls(), vec![call_id]);

        engine.shutdown().await;
        assert_eq!(
            engine.submit(CallEvent::local_hangup(call_id)).await,
            Err(EngineError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn test_submit_raw_rejects_malformed_event() {
        let engine = CallEngine::builder(Arc::new(RecordingInteractor::new()))
            .build()
            .unwrap();
        let raw = RawCallEvent {
            kind: "teleport".to_string(),
            call_id: Some(CallId::new().to_string()),
            payload: serde_json::Value::Null,
        };

        let result = engine.submit_raw(raw).await;
        assert_eq!(
            result,
            Err(EngineError::InvalidEvent(EventError::UnknownKind(
                "teleport".to_string()
            )))
        );
        engine.shutdown().await;
    }
}
