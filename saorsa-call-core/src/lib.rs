//! Saorsa Call - call action processing state machine
//!
//! This library drives a voice/video call through its lifecycle in response
//! to network events, signaling messages and local user actions. It features:
//!
//! - **Processor variants**: one closed set of handlers per call mode and
//!   connectivity, selected from the call state on every event
//! - **Pure dispatch**: operations return new snapshots and effect requests,
//!   never performing I/O themselves
//! - **Invariant checks**: a transition that breaks a call invariant
//!   terminates that call instead of corrupting it
//! - **Async engine**: per-call ordering, reconnect backoff and effect
//!   execution on tokio
//!
//! # Examples
//!
//! ```rust,no_run
//! use saorsa_call_core::{CallEngine, CallEvent, CallId, CallMode, RecordingInteractor};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = CallEngine::builder(Arc::new(RecordingInteractor::new())).build()?;
//!
//! let call_id = CallId::new();
//! engine
//!     .dispatch(CallEvent::start_call(call_id, CallMode::Group, vec![]))
//!     .await?;
//! engine.dispatch(CallEvent::connected_ack(call_id)).await?;
//!
//! let state = engine.snapshot(&call_id);
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Call identifiers, modes and connectivity
pub mod types;

/// Call participants and membership
pub mod participant;

/// Call state snapshot and copy-with-changes builder
pub mod state;

/// Inbound events and boundary validation
pub mod event;

/// Outbound effect requests
pub mod effect;

/// Engine and reconnect configuration
pub mod config;

/// Permitted connection state transitions
pub mod transition;

/// Processor variants and their operations
pub mod processor;

/// Event dispatch and invariant checking
pub mod dispatcher;

/// Arena of live calls
pub mod registry;

/// Effect execution boundary
pub mod interactor;

/// Async call engine
pub mod engine;

// Re-export main types at crate root
pub use config::{CallEngineConfig, ReconnectPolicy};
pub use dispatcher::{Dispatcher, Disposition, Transition};
pub use effect::{Effect, EffectRequest, OutboundSignal};
pub use engine::{CallEngine, CallEngineBuilder, CallUpdate, EngineError};
pub use event::{CallEvent, EventError, EventKind, EventPayload, RawCallEvent};
pub use interactor::{Interactor, InteractorError, RecordingInteractor};
pub use participant::{MembershipStatus, ParticipantId, ParticipantUpdate, Participants};
pub use processor::{ProcessorVariant, Step};
pub use registry::{CallRegistry, RegistryError};
pub use state::{CallState, CallStateBuilder, StateError};
pub use transition::is_valid_transition;
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{CallEngineConfig, ReconnectPolicy};
    pub use crate::dispatcher::{Dispatcher, Disposition, Transition};
    pub use crate::effect::{Effect, OutboundSignal};
    pub use crate::engine::{CallEngine, CallUpdate};
    pub use crate::event::{CallEvent, EventKind, EventPayload, RawCallEvent};
    pub use crate::interactor::{Interactor, InteractorError};
    pub use crate::participant::{ParticipantId, ParticipantUpdate};
    pub use crate::processor::ProcessorVariant;
    pub use crate::registry::CallRegistry;
    pub use crate::state::CallState;
    pub use crate::types::{
        CallId, CallMode, ConnectionState, LocalDeviceStatus, ReconnectToken, UnknownCallMode,
    };
}
