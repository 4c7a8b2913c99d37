//! Built-in demo scenarios

use saorsa_call_core::prelude::*;
use std::time::Duration;

/// Demo scenario selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// Outgoing one-to-one call, answered, video turned on, hung up
    OneToOne,
    /// Incoming group call with a roster change and a remote hangup
    Group,
    /// Call link that loses the network and comes back
    CallLinkReconnect,
    /// Call link that loses the network before it ever connected
    CallLinkPreJoinLoss,
    /// Group call that never gets its network back
    ReconnectGiveUp,
}

/// One step of a scenario
#[derive(Debug, Clone)]
pub enum DemoStep {
    /// Deliver an event and wait for it to be dispatched
    Deliver(CallEvent),
    /// Let effects and timers run
    Wait(Duration),
}

impl Scenario {
    /// Steps for call `call_id`, with `peer` as the remote party
    pub fn steps(self, call_id: CallId, peer: &str) -> Vec<DemoStep> {
        use DemoStep::{Deliver, Wait};
        let settle = Wait(Duration::from_millis(100));
        let peers = vec![ParticipantId::new(peer)];

        match self {
            Scenario::OneToOne => vec![
                Deliver(CallEvent::start_call(call_id, CallMode::OneToOne, peers)),
                settle.clone(),
                Deliver(CallEvent::offer_or_join(call_id, CallMode::OneToOne, vec![])),
                Deliver(CallEvent::connected_ack(call_id)),
                settle.clone(),
                Deliver(CallEvent::new(
                    call_id,
                    EventPayload::LocalDeviceChanged {
                        status: LocalDeviceStatus::video_call(),
                    },
                )),
                settle.clone(),
                Deliver(CallEvent::local_hangup(call_id)),
                settle,
            ],
            Scenario::Group => vec![
                Deliver(CallEvent::offer_or_join(call_id, CallMode::Group, peers)),
                settle.clone(),
                Deliver(CallEvent::connected_ack(call_id)),
                settle.clone(),
                Deliver(CallEvent::membership_changed(
                    call_id,
                    vec![ParticipantUpdate::left(peer)],
                )),
                Deliver(CallEvent::new(call_id, EventPayload::RequestMembershipUpdate)),
                settle.clone(),
                Deliver(CallEvent::new(
                    call_id,
                    EventPayload::RemoteHangup {
                        reason: Some("host ended the call".to_string()),
                    },
                )),
                settle,
            ],
            Scenario::CallLinkReconnect => vec![
                Deliver(CallEvent::start_call(call_id, CallMode::CallLink, vec![])),
                settle.clone(),
                Deliver(CallEvent::connected_ack(call_id)),
                settle.clone(),
                Deliver(CallEvent::network_unavailable(call_id)),
                Wait(Duration::from_millis(800)),
                Deliver(CallEvent::connected_ack(call_id)),
                settle.clone(),
                Deliver(CallEvent::local_hangup(call_id)),
                settle,
            ],
            Scenario::CallLinkPreJoinLoss => vec![
                Deliver(CallEvent::start_call(call_id, CallMode::CallLink, vec![])),
                settle.clone(),
                Deliver(CallEvent::network_unavailable(call_id)),
                settle,
            ],
            Scenario::ReconnectGiveUp => vec![
                Deliver(CallEvent::start_call(call_id, CallMode::Group, peers)),
                settle.clone(),
                Deliver(CallEvent::connected_ack(call_id)),
                settle,
                Deliver(CallEvent::network_unavailable(call_id)),
            ],
        }
    }
}

/// Reconnect policy short enough for an interactive demo
pub fn demo_config() -> CallEngineConfig {
    CallEngineConfig {
        reconnect: ReconnectPolicy {
            max_attempts: 4,
            initial_delay_ms: 250,
            max_delay_ms: 1_000,
            multiplier: 2,
        },
        ..CallEngineConfig::default()
    }
}
