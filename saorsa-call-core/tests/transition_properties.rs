//! Property tests over random event traces

use proptest::prelude::*;
use saorsa_call_core::{
    is_valid_transition, CallEvent, CallId, CallMode, CallRegistry, CallState, Dispatcher,
    Disposition, Effect, EventPayload, LocalDeviceStatus, ParticipantId, ParticipantUpdate,
    ProcessorVariant, ReconnectPolicy, ReconnectToken,
};

fn mode_strategy() -> impl Strategy<Value = CallMode> {
    prop_oneof![
        Just(CallMode::OneToOne),
        Just(CallMode::Group),
        Just(CallMode::CallLink),
    ]
}

fn name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("alice".to_string()),
        Just("bob".to_string()),
        Just("carol".to_string()),
    ]
}

fn update_strategy() -> impl Strategy<Value = ParticipantUpdate> {
    (name_strategy(), 0u8..3).prop_map(|(name, status)| match status {
        0 => ParticipantUpdate::joining(name.as_str()),
        1 => ParticipantUpdate::joined(name.as_str()),
        _ => ParticipantUpdate::left(name.as_str()),
    })
}

fn opening_strategy() -> impl Strategy<Value = EventPayload> {
    let peers = prop::collection::vec(name_strategy().prop_map(ParticipantId::new), 0..3);
    (mode_strategy(), peers, any::<bool>()).prop_map(|(mode, participants, outgoing)| {
        if outgoing {
            EventPayload::StartCall { mode, participants }
        } else {
            EventPayload::OfferOrJoinReceived { mode, participants }
        }
    })
}

/// Any event except the release signal, which only the engine produces
fn event_strategy() -> impl Strategy<Value = EventPayload> {
    prop_oneof![
        opening_strategy(),
        Just(EventPayload::NetworkUnavailable),
        prop::collection::vec(update_strategy(), 0..4)
            .prop_map(|updates| EventPayload::MembershipChanged { updates }),
        Just(EventPayload::RequestMembershipUpdate),
        prop_oneof![
            Just(LocalDeviceStatus::audio_only()),
            Just(LocalDeviceStatus::video_call()),
        ]
        .prop_map(|status| EventPayload::LocalDeviceChanged { status }),
        Just(EventPayload::LocalHangup),
        Just(EventPayload::RemoteHangup { reason: None }),
        Just(EventPayload::ConnectedAck),
        Just(EventPayload::ConnectedAck),
        (0u32..4, 0u32..7).prop_map(|(outage, attempt)| EventPayload::ReconnectTimeout {
            token: ReconnectToken { outage, attempt },
        }),
    ]
}

struct Trace {
    states: Vec<CallState>,
    processors: Vec<ProcessorVariant>,
    dispositions: Vec<Disposition>,
    teardowns: usize,
}

fn run_trace(opening: EventPayload, events: Vec<EventPayload>, policy: ReconnectPolicy) -> Trace {
    let mut registry = CallRegistry::new(Dispatcher::new(policy), 1);
    let call_id = CallId::new();
    let mut trace = Trace {
        states: Vec::new(),
        processors: Vec::new(),
        dispositions: Vec::new(),
        teardowns: 0,
    };

    for payload in std::iter::once(opening).chain(events) {
        let Ok(transition) = registry.handle(&CallEvent::new(call_id, payload)) else {
            continue;
        };
        trace.teardowns += transition
            .effects
            .iter()
            .filter(|request| request.effect == Effect::TeardownMedia)
            .count();
        trace.states.push(transition.state);
        trace.processors.push(transition.processor);
        trace.dispositions.push(transition.disposition);
    }
    trace
}

proptest! {
    #[test]
    fn prop_trace_only_uses_permitted_transitions(
        opening in opening_strategy(),
        events in prop::collection::vec(event_strategy(), 0..40),
    ) {
        let trace = run_trace(opening, events, ReconnectPolicy::default());
        for pair in trace.states.windows(2) {
            let (from, to) = (pair[0].connection_state(), pair[1].connection_state());
            prop_assert!(is_valid_transition(from, to), "{:?} -> {:?}", from, to);
        }
    }

    #[test]
    fn prop_valid_events_never_violate_invariants(
        opening in opening_strategy(),
        events in prop::collection::vec(event_strategy(), 0..40),
    ) {
        let trace = run_trace(opening, events, ReconnectPolicy::default());
        for disposition in &trace.dispositions {
            prop_assert!(
                !matches!(disposition, Disposition::InvariantViolated(_)),
                "{:?}",
                disposition
            );
        }
    }

    #[test]
    fn prop_ever_connected_is_monotonic(
        opening in opening_strategy(),
        events in prop::collection::vec(event_strategy(), 0..40),
    ) {
        let trace = run_trace(opening, events, ReconnectPolicy::default());
        for pair in trace.states.windows(2) {
            prop_assert!(!pair[0].ever_connected() || pair[1].ever_connected());
        }
    }

    #[test]
    fn prop_terminated_is_final(
        opening in opening_strategy(),
        events in prop::collection::vec(event_strategy(), 0..40),
    ) {
        let trace = run_trace(opening, events, ReconnectPolicy::default());
        if let Some(first) = trace.states.iter().position(CallState::is_terminated) {
            for state in &trace.states[first..] {
                prop_assert_eq!(state, &trace.states[first]);
            }
        }
    }

    #[test]
    fn prop_installed_processor_matches_state(
        opening in opening_strategy(),
        events in prop::collection::vec(event_strategy(), 0..40),
    ) {
        let trace = run_trace(opening, events, ReconnectPolicy::default());
        for (state, processor) in trace.states.iter().zip(&trace.processors) {
            prop_assert_eq!(ProcessorVariant::for_state(state), Some(*processor));
        }
    }

    #[test]
    fn prop_outage_counter_never_decreases(
        opening in opening_strategy(),
        events in prop::collection::vec(event_strategy(), 0..40),
    ) {
        let trace = run_trace(opening, events, ReconnectPolicy::default());
        for pair in trace.states.windows(2) {
            prop_assert!(pair[0].outages() <= pair[1].outages());
        }
        for state in &trace.states {
            if let Some(token) = state.pending_reconnect() {
                prop_assert_eq!(token.outage, state.outages());
            }
        }
    }

    #[test]
    fn prop_mode_is_fixed_once_chosen(
        opening in opening_strategy(),
        events in prop::collection::vec(event_strategy(), 0..40),
    ) {
        let trace = run_trace(opening, events, ReconnectPolicy::default());
        if let Some(first) = trace.states.first() {
            for state in &trace.states {
                prop_assert_eq!(state.call_mode(), first.call_mode());
            }
        }
    }

    #[test]
    fn prop_media_torn_down_exactly_once(
        opening in opening_strategy(),
        events in prop::collection::vec(event_strategy(), 0..40),
        max_attempts in 1u32..4,
    ) {
        let policy = ReconnectPolicy { max_attempts, ..ReconnectPolicy::default() };
        let trace = run_trace(opening, events, policy);
        let terminated = trace.states.last().is_some_and(CallState::is_terminated);
        prop_assert_eq!(trace.teardowns, usize::from(terminated));
    }
}
