//! Permitted connection state transitions
//!
//! ```text
//!     Idle
//!      │ start (1:1)          start (group, link) / offer / join
//!      ▼                                   │
//!   Dialing ──── answer ────► Connecting ◄─┘
//!      │                          │ connected ack
//!      │                          ▼
//!      │                      Connected ◄──────────────┐
//!      │                          │ network loss       │ re-join ack
//!      │                          ▼                    │
//!      │        NetworkUnavailable / Reconnecting ─────┘
//!      │                          │
//!      ▼                          ▼
//!   Terminated ◄──── hangup, give up, pre-join loss
//! ```

use crate::types::ConnectionState;

/// Check whether `from -> to` is allowed
///
/// Staying in the same state is always allowed.
#[must_use]
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    from == to
        || matches!(
            (from, to),
            // Starting a call
            (Idle, Dialing)
                | (Idle, Connecting)
                // Progressing through call setup
                | (Dialing, Connecting)
                | (Connecting, Connected)
                // Losing and regaining connectivity
                | (Connected, NetworkUnavailable)
                | (Connected, Reconnecting)
                | (NetworkUnavailable, Connected)
                | (Reconnecting, Connected)
                // Ending a call
                | (Dialing, Terminated)
                | (Connecting, Terminated)
                | (Connected, Terminated)
                | (NetworkUnavailable, Terminated)
                | (Reconnecting, Terminated)
        )
}
