//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect backoff for degraded calls
///
/// Attempt `n` (1-based) waits `initial_delay_ms * multiplier^(n-1)`, capped at
/// `max_delay_ms`. When the timer for attempt `max_attempts` fires without the
/// call having reconnected, the call is terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Timers scheduled before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub initial_delay_ms: u64,
    /// Upper bound on any delay
    pub max_delay_ms: u64,
    /// Growth factor between attempts
    pub multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 16_000,
            multiplier: 2,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before `attempt` fires
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(exponent);
        let millis = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms.max(self.initial_delay_ms));
        Duration::from_millis(millis)
    }

    /// Whether another attempt may follow `attempt`
    #[must_use]
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Call engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallEngineConfig {
    /// Maximum concurrent calls
    pub max_concurrent_calls: usize,
    /// Capacity of the inbound event queue
    pub event_buffer_size: usize,
    /// Capacity of the update broadcast channel
    pub update_buffer_size: usize,
    /// Reconnect backoff
    pub reconnect: ReconnectPolicy,
}

impl Default for CallEngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 10,
            event_buffer_size: 256,
            update_buffer_size: 100,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(9), Duration::from_secs(16));
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let policy = ReconnectPolicy {
            max_attempts: 100,
            initial_delay_ms: u64::MAX / 2,
            max_delay_ms: u64::MAX,
            multiplier: 10,
        };
        assert_eq!(policy.delay_for(64), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_retry_limit() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows_retry_after(4));
        assert!(!policy.allows_retry_after(5));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: CallEngineConfig =
            serde_json::from_str(r#"{"max_concurrent_calls": 2, "reconnect": {"max_attempts": 1}}"#)
                .unwrap();
        assert_eq!(config.max_concurrent_calls, 2);
        assert_eq!(config.reconnect.max_attempts, 1);
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);
        assert_eq!(config.event_buffer_size, 256);
    }
}
