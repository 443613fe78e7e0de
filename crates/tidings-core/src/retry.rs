use std::time::Duration;

const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Timing policy for the push channel: fixed reconnect delay plus keepalive interval.
///
/// Reconnection is unconditional while the session is live, so there is no attempt cap
/// and no exponential growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    reconnect_delay_ms: u64,
    heartbeat_interval_ms: u64,
}

impl ReconnectPolicy {
    pub fn new(reconnect_delay_ms: u64, heartbeat_interval_ms: u64) -> Self {
        Self {
            reconnect_delay_ms,
            heartbeat_interval_ms: heartbeat_interval_ms.max(1),
        }
    }

    pub fn reconnect_delay_ms(&self) -> u64 {
        self.reconnect_delay_ms
    }

    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.heartbeat_interval_ms
    }

    /// Delay before reconnect attempt `attempt`; the same for every attempt.
    pub fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY_MS, DEFAULT_HEARTBEAT_INTERVAL_MS)
    }
}
