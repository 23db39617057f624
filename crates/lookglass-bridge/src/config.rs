use std::time::Duration;

pub const DEFAULT_FLUSH_MULTIPLIER: u32 = 3;
pub const DEFAULT_MAX_FLUSH_DELAY: Duration = Duration::from_millis(500);

/// Tuning for the adaptive flush timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// The next flush waits this many times as long as the previous one took.
    pub flush_multiplier: u32,
    /// Upper bound on that wait, however slow the channel is.
    pub max_flush_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            flush_multiplier: DEFAULT_FLUSH_MULTIPLIER,
            max_flush_delay: DEFAULT_MAX_FLUSH_DELAY,
        }
    }
}

impl TransportConfig {
    pub fn flush_delay(&self, last_flush: Duration) -> Duration {
        last_flush
            .saturating_mul(self.flush_multiplier)
            .min(self.max_flush_delay)
    }
}
