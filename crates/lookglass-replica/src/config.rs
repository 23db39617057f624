use std::time::Duration;

pub const DEFAULT_HANDSHAKE_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 100;

/// Connection handshake tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Delay between capability requests.
    pub handshake_interval: Duration,
    /// Requests sent before the connection is declared failed.
    pub handshake_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            handshake_interval: DEFAULT_HANDSHAKE_INTERVAL,
            handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
        }
    }
}
