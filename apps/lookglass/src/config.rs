use std::env;
use std::str::FromStr;
#[cfg(test)]
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use lookglass_bridge::TransportConfig;
use lookglass_replica::StoreConfig;

pub const FLUSH_CEILING_VAR: &str = "LOOKGLASS_FLUSH_CEILING_MS";
pub const FLUSH_MULTIPLIER_VAR: &str = "LOOKGLASS_FLUSH_MULTIPLIER";
pub const HANDSHAKE_INTERVAL_VAR: &str = "LOOKGLASS_HANDSHAKE_INTERVAL_MS";
pub const HANDSHAKE_ATTEMPTS_VAR: &str = "LOOKGLASS_HANDSHAKE_ATTEMPTS";

/// Tuning for the replay binary. Unset variables keep the library defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub transport: TransportConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        if let Some(ms) = read_var::<u64>(FLUSH_CEILING_VAR)? {
            config.transport.max_flush_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = read_var::<u32>(FLUSH_MULTIPLIER_VAR)? {
            config.transport.flush_multiplier = multiplier;
        }
        if let Some(ms) = read_var::<u64>(HANDSHAKE_INTERVAL_VAR)? {
            config.store.handshake_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = read_var::<u32>(HANDSHAKE_ATTEMPTS_VAR)? {
            config.store.handshake_attempts = attempts;
        }
        Ok(config)
    }
}

fn read_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {name}={raw:?}")),
        Err(_) => Ok(None),
    }
}
