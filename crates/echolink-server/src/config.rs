//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the TCP transport front-end.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:4100`
    pub listen_addr: SocketAddr,

    /// Filesystem path of the SQLite database. When unset, the
    /// platform-appropriate application data directory is used.
    /// Env: `DB_PATH`
    pub db_path: Option<PathBuf>,

    /// How long a disconnected identity is retained before presence
    /// eviction. Absorbs transport reconnect races without spurious
    /// offline notifications.
    /// Env: `GRACE_PERIOD_SECS`
    /// Default: `5`
    pub grace_period: Duration,

    /// Window within which an identical (connection, sender, body) resend
    /// is treated as a duplicate delivery from upstream retry logic.
    /// Env: `DEDUP_WINDOW_SECS`
    /// Default: `5`
    pub dedup_window: Duration,

    /// How often expired ephemeral invitations are swept.
    /// Env: `SWEEP_INTERVAL_SECS`
    /// Default: `3600`
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], 4100).into(),
            db_path: None,
            grace_period: Duration::from_secs(5),
            dedup_window: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.listen_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid LISTEN_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(secs) = env_secs("GRACE_PERIOD_SECS") {
            config.grace_period = secs;
        }

        if let Some(secs) = env_secs("DEDUP_WINDOW_SECS") {
            config.dedup_window = secs;
        }

        if let Some(secs) = env_secs("SWEEP_INTERVAL_SECS") {
            config.sweep_interval = secs;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid duration, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, ([0, 0, 0, 0], 4100).into());
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.dedup_window, Duration::from_secs(5));
        assert!(config.db_path.is_none());
    }
}
