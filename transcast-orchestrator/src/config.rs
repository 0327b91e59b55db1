//! Orchestrator configuration
//!
//! HTTP, registry and pipeline defaults, plus the runner settings the
//! orchestrator hands to its supervisor.

use std::time::Duration;
use transcast_core::domain::pipeline::DEFAULT_TTL_SECONDS;
use transcast_core::parser::ParseOptions;
use transcast_core::ports::DEFAULT_SEARCH_WINDOW;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address
    pub bind_addr: String,

    /// Registry database URL
    pub database_url: String,

    /// Default destination host of UDP broadcast outputs
    pub broadcast_addr: String,

    /// How long to search for a free ephemeral port
    pub port_search_window: Duration,

    /// Pause between stopping outputs and reporting on them
    pub stop_grace: Duration,

    /// ttl in seconds applied when a request omits it
    pub default_ttl: u64,

    pub runner: transcast_runner::Config,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - TRANSCAST_BIND_ADDR (optional, default: 0.0.0.0:5552)
    /// - DATABASE_URL (optional, default: sqlite://transcast.db)
    /// - TRANSCAST_BROADCAST_ADDR (optional, default: 127.0.0.1)
    /// - TRANSCAST_PORT_SEARCH_SECS (optional, default: 60)
    /// - TRANSCAST_STOP_GRACE_MS (optional, default: 2000)
    /// - TRANSCAST_DEFAULT_TTL (optional, seconds, default: 300)
    ///
    /// Runner variables are read by [`transcast_runner::Config::from_env`].
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr = std::env::var("TRANSCAST_BIND_ADDR").unwrap_or(defaults.bind_addr);
        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);
        let broadcast_addr =
            std::env::var("TRANSCAST_BROADCAST_ADDR").unwrap_or(defaults.broadcast_addr);

        let port_search_window = match std::env::var("TRANSCAST_PORT_SEARCH_SECS") {
            Ok(s) => Duration::from_secs(s.parse::<u64>().map_err(|_| {
                anyhow::anyhow!("TRANSCAST_PORT_SEARCH_SECS must be a number of seconds")
            })?),
            Err(_) => defaults.port_search_window,
        };

        let stop_grace = match std::env::var("TRANSCAST_STOP_GRACE_MS") {
            Ok(s) => Duration::from_millis(s.parse::<u64>().map_err(|_| {
                anyhow::anyhow!("TRANSCAST_STOP_GRACE_MS must be a number of milliseconds")
            })?),
            Err(_) => defaults.stop_grace,
        };

        let default_ttl = match std::env::var("TRANSCAST_DEFAULT_TTL") {
            Ok(s) => s
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("TRANSCAST_DEFAULT_TTL must be a number of seconds"))?,
            Err(_) => defaults.default_ttl,
        };

        Ok(Self {
            bind_addr,
            database_url,
            broadcast_addr,
            port_search_window,
            stop_grace,
            default_ttl,
            runner: transcast_runner::Config::from_env()?,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.database_url.is_empty() {
            anyhow::bail!("database_url cannot be empty");
        }

        if self.broadcast_addr.is_empty() {
            anyhow::bail!("broadcast_addr cannot be empty");
        }

        if self.port_search_window.is_zero() {
            anyhow::bail!("port_search_window must be greater than 0");
        }

        self.runner.validate()
    }

    /// Parser options derived from this configuration
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            default_ttl: self.default_ttl,
            broadcast_addr: self.broadcast_addr.clone(),
        }
    }

    /// Upper bound on how long a purge waits for cleanup
    pub fn purge_timeout(&self) -> Duration {
        self.runner.kill_timeout + self.stop_grace
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5552".to_string(),
            database_url: "sqlite://transcast.db".to_string(),
            broadcast_addr: "127.0.0.1".to_string(),
            port_search_window: DEFAULT_SEARCH_WINDOW,
            stop_grace: Duration::from_secs(2),
            default_ttl: DEFAULT_TTL_SECONDS,
            runner: transcast_runner::Config::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "0.0.0.0:5552");
        assert_eq!(config.default_ttl, 300);
        assert_eq!(config.stop_grace, Duration::from_secs(2));
        assert_eq!(config.purge_timeout(), Duration::from_secs(7));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.database_url = String::new();
        assert!(config.validate().is_err());

        config.database_url = "sqlite::memory:".to_string();
        config.port_search_window = Duration::ZERO;
        assert!(config.validate().is_err());

        config.port_search_window = Duration::from_secs(1);
        config.runner.encoder = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_options_follow_config() {
        let config = Config {
            default_ttl: 0,
            broadcast_addr: "239.0.0.1".to_string(),
            ..Config::default()
        };

        let options = config.parse_options();
        assert_eq!(options.default_ttl, 0);
        assert_eq!(options.broadcast_addr, "239.0.0.1");
    }
}
