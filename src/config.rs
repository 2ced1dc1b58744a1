//! Session configuration.
//!
//! All parameters are plain construction values; the serde derives exist so
//! a deployment can deserialize the whole block from its own TOML config,
//! but the core never reads the filesystem.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Connection and identity parameters for one session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Server host name or address.
    pub server: String,
    /// Server port (default: 6697).
    #[serde(default = "defaults::port")]
    pub port: u16,
    /// Nickname to register with.
    pub nick: String,
    /// Real name sent in the USER registration.
    #[serde(default = "defaults::realname")]
    pub realname: String,
    /// Nickname-service credential. When set, the session identifies after
    /// registration and treats a missed confirmation as attempt-fatal.
    #[serde(default)]
    pub password: Option<String>,
    /// Channels joined after authentication, in order.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Wrap the connection in TLS (default: true).
    #[serde(default = "defaults::default_true")]
    pub tls: bool,
    /// Nickname-service account trusted for identify/ACC notices.
    #[serde(default = "defaults::service")]
    pub service: String,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Upper bound on concurrently running command callbacks.
    #[serde(default = "defaults::callback_workers")]
    pub callback_workers: usize,
}

impl SessionConfig {
    /// Minimal configuration: everything else at its default.
    pub fn new(server: impl Into<String>, nick: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: defaults::port(),
            nick: nick.into(),
            realname: defaults::realname(),
            password: None,
            channels: Vec::new(),
            tls: defaults::default_true(),
            service: defaults::service(),
            timeouts: TimeoutsConfig::default(),
            retry: RetryConfig::default(),
            callback_workers: defaults::callback_workers(),
        }
    }

    /// Parse a configuration block from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

/// Bounds on the session's suspension points, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    /// Socket connect (and TLS handshake) bound.
    #[serde(default = "defaults::connect_secs")]
    pub connect: u64,
    /// Read idle bound; no traffic for this long fails the connection.
    #[serde(default = "defaults::read_secs")]
    pub read: u64,
    /// Identify-confirmation wait bound.
    #[serde(default = "defaults::auth_secs")]
    pub auth: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect: defaults::connect_secs(),
            read: defaults::read_secs(),
            auth: defaults::auth_secs(),
        }
    }
}

impl TimeoutsConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read)
    }

    pub fn auth(&self) -> Duration {
        Duration::from_secs(self.auth)
    }
}

/// Reconnect backoff policy: `initial * factor^attempt`, capped at `max`.
///
/// Attempt numbering starts at zero, so the first retry waits `initial`
/// seconds. `factor = 1` gives the fixed-interval behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "defaults::retry_initial_secs")]
    pub initial: u64,
    #[serde(default = "defaults::retry_max_secs")]
    pub max: u64,
    #[serde(default = "defaults::retry_factor")]
    pub factor: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial: defaults::retry_initial_secs(),
            max: defaults::retry_max_secs(),
            factor: defaults::retry_factor(),
        }
    }
}

impl RetryConfig {
    /// Delay before the given (zero-based) retry attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self
            .initial
            .saturating_mul(self.factor.saturating_pow(attempt));
        Duration::from_secs(secs.min(self.max))
    }
}

mod defaults {
    pub fn port() -> u16 {
        6697
    }

    pub fn realname() -> String {
        "rook session".to_string()
    }

    pub fn default_true() -> bool {
        true
    }

    pub fn service() -> String {
        "NickServ".to_string()
    }

    pub fn callback_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(8)
    }

    pub fn connect_secs() -> u64 {
        30
    }

    pub fn read_secs() -> u64 {
        360
    }

    pub fn auth_secs() -> u64 {
        60
    }

    pub fn retry_initial_secs() -> u64 {
        10
    }

    pub fn retry_max_secs() -> u64 {
        300
    }

    pub fn retry_factor() -> u64 {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_progression() {
        let retry = RetryConfig {
            initial: 10,
            max: 300,
            factor: 2,
        };
        assert_eq!(retry.delay(0), Duration::from_secs(10));
        assert_eq!(retry.delay(1), Duration::from_secs(20));
        assert_eq!(retry.delay(4), Duration::from_secs(160));
        // Capped
        assert_eq!(retry.delay(5), Duration::from_secs(300));
        assert_eq!(retry.delay(60), Duration::from_secs(300));
    }

    #[test]
    fn test_retry_fixed_interval() {
        let retry = RetryConfig {
            initial: 10,
            max: 300,
            factor: 1,
        };
        assert_eq!(retry.delay(0), Duration::from_secs(10));
        assert_eq!(retry.delay(9), Duration::from_secs(10));
    }

    #[test]
    fn test_from_toml_defaults() {
        let cfg = SessionConfig::from_toml(
            r##"
            server = "irc.libera.chat"
            nick = "rookbot"
            channels = ["#rook"]
            "##,
        )
        .unwrap();
        assert_eq!(cfg.port, 6697);
        assert!(cfg.tls);
        assert_eq!(cfg.service, "NickServ");
        assert_eq!(cfg.channels, vec!["#rook".to_string()]);
        assert_eq!(cfg.timeouts.auth, 60);
        assert!(cfg.password.is_none());
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        assert!(SessionConfig::from_toml("server = [").is_err());
    }
}
