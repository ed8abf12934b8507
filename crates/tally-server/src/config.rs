//! Server configuration.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

/// Configuration for the tally server.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `3000`, `0` auto-assigns).
    pub port: u16,
    /// WebSocket route (default `"/ws"`).
    pub path: String,
    /// Max inbound message size in bytes.
    pub max_payload_length: usize,
    /// Close a socket after this many seconds without an inbound frame. `0` disables.
    pub idle_timeout_secs: u64,
    /// Buffered outbound bytes at which sends report backpressure.
    pub max_backpressure: usize,
    /// Queued responses, and separately commands in flight, a connection may
    /// hold before it is closed.
    pub max_pending: usize,
    /// Delay between accepting an upgrade request and completing it.
    pub upgrade_delay_ms: u64,
    /// How far in the past a command header timestamp may lie.
    pub freshness_window_ms: i64,
    /// Lifetime of issued tokens.
    pub token_ttl_secs: i64,
    /// Balance credited on registration.
    pub initial_balance: i64,
    /// Rounds for the password hasher.
    pub hash_iterations: u32,
    /// Token signing secret. Required.
    #[serde(deserialize_with = "secret")]
    pub jwt_secret: Option<SecretString>,
}

fn secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            path: "/ws".into(),
            max_payload_length: 16 * 1024,
            idle_timeout_secs: 120,
            max_backpressure: 1024 * 1024,
            max_pending: 1024,
            upgrade_delay_ms: 50,
            freshness_window_ms: 500,
            token_ttl_secs: 3600,
            initial_balance: 1000,
            hash_iterations: 10_000,
            jwt_secret: None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("jwt_secret is required")]
    MissingSecret,

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ServerConfig {
    /// Check the values that would otherwise fail late or silently.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.jwt_secret {
            Some(s) if !s.expose_secret().trim().is_empty() => {}
            _ => return Err(ConfigError::MissingSecret),
        }
        if !self.path.starts_with('/') {
            return Err(invalid("path", format!("{:?} must start with '/'", self.path)));
        }
        if self.max_payload_length == 0 {
            return Err(invalid("max_payload_length", "must be positive"));
        }
        if self.max_backpressure == 0 {
            return Err(invalid("max_backpressure", "must be positive"));
        }
        if self.max_pending == 0 {
            return Err(invalid("max_pending", "must be positive"));
        }
        if self.freshness_window_ms <= 0 {
            return Err(invalid("freshness_window_ms", "must be positive"));
        }
        if self.token_ttl_secs <= 0 {
            return Err(invalid("token_ttl_secs", "must be positive"));
        }
        if self.initial_balance < 0 {
            return Err(invalid("initial_balance", "must not be negative"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upgrade_delay(&self) -> Duration {
        Duration::from_millis(self.upgrade_delay_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(SecretString::from(secret.into()));
        self
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
