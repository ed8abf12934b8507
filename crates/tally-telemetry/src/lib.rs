//! Tracing subscriber setup shared by the binary and integration tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub level: String,
    /// Emit one JSON object per line instead of human-readable text.
    pub json: bool,
    /// Per-module level overrides (e.g. "tally_server" => "debug").
    pub modules: BTreeMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

impl TelemetryConfig {
    /// Render the filter directive string, e.g. `info,tally_server=debug`.
    pub fn directives(&self) -> String {
        let mut filter = self.level.to_lowercase();
        for (module, level) in &self.modules {
            filter.push_str(&format!(",{}={}", module, level.to_lowercase()));
        }
        filter
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter {directives:?}: {reason}")]
    InvalidFilter { directives: String, reason: String },
}

/// Returned by [`init_telemetry`]; records what was installed.
#[derive(Debug)]
pub struct TelemetryGuard {
    filter: String,
    installed: bool,
}

impl TelemetryGuard {
    /// The effective filter directives.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// False when another global subscriber was already set.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Initialize the global subscriber. Safe to call more than once; later
/// calls leave the first subscriber in place.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let (env_filter, filter) = match EnvFilter::try_from_default_env() {
        Ok(env) => {
            let rendered = env.to_string();
            (env, rendered)
        }
        Err(_) => {
            let directives = config.directives();
            let env = EnvFilter::try_new(&directives).map_err(|e| TelemetryError::InvalidFilter {
                directives: directives.clone(),
                reason: e.to_string(),
            })?;
            (env, directives)
        }
    };

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .is_ok();

    Ok(TelemetryGuard { filter, installed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives() {
        assert_eq!(TelemetryConfig::default().directives(), "info");
    }

    #[test]
    fn module_overrides_are_appended() {
        let mut config = TelemetryConfig {
            level: "WARN".into(),
            ..Default::default()
        };
        config.modules.insert("tally_server".into(), "DEBUG".into());
        config.modules.insert("tally_engine".into(), "trace".into());
        assert_eq!(config.directives(), "warn,tally_engine=trace,tally_server=debug");
    }

    #[test]
    fn deserializes_partial_config() {
        let config: TelemetryConfig = serde_json::from_str(r#"{"json":true}"#).unwrap();
        assert!(config.json);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn init_is_repeatable() {
        let config = TelemetryConfig::default();
        let first = init_telemetry(&config).unwrap();
        let second = init_telemetry(&config).unwrap();
        assert!(!second.installed() || !first.installed());
    }
}
