//! Layered configuration: defaults, then the JSON file, then `TALLY_*`
//! environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Json};
use figment::Figment;
use secrecy::SecretString;
use serde::Deserialize;
use tally_server::ServerConfig;
use tally_telemetry::TelemetryConfig;

pub const DEFAULT_CONFIG_FILE: &str = "tally.json";
pub const ENV_PREFIX: &str = "TALLY_";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub log: TelemetryConfig,
}

/// Values given on the command line. `None` leaves the loaded value alone.
#[derive(Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub jwt_secret: Option<String>,
}

impl AppConfig {
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(secret) = overrides.jwt_secret {
            self.server.jwt_secret = Some(SecretString::from(secret));
        }
    }
}

/// File and environment providers. Nested keys use `__`,
/// e.g. `TALLY_SERVER__PORT=4000`.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load configuration. An explicitly named file must exist; the default
/// `tally.json` is optional.
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let file = match path {
        Some(p) if !p.exists() => bail!("config file not found: {}", p.display()),
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    };
    figment(&file)
        .extract()
        .with_context(|| format!("invalid configuration (file: {})", file.display()))
}
