//! Daemon configuration.
//!
//! Loaded from a TOML file (`/etc/mast.toml` by default, `--config` to
//! override), falling back to built-in defaults when the default file is
//! absent. A handful of environment variables override the file for
//! container deployments.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const DEFAULT_PATH: &str = "/etc/mast.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub build: BuildConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mast.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Disable to skip image builds entirely (useful for tests and dev).
    pub enabled: bool,
    pub command: String,
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "hlb".to_string(),
            timeout_secs: 900,
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// tracing-subscriber filter directive, overridden by RUST_LOG.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration. An explicitly named file must exist; the default
    /// path is allowed to be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = path.unwrap_or(Path::new(DEFAULT_PATH));

        let mut config = if candidate.exists() {
            let raw = std::fs::read_to_string(candidate)
                .with_context(|| format!("failed to read {}", candidate.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("failed to parse {}", candidate.display()))?
        } else if path.is_some() {
            bail!("config file {} does not exist", candidate.display());
        } else {
            Config::default()
        };

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("MAST_DB_PATH") {
            self.db.path = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("MAST_HTTP_HOST") {
            self.server.host = value;
        }
        if let Ok(value) = std::env::var("MAST_HTTP_PORT") {
            if let Ok(port) = value.parse() {
                self.server.port = port;
            }
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid listen address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }
}
