//! Registry configuration
//!
//! Resolution order: built-in defaults, then an optional JSON file, then
//! environment variables. Binaries apply their command-line flags last.
//!
//! ```json
//! {
//!   "name": "mcp-registry",
//!   "connection": { "host": "0.0.0.0", "port": 50051 },
//!   "database": { "url": "surrealkv://./data", "namespace": "registry", "name": "main" },
//!   "error_mode": "status",
//!   "execution_mode": "inline"
//! }
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use registry_state::StoreConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RegistryError, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 50051;

/// How failures are reported on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Every handled call answers 200; failures live in the envelope.
    #[default]
    Envelope,
    /// Failures also carry a matching HTTP status.
    Status,
}

impl FromStr for ErrorMode {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "envelope" => Ok(ErrorMode::Envelope),
            "status" => Ok(ErrorMode::Status),
            other => Err(RegistryError::Config(format!(
                "unknown error mode {other:?} (expected envelope or status)"
            ))),
        }
    }
}

impl fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMode::Envelope => f.write_str("envelope"),
            ErrorMode::Status => f.write_str("status"),
        }
    }
}

/// When an execution is advanced past `pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run to a terminal status before responding.
    Inline,
    /// Respond with the pending snapshot; a spawned task finishes the run.
    #[default]
    Background,
}

impl FromStr for ExecutionMode {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(ExecutionMode::Inline),
            "background" => Ok(ExecutionMode::Background),
            other => Err(RegistryError::Config(format!(
                "unknown execution mode {other:?} (expected inline or background)"
            ))),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Inline => f.write_str("inline"),
            ExecutionMode::Background => f.write_str("background"),
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Top-level registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub name: String,
    pub version: String,
    pub connection: ConnectionConfig,
    pub database: StoreConfig,
    pub error_mode: ErrorMode,
    pub execution_mode: ExecutionMode,
    /// Reject execution references that are not well-formed IDs.
    pub validate_references: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            name: "mcp-registry".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            connection: ConnectionConfig::default(),
            database: StoreConfig::default(),
            error_mode: ErrorMode::default(),
            execution_mode: ExecutionMode::default(),
            validate_references: false,
        }
    }
}

impl RegistryConfig {
    /// Defaults, overlaid by `path` (when given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading registry config");
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| RegistryError::Config(format!("{}: {e}", path.display())))
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay `REGISTRY_*` and `SURREALDB_*` variables.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("REGISTRY_HOST") {
            self.connection.host = host;
        }
        if let Some(raw) = lookup("REGISTRY_PORT") {
            self.connection.port = raw.parse().map_err(|_| {
                RegistryError::Config(format!("REGISTRY_PORT is not a port number: {raw:?}"))
            })?;
        }
        if let Some(raw) = lookup("REGISTRY_ERROR_MODE") {
            self.error_mode = raw.parse()?;
        }
        if let Some(raw) = lookup("REGISTRY_EXECUTION_MODE") {
            self.execution_mode = raw.parse()?;
        }
        if let Some(raw) = lookup("REGISTRY_VALIDATE_REFERENCES") {
            self.validate_references = raw.eq_ignore_ascii_case("true") || raw == "1";
        }
        self.database.apply_env_from(&lookup)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.host.is_empty() {
            return Err(RegistryError::Config("connection.host is empty".to_string()));
        }
        self.database.validate()?;
        Ok(())
    }

    /// `host:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.connection.host, self.connection.port)
    }
}
