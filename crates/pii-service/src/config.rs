//! Configuration loading and validation for the PII service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use anyhow::{Context, Result};
use fieldcrypt::keys::registry_from_json;
use fieldcrypt::KeyRegistry;
use serde::Deserialize;

/// Validated service configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// JSON array of key records. **Required.**
    pub encryption_keys: String,

    /// Encrypt on write and decrypt on read. Off by default.
    #[serde(default)]
    pub encryption_enabled: bool,

    /// Port the HTTP server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP/gRPC endpoint for span export. Export is off when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
}

fn default_database_path() -> String {
    "pii.db".into()
}
fn default_port() -> u16 {
    3000
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_source(config::Environment::default())
    }

    fn from_source(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env)
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Build the key registry from `ENCRYPTION_KEYS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key list is malformed or does not have exactly one
    /// active key.
    pub fn key_registry(&self) -> Result<KeyRegistry> {
        registry_from_json(&self.encryption_keys).context("ENCRYPTION_KEYS is invalid")
    }

    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.database_path, "DATABASE_PATH")?;
        ensure_non_empty(&self.encryption_keys, "ENCRYPTION_KEYS")?;
        if self.port == 0 {
            anyhow::bail!("PORT must be > 0");
        }
        if let Some(endpoint) = &self.otel_exporter_otlp_endpoint {
            ensure_non_empty(endpoint, "OTEL_EXPORTER_OTLP_ENDPOINT")?;
        }
        self.key_registry()?;
        Ok(())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("encryption_keys", &"[REDACTED]")
            .field("encryption_enabled", &self.encryption_enabled)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("otel_exporter_otlp_endpoint", &self.otel_exporter_otlp_endpoint)
            .finish()
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
