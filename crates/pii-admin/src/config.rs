//! Configuration for the admin CLI, read from environment variables.

use anyhow::{Context, Result};
use fieldcrypt::keys::registry_from_json;
use fieldcrypt::{KeyRegistry, TablesConfig};
use serde::Deserialize;

#[derive(Clone, Deserialize)]
pub struct Config {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// JSON array of key records. **Required.**
    pub encryption_keys: String,

    /// Tables and fields processed by the jobs (YAML or JSON).
    #[serde(default = "default_tables_config")]
    pub tables_config: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_database_path() -> String {
    "pii.db".into()
}
fn default_tables_config() -> String {
    "config/tables.yaml".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_source(config::Environment::default())
    }

    fn from_source(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env)
            .build()
            .context("failed to build pii-admin configuration")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise pii-admin configuration")?;

        c.validate()?;
        Ok(c)
    }

    pub fn key_registry(&self) -> Result<KeyRegistry> {
        registry_from_json(&self.encryption_keys).context("ENCRYPTION_KEYS is invalid")
    }

    pub fn tables(&self) -> Result<TablesConfig> {
        TablesConfig::load(&self.tables_config)
            .with_context(|| format!("failed to load tables config {}", self.tables_config))
    }

    fn validate(&self) -> Result<()> {
        for (value, name) in [
            (&self.database_path, "DATABASE_PATH"),
            (&self.encryption_keys, "ENCRYPTION_KEYS"),
            (&self.tables_config, "TABLES_CONFIG"),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{name} is required and must not be empty");
            }
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
            .field("tables_config", &self.tables_config)
            .field("log_level", &self.log_level)
            .finish()
    }
}
