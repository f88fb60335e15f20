//! `pii-admin`: bulk jobs over the encrypted columns.
//!
//! ```text
//! pii-admin backfill            encrypt rows whose key version is null
//! pii-admin backfill --rotate   also re-encrypt every row under the active key
//! pii-admin reset --yes         overwrite protected columns with defaults
//! ```
//!
//! Startup sequence:
//! 1. Parse arguments and load [`Config`](config::Config) from the environment.
//! 2. Initialise structured JSON logging.
//! 3. Build the codec (always enabled) and run the requested job.

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fieldcrypt::{
    AesGcmSivEngine, BackfillCoordinator, BackfillOptions, Database, FieldCodec, ResetConfirmation,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "pii-admin")]
#[command(about = "Backfill, rotate and reset encrypted PII columns")]
struct Cli {
    /// Tables config file; overrides TABLES_CONFIG
    #[arg(long, global = true)]
    tables: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Encrypt every plaintext protected value
    Backfill {
        /// Also re-encrypt already encrypted values under the active key
        #[arg(long)]
        rotate: bool,
    },
    /// Overwrite every protected value with its configured default (destructive)
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let mut cfg = config::Config::from_env().map_err(|e| {
        eprintln!("ERROR: pii-admin configuration invalid: {e:#}");
        e
    })?;
    if let Some(path) = &cli.tables {
        cfg.tables_config = path.display().to_string();
    }

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;

    // -----------------------------------------------------------------------
    // 3. Job
    // -----------------------------------------------------------------------
    let summary = run(&cfg, &cli.command)?;
    println!("{summary}");
    Ok(())
}

/// Execute `command` and return a one-line summary.
fn run(cfg: &config::Config, command: &Command) -> Result<String> {
    if let Command::Reset { yes: false } = command {
        anyhow::bail!("reset overwrites every protected column; re-run with --yes to confirm");
    }

    let keys = Arc::new(cfg.key_registry()?);
    info!(
        active_key_id = keys.active().key_id(),
        active_key_version = keys.active().version(),
        keys_loaded = keys.len(),
        "key registry loaded"
    );

    // Bulk jobs always run with encryption on, whatever the service setting.
    let codec = Arc::new(FieldCodec::new(true, keys, Arc::new(AesGcmSivEngine::new())));
    let coordinator = BackfillCoordinator::new(codec, cfg.tables()?);
    let db = Database::open(&cfg.database_path)
        .with_context(|| format!("failed to open database {}", cfg.database_path))?;

    match command {
        Command::Backfill { rotate } => {
            let report = coordinator.run(&db, BackfillOptions { rotate: *rotate })?;
            if report.failed() > 0 {
                warn!(failed = report.failed(), "some rows could not be processed; see earlier warnings");
            }
            Ok(format!(
                "backfill committed: {} encrypted, {} rotated, {} skipped, {} failed",
                report.encrypted(),
                report.rotated(),
                report.skipped(),
                report.failed()
            ))
        }
        Command::Reset { .. } => {
            let report = coordinator.reset(&db, ResetConfirmation::acknowledge())?;
            Ok(format!("reset committed: {} rows", report.rows_reset))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: &str = r#"[{"keyId":"k1","version":1,"key":"QUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUE=","status":"active"}]"#;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["pii-admin", "backfill", "--rotate"]).unwrap();
        assert_eq!(cli.command, Command::Backfill { rotate: true });

        let cli = Cli::try_parse_from(["pii-admin", "reset", "--yes", "--tables", "t.json"]).unwrap();
        assert_eq!(cli.command, Command::Reset { yes: true });
        assert_eq!(cli.tables, Some(PathBuf::from("t.json")));

        assert!(Cli::try_parse_from(["pii-admin"]).is_err());
    }

    fn scratch_config(name: &str) -> crate::config::Config {
        let dir = std::env::temp_dir().join(format!("pii-admin-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join("pii.db");
        let _ = std::fs::remove_file(&db_path);
        let tables_path = dir.join("tables.yaml");
        std::fs::write(
            &tables_path,
            "tables:\n  - table_name: users\n    fields: [email]\n    defaults:\n      email: default@example.com\n",
        )
        .unwrap();

        let conn = fieldcrypt::Database::open(&db_path).unwrap();
        conn.lock()
            .execute_batch(
                "CREATE TABLE users (id TEXT PRIMARY KEY, email TEXT NOT NULL, email_key_version TEXT);
                 INSERT INTO users VALUES ('u1', 'a@example.com', NULL);
                 INSERT INTO users VALUES ('u2', 'b@example.com', NULL);",
            )
            .unwrap();

        crate::config::Config {
            database_path: db_path.display().to_string(),
            encryption_keys: KEYS.into(),
            tables_config: tables_path.display().to_string(),
            log_level: "info".into(),
        }
    }

    #[test]
    fn backfill_then_reset() {
        let cfg = scratch_config("jobs");

        let summary = run(&cfg, &Command::Backfill { rotate: false }).unwrap();
        assert!(summary.contains("2 encrypted"), "{summary}");

        let summary = run(&cfg, &Command::Backfill { rotate: true }).unwrap();
        assert!(summary.contains("2 rotated"), "{summary}");

        let summary = run(&cfg, &Command::Reset { yes: true }).unwrap();
        assert!(summary.contains("2 rows"), "{summary}");
    }

    #[test]
    fn reset_requires_confirmation() {
        let cfg = scratch_config("confirm");
        let err = run(&cfg, &Command::Reset { yes: false }).unwrap_err();
        assert!(err.to_string().contains("--yes"));
    }
}
