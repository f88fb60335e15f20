//! Bulk jobs over the configured tables: backfill, rotation and reset.
//!
//! Each job runs in a single SQLite transaction. Row-level failures are logged,
//! counted and skipped; anything that fails outside a row (a missing table, a
//! failed prepare, the commit itself) rolls the whole job back.
//!
//! Per-row log lines say *staged*. Only after `COMMIT` succeeds does the job log
//! *committed* totals; after a rollback it logs how many staged updates were
//! discarded.

pub mod tables;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::annotations::FieldAnnotationRegistry;
use crate::codec::FieldCodec;
use crate::store::rows::{self, FieldRow, TableRef};
use crate::store::{Database, StoreError};

pub use tables::{TableSpec, TablesConfig, TablesError};

#[derive(Debug, Error)]
pub enum BackfillError {
    /// The codec is disabled, so nothing could be encrypted.
    #[error("encryption is disabled; refusing to run {0}")]
    Disabled(&'static str),

    /// The job failed and its transaction was rolled back.
    #[error("{job} rolled back after staging {staged} updates: {source}")]
    Job {
        job: &'static str,
        staged: usize,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillOptions {
    /// Also re-encrypt already encrypted rows under the active key.
    pub rotate: bool,
}

/// Outcome for one `(table, field)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldReport {
    pub table: String,
    pub field: String,
    pub encrypted: usize,
    pub rotated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Totals for a committed backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub fields: Vec<FieldReport>,
}

impl BackfillReport {
    pub fn encrypted(&self) -> usize {
        self.fields.iter().map(|f| f.encrypted).sum()
    }

    pub fn rotated(&self) -> usize {
        self.fields.iter().map(|f| f.rotated).sum()
    }

    pub fn failed(&self) -> usize {
        self.fields.iter().map(|f| f.failed).sum()
    }

    pub fn skipped(&self) -> usize {
        self.fields.iter().map(|f| f.skipped).sum()
    }

    /// Row updates written inside the transaction.
    pub fn staged(&self) -> usize {
        self.encrypted() + self.rotated()
    }
}

/// Proof that the caller asked for the destructive reset.
#[derive(Debug)]
pub struct ResetConfirmation(());

impl ResetConfirmation {
    /// Acknowledge that every protected column will be overwritten.
    pub fn acknowledge() -> Self {
        Self(())
    }
}

/// Rows rewritten by a committed reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub rows_reset: usize,
}

pub struct BackfillCoordinator {
    codec: Arc<FieldCodec>,
    tables: TablesConfig,
    annotations: Option<Arc<FieldAnnotationRegistry>>,
}

impl BackfillCoordinator {
    pub fn new(codec: Arc<FieldCodec>, tables: TablesConfig) -> Self {
        Self {
            codec,
            tables,
            annotations: None,
        }
    }

    /// Take shadow column names from the annotation registry where a table is
    /// annotated there.
    pub fn with_annotations(mut self, annotations: Arc<FieldAnnotationRegistry>) -> Self {
        self.annotations = Some(annotations);
        self
    }

    pub fn tables(&self) -> &TablesConfig {
        &self.tables
    }

    /// Encrypt every plaintext row and, with `opts.rotate`, re-encrypt every
    /// encrypted row under the active key.
    ///
    /// # Errors
    ///
    /// [`BackfillError::Disabled`] if the codec is disabled, or
    /// [`BackfillError::Job`] if the transaction was rolled back.
    pub fn run(&self, db: &Database, opts: BackfillOptions) -> Result<BackfillReport, BackfillError> {
        const JOB: &str = "backfill";
        if !self.codec.is_enabled() {
            return Err(BackfillError::Disabled(JOB));
        }

        info!(
            active_key_id = self.codec.active_key_id(),
            rotate = opts.rotate,
            tables = self.tables.tables.len(),
            "starting backfill"
        );

        let mut conn = db.lock();
        let tx = conn.transaction().map_err(|e| job_error(JOB, 0, e.into()))?;
        let mut report = BackfillReport::default();

        let outcome = self.tables.tables.iter().try_for_each(|table| {
            for field in &table.fields {
                let field_report = self.process_field(&tx, table, field, opts)?;
                report.fields.push(field_report);
            }
            Ok::<_, StoreError>(())
        });

        if let Err(e) = outcome {
            return Err(rollback(JOB, tx, report.staged(), e));
        }
        let staged = report.staged();
        tx.commit().map_err(|e| job_error(JOB, staged, e.into()))?;

        info!(
            encrypted = report.encrypted(),
            rotated = report.rotated(),
            skipped = report.skipped(),
            failed = report.failed(),
            "backfill committed"
        );
        Ok(report)
    }

    /// Overwrite every protected column with its configured default and clear the
    /// shadow columns. No row filter is applied.
    ///
    /// # Errors
    ///
    /// [`BackfillError::Job`] if the transaction was rolled back.
    pub fn reset(&self, db: &Database, _confirmation: ResetConfirmation) -> Result<ResetReport, BackfillError> {
        const JOB: &str = "reset";
        warn!(tables = self.tables.tables.len(), "resetting protected columns to defaults");

        let mut conn = db.lock();
        let tx = conn.transaction().map_err(|e| job_error(JOB, 0, e.into()))?;
        let mut report = ResetReport::default();

        let outcome = self.tables.tables.iter().try_for_each(|table| {
            let table_ref = table_ref(table);
            for field in &table.fields {
                let shadow = table.shadow_for(field, self.annotations.as_deref());
                let n = rows::reset_field(&tx, table_ref, field, &shadow, table.default_for(field))?;
                debug!(table = %table_ref, field = %field, rows = n, "reset staged");
                report.rows_reset += n;
            }
            Ok::<_, StoreError>(())
        });

        if let Err(e) = outcome {
            return Err(rollback(JOB, tx, report.rows_reset, e));
        }
        tx.commit().map_err(|e| job_error(JOB, report.rows_reset, e.into()))?;

        info!(rows = report.rows_reset, "reset committed");
        Ok(report)
    }

    fn process_field(
        &self,
        conn: &rusqlite::Connection,
        table: &TableSpec,
        field: &str,
        opts: BackfillOptions,
    ) -> Result<FieldReport, StoreError> {
        let table_ref = table_ref(table);
        let shadow = table.shadow_for(field, self.annotations.as_deref());
        let mut report = FieldReport {
            table: table_ref.to_string(),
            field: field.to_owned(),
            ..FieldReport::default()
        };

        // Rotation first, so rows encrypted by the forward pass are not rewritten twice.
        if opts.rotate {
            let stamped = rows::select_encrypted_rows(conn, table_ref, field, &shadow)?;
            info!(table = %table_ref, field = %field, rows = stamped.len(), "rotating encrypted rows");
            for row in &stamped {
                match self.rotate_row(conn, table_ref, field, &shadow, row) {
                    Ok(()) => report.rotated += 1,
                    Err(reason) => {
                        warn!(table = %table_ref, field = %field, id = %row.id, key_id = ?row.key_id, error = %reason, "row rotation failed");
                        report.failed += 1;
                    }
                }
            }
        }

        let pending = rows::select_plaintext_rows(conn, table_ref, field, &shadow)?;
        info!(table = %table_ref, field = %field, rows = pending.len(), "encrypting plaintext rows");
        for row in &pending {
            match self.encrypt_row(conn, table_ref, field, &shadow, row) {
                Ok(true) => report.encrypted += 1,
                Ok(false) => report.skipped += 1,
                Err(reason) => {
                    warn!(table = %table_ref, field = %field, id = %row.id, error = %reason, "row encryption failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// `Ok(false)` when the codec passes the value through (e.g. empty string).
    fn encrypt_row(
        &self,
        conn: &rusqlite::Connection,
        table: TableRef<'_>,
        field: &str,
        shadow: &str,
        row: &FieldRow,
    ) -> Result<bool, String> {
        let sealed = match self.codec.try_encrypt(&row.value) {
            Ok(sealed) => sealed,
            Err(e) if e.is_passthrough() => return Ok(false),
            Err(e) => return Err(e.to_string()),
        };
        rows::update_field(conn, table, &row.id, field, shadow, sealed.value(), sealed.key_id())
            .map_err(|e| e.to_string())?;
        debug!(table = %table, field = %field, id = %row.id, "encryption staged");
        Ok(true)
    }

    fn rotate_row(
        &self,
        conn: &rusqlite::Connection,
        table: TableRef<'_>,
        field: &str,
        shadow: &str,
        row: &FieldRow,
    ) -> Result<(), String> {
        // Strict decrypt: a value that cannot be opened must never be re-encrypted
        // as if it were plaintext.
        let plaintext = self
            .codec
            .try_decrypt(&row.value, row.key_id.as_deref())
            .map_err(|e| e.to_string())?;
        let sealed = self.codec.try_encrypt(&plaintext).map_err(|e| e.to_string())?;
        rows::update_field(conn, table, &row.id, field, shadow, sealed.value(), sealed.key_id())
            .map_err(|e| e.to_string())?;
        debug!(table = %table, field = %field, id = %row.id, from = ?row.key_id, "rotation staged");
        Ok(())
    }
}

fn table_ref(table: &TableSpec) -> TableRef<'_> {
    TableRef {
        schema: &table.schema,
        table: &table.table_name,
        id_column: &table.id_column,
    }
}

fn job_error(job: &'static str, staged: usize, source: StoreError) -> BackfillError {
    error!(job, staged, error = %source, "job failed; staged updates discarded");
    BackfillError::Job { job, staged, source }
}

fn rollback(job: &'static str, tx: rusqlite::Transaction<'_>, staged: usize, source: StoreError) -> BackfillError {
    if let Err(e) = tx.rollback() {
        warn!(job, error = %e, "explicit rollback failed; transaction dropped");
    }
    job_error(job, staged, source)
}
