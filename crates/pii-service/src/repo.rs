//! SQLite persistence for users and payments.
//!
//! Every insert and update passes the entity through the [`PersistenceHook`]
//! first, so protected fields reach the database encrypted. Reads return rows
//! exactly as stored; decryption is the caller's job.

use fieldcrypt::{Database, PersistenceHook, StoreError};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use crate::entities::{Payment, User};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                      TEXT PRIMARY KEY,
    first_name              TEXT NOT NULL,
    first_name_key_version  TEXT,
    last_name               TEXT NOT NULL,
    last_name_key_version   TEXT,
    email                   TEXT NOT NULL,
    email_key_version       TEXT,
    created_at              TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_users_first_name_key_version ON users (first_name_key_version);
CREATE INDEX IF NOT EXISTS idx_users_email_key_version ON users (email_key_version);

CREATE TABLE IF NOT EXISTS payments (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id                  TEXT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    card_number              TEXT NOT NULL,
    card_number_key_version  TEXT,
    cvv                      TEXT NOT NULL,
    cvv_key_version          TEXT,
    created_at               TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_payments_card_number_key_version ON payments (card_number_key_version);
"#;

const USER_COLUMNS: &str = "id, first_name, first_name_key_version, last_name, last_name_key_version, \
                            email, email_key_version, created_at";

const PAYMENT_COLUMNS: &str = "id, user_id, card_number, card_number_key_version, cvv, cvv_key_version, created_at";

#[derive(Clone)]
pub struct Repository {
    db: Database,
    hook: PersistenceHook,
}

impl Repository {
    pub fn new(db: Database, hook: PersistenceHook) -> Self {
        Self { db, hook }
    }

    pub fn hook(&self) -> &PersistenceHook {
        &self.hook
    }

    /// Create the service tables if they do not exist.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.db.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// `SELECT 1` round trip.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.db.lock().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY rowid"))?;
        let users = stmt.query_map([], user_from_row)?.collect::<Result<_, _>>()?;
        Ok(users)
    }

    pub fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let conn = self.db.lock();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn insert_user(&self, user: &mut User) -> Result<(), StoreError> {
        let report = self.hook.before_insert(user);
        debug!(kind = "users", encrypted = report.encrypted, failed = report.failed, "inserting user");

        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO users (id, first_name, first_name_key_version, last_name, last_name_key_version, \
             email, email_key_version) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.first_name,
                user.first_name_key_version,
                user.last_name,
                user.last_name_key_version,
                user.email,
                user.email_key_version,
            ],
        )?;
        user.created_at = conn.query_row("SELECT created_at FROM users WHERE id = ?1", [&user.id], |r| r.get(0))?;
        Ok(())
    }

    pub fn update_user(&self, user: &mut User) -> Result<(), StoreError> {
        self.hook.before_update(user);

        let updated = self.db.lock().execute(
            "UPDATE users SET first_name = ?2, first_name_key_version = ?3, last_name = ?4, \
             last_name_key_version = ?5, email = ?6, email_key_version = ?7 WHERE id = ?1",
            params![
                user.id,
                user.first_name,
                user.first_name_key_version,
                user.last_name,
                user.last_name_key_version,
                user.email,
                user.email_key_version,
            ],
        )?;
        expect_one("users", updated)
    }

    /// `false` if no such user exists.
    pub fn delete_user(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.db.lock().execute("DELETE FROM users WHERE id = ?1", [id])? > 0)
    }

    // -----------------------------------------------------------------------
    // Payments
    // -----------------------------------------------------------------------

    pub fn list_payments(&self) -> Result<Vec<Payment>, StoreError> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!("SELECT {PAYMENT_COLUMNS} FROM payments ORDER BY id"))?;
        let payments = stmt.query_map([], payment_from_row)?.collect::<Result<_, _>>()?;
        Ok(payments)
    }

    pub fn find_payment(&self, id: i64) -> Result<Option<Payment>, StoreError> {
        let conn = self.db.lock();
        let payment = conn
            .query_row(
                &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
                [id],
                payment_from_row,
            )
            .optional()?;
        Ok(payment)
    }

    pub fn insert_payment(&self, payment: &mut Payment) -> Result<(), StoreError> {
        let report = self.hook.before_insert(payment);
        debug!(kind = "payments", encrypted = report.encrypted, failed = report.failed, "inserting payment");

        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO payments (user_id, card_number, card_number_key_version, cvv, cvv_key_version) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                payment.user_id,
                payment.card_number,
                payment.card_number_key_version,
                payment.cvv,
                payment.cvv_key_version,
            ],
        )?;
        payment.id = conn.last_insert_rowid();
        payment.created_at =
            conn.query_row("SELECT created_at FROM payments WHERE id = ?1", [payment.id], |r| r.get(0))?;
        Ok(())
    }

    pub fn update_payment(&self, payment: &mut Payment) -> Result<(), StoreError> {
        self.hook.before_update(payment);

        let updated = self.db.lock().execute(
            "UPDATE payments SET card_number = ?2, card_number_key_version = ?3, cvv = ?4, \
             cvv_key_version = ?5 WHERE id = ?1",
            params![
                payment.id,
                payment.card_number,
                payment.card_number_key_version,
                payment.cvv,
                payment.cvv_key_version,
            ],
        )?;
        expect_one("payments", updated)
    }

    /// `false` if no such payment exists.
    pub fn delete_payment(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.db.lock().execute("DELETE FROM payments WHERE id = ?1", [id])? > 0)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        first_name: row.get(1)?,
        first_name_key_version: row.get(2)?,
        last_name: row.get(3)?,
        last_name_key_version: row.get(4)?,
        email: row.get(5)?,
        email_key_version: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        card_number: row.get(2)?,
        card_number_key_version: row.get(3)?,
        cvv: row.get(4)?,
        cvv_key_version: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn expect_one(table: &str, updated: usize) -> Result<(), StoreError> {
    if updated == 1 {
        Ok(())
    } else {
        Err(StoreError::UnexpectedRowCount {
            table: table.to_owned(),
            updated,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use fieldcrypt::{AesGcmSivEngine, FieldAnnotationRegistry, FieldCodec, KeyRecord, KeyRegistry, KeyStatus};

    use super::*;

    pub(crate) fn repository(enabled: bool) -> Repository {
        let keys = KeyRegistry::load(vec![KeyRecord::new("k1", 1, vec![5u8; 32], KeyStatus::Active)]).unwrap();
        let codec = Arc::new(FieldCodec::new(enabled, Arc::new(keys), Arc::new(AesGcmSivEngine::new())));
        let annotations = FieldAnnotationRegistry::builder()
            .entity::<User>()
            .entity::<Payment>()
            .build()
            .unwrap();
        let repo = Repository::new(
            Database::open_in_memory().unwrap(),
            PersistenceHook::new(Arc::new(annotations), codec),
        );
        repo.init_schema().unwrap();
        repo
    }

    #[test]
    fn insert_stores_ciphertext_and_versions() {
        let repo = repository(true);
        let mut user = User::new("Alice".into(), "Smith".into(), "alice@example.com".into());
        repo.insert_user(&mut user).unwrap();

        let stored = repo.find_user(&user.id).unwrap().unwrap();
        assert_eq!(stored.email_key_version.as_deref(), Some("k1"));
        assert_ne!(stored.email, "alice@example.com");
        assert!(!stored.created_at.is_empty());
        let codec = repo.hook().codec();
        assert_eq!(codec.decrypt(&stored.email, stored.email_key_version.as_deref()), "alice@example.com");
    }

    #[test]
    fn disabled_encryption_stores_plaintext() {
        let repo = repository(false);
        let mut user = User::new("Bob".into(), "Jones".into(), "bob@example.com".into());
        repo.insert_user(&mut user).unwrap();

        let stored = repo.find_user(&user.id).unwrap().unwrap();
        assert_eq!(stored.email, "bob@example.com");
        assert_eq!(stored.email_key_version, None);
    }

    #[test]
    fn payment_round_trip_and_cascade() {
        let repo = repository(true);
        let mut user = User::new("Alice".into(), "Smith".into(), "alice@example.com".into());
        repo.insert_user(&mut user).unwrap();
        let mut payment = Payment::new(user.id.clone(), "4111111111111111".into(), "123".into());
        repo.insert_payment(&mut payment).unwrap();
        assert!(payment.id > 0);

        let stored = repo.find_payment(payment.id).unwrap().unwrap();
        assert_eq!(stored.cvv_key_version.as_deref(), Some("k1"));
        assert_eq!(repo.list_payments().unwrap().len(), 1);

        assert!(repo.delete_user(&user.id).unwrap());
        assert!(repo.find_payment(payment.id).unwrap().is_none());
    }

    #[test]
    fn update_missing_user_fails() {
        let repo = repository(true);
        let mut ghost = User::new("G".into(), "H".into(), "g@h.i".into());
        assert!(matches!(
            repo.update_user(&mut ghost),
            Err(StoreError::UnexpectedRowCount { updated: 0, .. })
        ));
        assert!(!repo.delete_user("nope").unwrap());
    }

    #[test]
    fn ping_succeeds() {
        repository(false).ping().unwrap();
    }
}
