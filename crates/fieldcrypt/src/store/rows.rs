//! Row-level SQL for bulk jobs.
//!
//! Every function takes a plain `&Connection` so it can run on a
//! `rusqlite::Transaction` (which derefs to one). Identifiers are always quoted.

use std::fmt;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params, Connection, ToSql};

use super::StoreError;

/// A table addressed by schema, name and primary-key column.
#[derive(Debug, Clone, Copy)]
pub struct TableRef<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    pub id_column: &'a str,
}

impl TableRef<'_> {
    fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(self.schema), quote_ident(self.table))
    }
}

impl fmt::Display for TableRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Primary key of a row, whatever its SQL type.
#[derive(Debug, Clone, PartialEq)]
pub struct RowId(Value);

impl RowId {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }
}

impl ToSql for RowId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::Null => f.write_str("null"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(t) => f.write_str(t),
            Value::Blob(b) => write!(f, "<{} byte blob>", b.len()),
        }
    }
}

/// One protected value read for processing.
#[derive(Debug, Clone)]
pub struct FieldRow {
    pub id: RowId,
    pub value: String,
    pub key_id: Option<String>,
}

/// Rows whose `field` is non-null and whose `shadow` is null or empty.
pub fn select_plaintext_rows(
    conn: &Connection,
    table: TableRef<'_>,
    field: &str,
    shadow: &str,
) -> Result<Vec<FieldRow>, StoreError> {
    let sql = format!(
        "SELECT {id}, {field} FROM {tbl} WHERE ({shadow} IS NULL OR {shadow} = '') AND {field} IS NOT NULL",
        id = quote_ident(table.id_column),
        field = quote_ident(field),
        shadow = quote_ident(shadow),
        tbl = table.qualified(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(FieldRow {
            id: RowId(row.get::<_, Value>(0)?),
            value: text_column(row.get_ref(1)?),
            key_id: None,
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Rows whose `field` is non-null and whose `shadow` is non-empty.
pub fn select_encrypted_rows(
    conn: &Connection,
    table: TableRef<'_>,
    field: &str,
    shadow: &str,
) -> Result<Vec<FieldRow>, StoreError> {
    let sql = format!(
        "SELECT {id}, {field}, {shadow} FROM {tbl} WHERE {shadow} IS NOT NULL AND {shadow} <> '' AND {field} IS NOT NULL",
        id = quote_ident(table.id_column),
        field = quote_ident(field),
        shadow = quote_ident(shadow),
        tbl = table.qualified(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(FieldRow {
            id: RowId(row.get::<_, Value>(0)?),
            value: text_column(row.get_ref(1)?),
            key_id: Some(text_column(row.get_ref(2)?)),
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Write a value and its shadow column for one row.
pub fn update_field(
    conn: &Connection,
    table: TableRef<'_>,
    id: &RowId,
    field: &str,
    shadow: &str,
    value: &str,
    key_id: Option<&str>,
) -> Result<(), StoreError> {
    let sql = format!(
        "UPDATE {tbl} SET {field} = ?1, {shadow} = ?2 WHERE {id} = ?3",
        tbl = table.qualified(),
        field = quote_ident(field),
        shadow = quote_ident(shadow),
        id = quote_ident(table.id_column),
    );
    let updated = conn.execute(&sql, params![value, key_id, id])?;
    if updated != 1 {
        return Err(StoreError::UnexpectedRowCount {
            table: table.to_string(),
            updated,
        });
    }
    Ok(())
}

/// Overwrite `field` on every row with `default` and clear its shadow column.
pub fn reset_field(
    conn: &Connection,
    table: TableRef<'_>,
    field: &str,
    shadow: &str,
    default: &str,
) -> Result<usize, StoreError> {
    let sql = format!(
        "UPDATE {tbl} SET {field} = ?1, {shadow} = NULL",
        tbl = table.qualified(),
        field = quote_ident(field),
        shadow = quote_ident(shadow),
    );
    Ok(conn.execute(&sql, params![default])?)
}

/// Double-quote an SQL identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn text_column(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(r) => r.to_string(),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS: TableRef<'static> = TableRef {
        schema: "main",
        table: "users",
        id_column: "id",
    };

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id TEXT PRIMARY KEY, email TEXT, email_key_version TEXT);
             INSERT INTO users VALUES ('u1', 'a@b.c', NULL);
             INSERT INTO users VALUES ('u2', NULL, NULL);
             INSERT INTO users VALUES ('u3', 'ENVELOPE', 'k1');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn selects_by_shadow_state() {
        let conn = conn();
        let plain = select_plaintext_rows(&conn, USERS, "email", "email_key_version").unwrap();
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].id.to_string(), "u1");
        assert_eq!(plain[0].value, "a@b.c");

        let sealed = select_encrypted_rows(&conn, USERS, "email", "email_key_version").unwrap();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].key_id.as_deref(), Some("k1"));
    }

    #[test]
    fn empty_shadow_counts_as_plaintext() {
        let conn = conn();
        conn.execute("INSERT INTO users VALUES ('u4', 'd@e.f', '')", []).unwrap();

        let plain = select_plaintext_rows(&conn, USERS, "email", "email_key_version").unwrap();
        let mut ids: Vec<String> = plain.iter().map(|r| r.id.to_string()).collect();
        ids.sort();
        assert_eq!(ids, ["u1", "u4"]);

        let sealed = select_encrypted_rows(&conn, USERS, "email", "email_key_version").unwrap();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].id.to_string(), "u3");
    }

    #[test]
    fn update_writes_value_and_shadow() {
        let conn = conn();
        update_field(&conn, USERS, &RowId::new("u1".to_string()), "email", "email_key_version", "X", Some("k2"))
            .unwrap();
        let (v, k): (String, String) = conn
            .query_row("SELECT email, email_key_version FROM users WHERE id = 'u1'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!((v.as_str(), k.as_str()), ("X", "k2"));
    }

    #[test]
    fn update_missing_row_is_error() {
        let conn = conn();
        let err = update_field(&conn, USERS, &RowId::new("nope".to_string()), "email", "email_key_version", "X", None)
            .unwrap_err();
        assert!(matches!(err, StoreError::UnexpectedRowCount { updated: 0, .. }));
    }

    #[test]
    fn reset_clears_every_row() {
        let conn = conn();
        let n = reset_field(&conn, USERS, "email", "email_key_version", "default@example.com").unwrap();
        assert_eq!(n, 3);
        let stamped: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE email_key_version IS NOT NULL", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stamped, 0);
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
