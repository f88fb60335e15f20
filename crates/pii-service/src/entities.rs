//! The `users` and `payments` rows and their protected fields.

use fieldcrypt::annotations::shadow_column;
use fieldcrypt::{Annotated, Entity, EntityError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub first_name_key_version: Option<String>,
    pub last_name: String,
    pub last_name_key_version: Option<String>,
    pub email: String,
    pub email_key_version: Option<String>,
    pub created_at: String,
}

impl User {
    /// A new plaintext user with a random id.
    pub fn new(first_name: String, last_name: String, email: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            first_name,
            first_name_key_version: None,
            last_name,
            last_name_key_version: None,
            email,
            email_key_version: None,
            created_at: String::new(),
        }
    }
}

impl Annotated for User {
    const KIND: &'static str = "users";
    const ENCRYPTED_FIELDS: &'static [&'static str] = &["first_name", "last_name", "email"];
}

impl Entity for User {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn get(&self, column: &str) -> Option<&str> {
        match column {
            "id" => Some(&self.id),
            "first_name" => Some(&self.first_name),
            "first_name_key_version" => self.first_name_key_version.as_deref(),
            "last_name" => Some(&self.last_name),
            "last_name_key_version" => self.last_name_key_version.as_deref(),
            "email" => Some(&self.email),
            "email_key_version" => self.email_key_version.as_deref(),
            "created_at" => Some(&self.created_at),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: Option<String>) -> Result<(), EntityError> {
        match column {
            "first_name" => self.first_name = required(Self::KIND, column, value)?,
            "first_name_key_version" => self.first_name_key_version = value,
            "last_name" => self.last_name = required(Self::KIND, column, value)?,
            "last_name_key_version" => self.last_name_key_version = value,
            "email" => self.email = required(Self::KIND, column, value)?,
            "email_key_version" => self.email_key_version = value,
            _ => return Err(unknown(Self::KIND, column)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    /// Assigned by the database on insert.
    pub id: i64,
    pub user_id: String,
    pub card_number: String,
    pub card_number_key_version: Option<String>,
    pub cvv: String,
    pub cvv_key_version: Option<String>,
    pub created_at: String,
}

impl Payment {
    pub fn new(user_id: String, card_number: String, cvv: String) -> Self {
        Self {
            id: 0,
            user_id,
            card_number,
            card_number_key_version: None,
            cvv,
            cvv_key_version: None,
            created_at: String::new(),
        }
    }
}

impl Annotated for Payment {
    const KIND: &'static str = "payments";
    const ENCRYPTED_FIELDS: &'static [&'static str] = &["card_number", "cvv"];
}

impl Entity for Payment {
    fn kind(&self) -> &str {
        Self::KIND
    }

    /// Text columns only; the integer id is not exposed.
    fn get(&self, column: &str) -> Option<&str> {
        match column {
            "user_id" => Some(&self.user_id),
            "card_number" => Some(&self.card_number),
            "card_number_key_version" => self.card_number_key_version.as_deref(),
            "cvv" => Some(&self.cvv),
            "cvv_key_version" => self.cvv_key_version.as_deref(),
            "created_at" => Some(&self.created_at),
            _ => None,
        }
    }

    fn set(&mut self, column: &str, value: Option<String>) -> Result<(), EntityError> {
        match column {
            "card_number" => self.card_number = required(Self::KIND, column, value)?,
            "card_number_key_version" => self.card_number_key_version = value,
            "cvv" => self.cvv = required(Self::KIND, column, value)?,
            "cvv_key_version" => self.cvv_key_version = value,
            _ => return Err(unknown(Self::KIND, column)),
        }
        Ok(())
    }
}

/// Replace a protected field with new plaintext and clear its key version, so the
/// next write encrypts it again.
pub fn assign_plaintext(entity: &mut dyn Entity, field: &str, value: String) -> Result<(), EntityError> {
    entity.set(field, Some(value))?;
    entity.set(&shadow_column(field), None)
}

fn required(kind: &str, column: &str, value: Option<String>) -> Result<String, EntityError> {
    value.ok_or_else(|| EntityError::NotNullable {
        kind: kind.to_owned(),
        column: column.to_owned(),
    })
}

fn unknown(kind: &str, column: &str) -> EntityError {
    EntityError::UnknownColumn {
        kind: kind.to_owned(),
        column: column.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_columns() {
        let mut u = User::new("Alice".into(), "Smith".into(), "alice@example.com".into());
        assert_eq!(u.get("email"), Some("alice@example.com"));
        assert_eq!(u.get("email_key_version"), None);

        u.set("email_key_version", Some("k1".into())).unwrap();
        assert_eq!(u.email_key_version.as_deref(), Some("k1"));
        assert!(matches!(u.set("email", None), Err(EntityError::NotNullable { .. })));
        assert!(matches!(u.set("id", Some("x".into())), Err(EntityError::UnknownColumn { .. })));
    }

    #[test]
    fn assigning_plaintext_clears_version() {
        let mut p = Payment::new("u1".into(), "ENVELOPE".into(), "000".into());
        p.card_number_key_version = Some("k1".into());
        assign_plaintext(&mut p, "card_number", "4111111111111111".into()).unwrap();
        assert_eq!(p.card_number, "4111111111111111");
        assert_eq!(p.card_number_key_version, None);
    }

    #[test]
    fn annotated_fields() {
        let fields: Vec<String> = User::encryptable_fields().iter().map(|f| f.shadow().to_owned()).collect();
        assert_eq!(fields, ["first_name_key_version", "last_name_key_version", "email_key_version"]);
        assert_eq!(Payment::ENCRYPTED_FIELDS, ["card_number", "cvv"]);
    }
}
