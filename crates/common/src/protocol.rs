//! Request and response bodies of the JSON API.
//!
//! Protected fields are always plaintext on the wire. The `*_key_version`
//! fields report which key the stored copy is encrypted under (`null` when the
//! stored copy is plaintext).

use serde::{Deserialize, Serialize};

/// Placeholder returned for a protected field that could not be decrypted.
pub const ENCRYPTED_PLACEHOLDER: &str = "[encrypted]";

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Body of `POST /api/users` and `PUT /api/users/:id`.
///
/// All fields are required on create. On update, absent or empty fields are left
/// unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub first_name: String,
    pub first_name_key_version: Option<String>,
    pub last_name: String,
    pub last_name_key_version: Option<String>,
    pub email: String,
    pub email_key_version: Option<String>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

/// Body of `POST /api/payments`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub user_id: Option<String>,
    pub card_number: Option<String>,
    pub cvv: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: i64,
    pub user_id: String,
    pub card_number: String,
    pub card_number_key_version: Option<String>,
    pub cvv: String,
    pub cvv_key_version: Option<String>,
    pub created_at: String,
    /// The owning user, decrypted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"bad_request"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` or `"degraded"`.
    pub status: String,
    pub encryption_enabled: bool,
    /// Id of the key used for new writes.
    pub active_key_id: String,
    pub database_ok: bool,
}
