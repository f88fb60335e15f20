//! Rendering stored rows as plaintext API responses.

use common::protocol::{PaymentResponse, UserResponse, ENCRYPTED_PLACEHOLDER};
use fieldcrypt::FieldCodec;
use tracing::warn;

use crate::entities::{Payment, User};

/// Plaintext of a stored protected value.
///
/// Values without a key version, and every value while encryption is disabled,
/// are returned as stored. A value that carries a key version but cannot be
/// decrypted is replaced by [`ENCRYPTED_PLACEHOLDER`].
pub(super) fn reveal(codec: &FieldCodec, field: &str, value: &str, key_id: Option<&str>) -> String {
    let Some(key_id) = key_id else {
        return value.to_owned();
    };
    match codec.try_decrypt(value, Some(key_id)) {
        Ok(plaintext) => plaintext,
        Err(e) if e.is_passthrough() => value.to_owned(),
        Err(e) => {
            warn!(field, key_id, error = %e, "stored value could not be decrypted");
            ENCRYPTED_PLACEHOLDER.to_owned()
        }
    }
}

pub(super) fn user_view(codec: &FieldCodec, user: &User) -> UserResponse {
    UserResponse {
        id: user.id.clone(),
        first_name: reveal(codec, "first_name", &user.first_name, user.first_name_key_version.as_deref()),
        first_name_key_version: user.first_name_key_version.clone(),
        last_name: reveal(codec, "last_name", &user.last_name, user.last_name_key_version.as_deref()),
        last_name_key_version: user.last_name_key_version.clone(),
        email: reveal(codec, "email", &user.email, user.email_key_version.as_deref()),
        email_key_version: user.email_key_version.clone(),
        created_at: user.created_at.clone(),
    }
}

pub(super) fn payment_view(codec: &FieldCodec, payment: &Payment, user: Option<&User>) -> PaymentResponse {
    PaymentResponse {
        id: payment.id,
        user_id: payment.user_id.clone(),
        card_number: reveal(
            codec,
            "card_number",
            &payment.card_number,
            payment.card_number_key_version.as_deref(),
        ),
        card_number_key_version: payment.card_number_key_version.clone(),
        cvv: reveal(codec, "cvv", &payment.cvv, payment.cvv_key_version.as_deref()),
        cvv_key_version: payment.cvv_key_version.clone(),
        created_at: payment.created_at.clone(),
        user: user.map(|u| user_view(codec, u)),
    }
}
