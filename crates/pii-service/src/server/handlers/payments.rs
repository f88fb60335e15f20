//! `/api/payments` handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use common::protocol::{PaymentRequest, PaymentResponse};
use common::ServiceError;
use tracing::info;

use super::users::user_not_found;
use super::views::payment_view;
use super::{internal, provided, run_blocking};
use crate::entities::{assign_plaintext, Payment, User};
use crate::server::error::ApiResult;
use crate::server::state::AppState;

/// `GET /api/payments`: every payment with its user, decrypted.
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<PaymentResponse>>> {
    let repo = state.repo.clone();
    let rows = run_blocking(move || {
        let mut rows = Vec::new();
        for payment in repo.list_payments()? {
            let user = repo.find_user(&payment.user_id)?;
            rows.push((payment, user));
        }
        Ok(rows)
    })
    .await?;

    let body = rows
        .iter()
        .map(|(payment, user)| payment_view(state.codec(), payment, user.as_ref()))
        .collect();
    Ok(Json(body))
}

/// `GET /api/payments/:id`
pub async fn get(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<PaymentResponse>> {
    let repo = state.repo.clone();
    let (payment, user) = run_blocking(move || {
        let payment = repo.find_payment(id)?.ok_or_else(payment_not_found)?;
        let user = repo.find_user(&payment.user_id)?;
        Ok((payment, user))
    })
    .await?;
    Ok(Json(payment_view(state.codec(), &payment, user.as_ref())))
}

/// `POST /api/payments`: the owning user must exist.
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<PaymentRequest>,
) -> ApiResult<(StatusCode, Json<PaymentResponse>)> {
    let (Some(user_id), Some(card_number), Some(cvv)) =
        (provided(&req.user_id), provided(&req.card_number), provided(&req.cvv))
    else {
        return Err(ServiceError::BadRequest("user_id, card_number and cvv are required".into()).into());
    };

    let mut payment = Payment::new(user_id.to_owned(), card_number.to_owned(), cvv.to_owned());
    let repo = state.repo.clone();
    let (payment, user) = run_blocking(move || {
        let user: User = repo.find_user(&payment.user_id)?.ok_or_else(user_not_found)?;
        repo.insert_payment(&mut payment)?;
        Ok((payment, user))
    })
    .await?;

    info!(
        payment_id = payment.id,
        user_id = %payment.user_id,
        encrypted = payment.card_number_key_version.is_some(),
        "payment created"
    );

    let mut body = payment_view(state.codec(), &payment, Some(&user));
    body.card_number = card_number.to_owned();
    body.cvv = cvv.to_owned();
    Ok((StatusCode::CREATED, Json(body)))
}

/// `PUT /api/payments/:id`: only `card_number` and `cvv` can change.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<PaymentRequest>,
) -> ApiResult<Json<PaymentResponse>> {
    let changes: Vec<(&'static str, String)> = [
        ("card_number", provided(&req.card_number)),
        ("cvv", provided(&req.cvv)),
    ]
    .into_iter()
    .filter_map(|(field, value)| value.map(|v| (field, v.to_owned())))
    .collect();

    let repo = state.repo.clone();
    let submitted = changes.clone();
    let (payment, user) = run_blocking(move || {
        let mut payment = repo.find_payment(id)?.ok_or_else(payment_not_found)?;
        for (field, value) in changes {
            assign_plaintext(&mut payment, field, value).map_err(internal)?;
        }
        repo.update_payment(&mut payment)?;
        let user = repo.find_user(&payment.user_id)?;
        Ok((payment, user))
    })
    .await?;

    info!(payment_id = payment.id, fields = submitted.len(), "payment updated");

    let mut body = payment_view(state.codec(), &payment, user.as_ref());
    for (field, value) in submitted {
        match field {
            "card_number" => body.card_number = value,
            _ => body.cvv = value,
        }
    }
    Ok(Json(body))
}

/// `DELETE /api/payments/:id`
pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let repo = state.repo.clone();
    let deleted = run_blocking(move || Ok(repo.delete_payment(id)?)).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(payment_not_found().into())
    }
}

fn payment_not_found() -> ServiceError {
    ServiceError::NotFound("Payment not found".into())
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use common::protocol::UserResponse;
    use serde_json::json;

    use super::*;
    use crate::server::router;

    async fn setup() -> (TestServer, AppState, String) {
        let state = AppState::for_tests(true);
        let server = TestServer::new(router::build(state.clone())).unwrap();
        let user = server
            .post("/api/users")
            .json(&json!({"first_name": "Alice", "last_name": "Smith", "email": "alice@example.com"}))
            .await
            .json::<UserResponse>();
        (server, state, user.id)
    }

    async fn create_payment(server: &TestServer, user_id: &str) -> PaymentResponse {
        let resp = server
            .post("/api/payments")
            .json(&json!({"user_id": user_id, "card_number": "4111111111111111", "cvv": "123"}))
            .await;
        resp.assert_status(StatusCode::CREATED);
        resp.json::<PaymentResponse>()
    }

    #[tokio::test]
    async fn create_encrypts_card_data() {
        let (server, state, user_id) = setup().await;
        let created = create_payment(&server, &user_id).await;

        assert_eq!(created.card_number, "4111111111111111");
        assert_eq!(created.cvv_key_version.as_deref(), Some("k1"));
        assert_eq!(created.user.as_ref().map(|u| u.email.as_str()), Some("alice@example.com"));

        let stored = state.repo.find_payment(created.id).unwrap().unwrap();
        assert_ne!(stored.card_number, "4111111111111111");
        assert_ne!(stored.cvv, "123");
    }

    #[tokio::test]
    async fn get_and_list_decrypt_with_user() {
        let (server, _, user_id) = setup().await;
        let created = create_payment(&server, &user_id).await;

        let one = server
            .get(&format!("/api/payments/{}", created.id))
            .await
            .json::<PaymentResponse>();
        assert_eq!(one.cvv, "123");
        assert_eq!(one.user.map(|u| u.first_name), Some("Alice".to_owned()));

        let all = server.get("/api/payments").await.json::<Vec<PaymentResponse>>();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].card_number, "4111111111111111");
    }

    #[tokio::test]
    async fn unknown_user_is_404() {
        let (server, _, _) = setup().await;
        let resp = server
            .post("/api/payments")
            .json(&json!({"user_id": "nope", "card_number": "4111111111111111", "cvv": "123"}))
            .await;
        resp.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_fields_is_400() {
        let (server, _, user_id) = setup().await;
        server
            .post("/api/payments")
            .json(&json!({"user_id": user_id, "card_number": "4111111111111111"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_and_delete() {
        let (server, state, user_id) = setup().await;
        let created = create_payment(&server, &user_id).await;

        let updated = server
            .put(&format!("/api/payments/{}", created.id))
            .json(&json!({"cvv": "999"}))
            .await
            .json::<PaymentResponse>();
        assert_eq!(updated.cvv, "999");
        assert_eq!(updated.card_number, "4111111111111111");

        let stored = state.repo.find_payment(created.id).unwrap().unwrap();
        assert_eq!(state.codec().decrypt(&stored.cvv, stored.cvv_key_version.as_deref()), "999");

        server
            .delete(&format!("/api/payments/{}", created.id))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&format!("/api/payments/{}", created.id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
