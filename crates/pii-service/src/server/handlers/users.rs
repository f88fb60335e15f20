//! `/api/users` handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use common::protocol::{UserRequest, UserResponse};
use common::ServiceError;
use tracing::info;

use super::views::user_view;
use super::{internal, provided, run_blocking};
use crate::entities::{assign_plaintext, User};
use crate::server::error::ApiResult;
use crate::server::state::AppState;

/// `GET /api/users`: every user, decrypted.
pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<UserResponse>>> {
    let repo = state.repo.clone();
    let users = run_blocking(move || Ok(repo.list_users()?)).await?;
    Ok(Json(users.iter().map(|u| user_view(state.codec(), u)).collect()))
}

/// `GET /api/users/:id`
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<UserResponse>> {
    let repo = state.repo.clone();
    let user = run_blocking(move || Ok(repo.find_user(&id)?.ok_or_else(user_not_found)?)).await?;
    Ok(Json(user_view(state.codec(), &user)))
}

/// `POST /api/users`: protected fields are encrypted by the write hook.
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<UserRequest>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    let (Some(first_name), Some(last_name), Some(email)) =
        (provided(&req.first_name), provided(&req.last_name), provided(&req.email))
    else {
        return Err(ServiceError::BadRequest("first_name, last_name and email are required".into()).into());
    };

    let mut user = User::new(first_name.to_owned(), last_name.to_owned(), email.to_owned());
    let repo = state.repo.clone();
    let user = run_blocking(move || {
        repo.insert_user(&mut user)?;
        Ok(user)
    })
    .await?;

    info!(
        user_id = %user.id,
        encrypted = user.email_key_version.is_some(),
        "user created"
    );

    // Echo the submitted plaintext; the key versions show what was stored.
    let mut body = user_view(state.codec(), &user);
    body.first_name = first_name.to_owned();
    body.last_name = last_name.to_owned();
    body.email = email.to_owned();
    Ok((StatusCode::CREATED, Json(body)))
}

/// `PUT /api/users/:id`: absent or empty fields are left unchanged.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UserRequest>,
) -> ApiResult<Json<UserResponse>> {
    let changes: Vec<(&'static str, String)> = [
        ("first_name", provided(&req.first_name)),
        ("last_name", provided(&req.last_name)),
        ("email", provided(&req.email)),
    ]
    .into_iter()
    .filter_map(|(field, value)| value.map(|v| (field, v.to_owned())))
    .collect();

    let repo = state.repo.clone();
    let submitted = changes.clone();
    let user = run_blocking(move || {
        let mut user = repo.find_user(&id)?.ok_or_else(user_not_found)?;
        for (field, value) in changes {
            assign_plaintext(&mut user, field, value).map_err(internal)?;
        }
        repo.update_user(&mut user)?;
        Ok(user)
    })
    .await?;

    info!(user_id = %user.id, fields = submitted.len(), "user updated");

    let mut body = user_view(state.codec(), &user);
    for (field, value) in submitted {
        match field {
            "first_name" => body.first_name = value,
            "last_name" => body.last_name = value,
            _ => body.email = value,
        }
    }
    Ok(Json(body))
}

/// `DELETE /api/users/:id`: also removes the user's payments.
pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let repo = state.repo.clone();
    let deleted = run_blocking(move || Ok(repo.delete_user(&id)?)).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(user_not_found().into())
    }
}

pub(super) fn user_not_found() -> ServiceError {
    ServiceError::NotFound("User not found".into())
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use serde_json::json;

    use super::*;
    use crate::server::router;

    fn server(enabled: bool) -> (TestServer, AppState) {
        let state = AppState::for_tests(enabled);
        let server = TestServer::new(router::build(state.clone())).unwrap();
        (server, state)
    }

    async fn create_alice(server: &TestServer) -> UserResponse {
        let resp = server
            .post("/api/users")
            .json(&json!({"first_name": "Alice", "last_name": "Smith", "email": "alice@example.com"}))
            .await;
        resp.assert_status(StatusCode::CREATED);
        resp.json::<UserResponse>()
    }

    #[tokio::test]
    async fn create_encrypts_at_rest_and_echoes_plaintext() {
        let (server, state) = server(true);
        let created = create_alice(&server).await;

        assert_eq!(created.email, "alice@example.com");
        assert_eq!(created.email_key_version.as_deref(), Some("k1"));

        let stored = state.repo.find_user(&created.id).unwrap().unwrap();
        assert_ne!(stored.email, "alice@example.com");
        assert_ne!(stored.first_name, "Alice");
    }

    #[tokio::test]
    async fn get_and_list_decrypt() {
        let (server, _) = server(true);
        let created = create_alice(&server).await;

        let one = server.get(&format!("/api/users/{}", created.id)).await.json::<UserResponse>();
        assert_eq!(one.first_name, "Alice");
        assert_eq!(one.email, "alice@example.com");

        let all = server.get("/api/users").await.json::<Vec<UserResponse>>();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].last_name, "Smith");
    }

    #[tokio::test]
    async fn create_requires_all_fields() {
        let (server, _) = server(true);
        let resp = server
            .post("/api/users")
            .json(&json!({"first_name": "Alice", "email": ""}))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        let body = resp.json::<serde_json::Value>();
        assert_eq!(body["code"], "bad_request");
    }

    #[tokio::test]
    async fn update_reencrypts_changed_field_only() {
        let (server, state) = server(true);
        let created = create_alice(&server).await;
        let before = state.repo.find_user(&created.id).unwrap().unwrap();

        let resp = server
            .put(&format!("/api/users/{}", created.id))
            .json(&json!({"email": "alice@new.example.com"}))
            .await;
        resp.assert_status_ok();
        let body = resp.json::<UserResponse>();
        assert_eq!(body.email, "alice@new.example.com");
        assert_eq!(body.first_name, "Alice");

        let after = state.repo.find_user(&created.id).unwrap().unwrap();
        assert_eq!(after.first_name, before.first_name);
        assert_ne!(after.email, before.email);
        assert_eq!(after.email_key_version.as_deref(), Some("k1"));
        assert_eq!(
            state.codec().decrypt(&after.email, after.email_key_version.as_deref()),
            "alice@new.example.com"
        );
    }

    #[tokio::test]
    async fn missing_user_is_404() {
        let (server, _) = server(true);
        server.get("/api/users/nope").await.assert_status(StatusCode::NOT_FOUND);
        server
            .put("/api/users/nope")
            .json(&json!({"email": "x@y.z"}))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server.delete("/api/users/nope").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_removes_user() {
        let (server, _) = server(true);
        let created = create_alice(&server).await;
        server
            .delete(&format!("/api/users/{}", created.id))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&format!("/api/users/{}", created.id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn disabled_encryption_stores_plaintext() {
        let (server, state) = server(false);
        let created = create_alice(&server).await;
        assert_eq!(created.email_key_version, None);

        let stored = state.repo.find_user(&created.id).unwrap().unwrap();
        assert_eq!(stored.email, "alice@example.com");
    }
}
