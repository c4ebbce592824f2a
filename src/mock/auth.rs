use std::sync::Arc;
use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;
use crate::services::auth_service::{TokenResponse, UserInfo};
use super::error::MockError;
use super::state::MockState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    username: String,
    #[serde(default)]
    email: Option<String>,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

pub fn routes() -> Router<Arc<MockState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/refresh", post(refresh))
        .route("/auth/me", get(me))
}

/// Resolve the bearer token on a request to its user.
pub async fn current_user(state: &MockState, headers: &HeaderMap) -> Result<UserInfo, MockError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| MockError::Unauthorized("Not authenticated".to_string()))?;

    user_for_token(state, token).await
}

pub async fn user_for_token(state: &MockState, token: &str) -> Result<UserInfo, MockError> {
    state
        .data()
        .read()
        .await
        .user_for_token(token)
        .ok_or_else(|| MockError::Unauthorized("Invalid or expired token".to_string()))
}

pub async fn current_admin(state: &MockState, headers: &HeaderMap) -> Result<UserInfo, MockError> {
    let user = current_user(state, headers).await?;
    if user.is_admin() {
        Ok(user)
    } else {
        Err(MockError::Forbidden)
    }
}

/// Unknown usernames are signed up on the spot so demos need no setup.
async fn login(
    State(state): State<Arc<MockState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, MockError> {
    let mut data = state.data().write().await;
    match data.accounts.get(&body.username) {
        Some(account) if account.password != body.password => {
            return Err(MockError::Unauthorized("Invalid username or password".to_string()));
        }
        Some(_) => {}
        None => {
            data.add_account(&body.username, None, &body.password);
        }
    }

    let tokens = data
        .issue_tokens(&body.username)
        .ok_or_else(|| MockError::Unauthorized("Invalid username or password".to_string()))?;
    info!(user = %body.username, "mock login");
    Ok(Json(tokens))
}

async fn register(
    State(state): State<Arc<MockState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<TokenResponse>, MockError> {
    let mut data = state.data().write().await;
    if data.accounts.contains_key(&body.username) {
        return Err(MockError::field("username", "Username is already taken"));
    }

    data.add_account(&body.username, body.email, &body.password);
    let tokens = data
        .issue_tokens(&body.username)
        .ok_or_else(|| MockError::BadRequest("Registration failed".to_string()))?;
    info!(user = %body.username, "mock registration");
    Ok(Json(tokens))
}

async fn refresh(
    State(state): State<Arc<MockState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, MockError> {
    let mut data = state.data().write().await;
    let username = data
        .refresh_tokens
        .remove(&body.refresh_token)
        .ok_or_else(|| MockError::Unauthorized("Invalid refresh token".to_string()))?;

    data.issue_tokens(&username)
        .map(Json)
        .ok_or_else(|| MockError::Unauthorized("Account no longer exists".to_string()))
}

async fn me(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
) -> Result<Json<UserInfo>, MockError> {
    current_user(&state, &headers).await.map(Json)
}
