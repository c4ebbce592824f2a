use crate::error::Error;
use crate::services::auth_service::{
    self, AuthState, LoginForm, RegisterForm, UserInfo,
};
use crate::state::AppState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub is_authenticated: bool,
    pub username: Option<String>,
    pub user_id: Option<String>,
    pub is_admin: bool,
}

impl From<&AuthState> for AuthStatus {
    fn from(state: &AuthState) -> Self {
        Self {
            is_authenticated: state.access_token.is_some(),
            username: state.user.as_ref().map(|u| u.username.clone()),
            user_id: state.user.as_ref().map(|u| u.id.clone()),
            is_admin: state.user.as_ref().is_some_and(UserInfo::is_admin),
        }
    }
}

fn start_session(state: &AppState, auth_state: &AuthState) -> Result<AuthStatus, String> {
    auth_service::save_auth_state_to(&state.auth_path(), auth_state).map_err(|e| e.to_string())?;
    state.http.set_token(auth_state.access_token.clone());
    Ok(AuthStatus::from(auth_state))
}

/// Sign in with the login form and remember the session.
pub async fn login(state: &AppState, username: String, password: String) -> Result<AuthStatus, String> {
    let form = LoginForm { username, password };
    let tokens = state.auth.login(&form).await.map_err(|e| e.to_string())?;
    let auth_state = auth_service::state_from_tokens(tokens, chrono::Utc::now().timestamp());
    start_session(state, &auth_state)
}

pub async fn register(state: &AppState, form: RegisterForm) -> Result<AuthStatus, String> {
    let tokens = state.auth.register(&form).await.map_err(|e| e.to_string())?;
    let auth_state = auth_service::state_from_tokens(tokens, chrono::Utc::now().timestamp());
    start_session(state, &auth_state)
}

/// Load the saved session, refreshing the token if needed. A session the
/// backend no longer accepts is cleared.
pub async fn restore_session(state: &AppState) -> Result<AuthStatus, String> {
    let path = state.auth_path();
    let mut auth_state = auth_service::load_auth_state_from(&path).map_err(|e| e.to_string())?;
    if auth_state.access_token.is_none() {
        return Ok(AuthStatus::from(&auth_state));
    }

    let before = auth_state.clone();
    let checked = match state.auth.ensure_fresh(&mut auth_state).await {
        Ok(token) => {
            state.http.set_token(Some(token));
            state.auth.me().await
        }
        Err(e) => Err(e),
    };

    match checked {
        Ok(user) => {
            auth_state.user = Some(user);
            if auth_state != before {
                auth_service::save_auth_state_to(&path, &auth_state).map_err(|e| e.to_string())?;
            }
            Ok(AuthStatus::from(&auth_state))
        }
        Err(Error::Unauthorized(reason)) => {
            tracing::info!(%reason, "saved session is no longer valid");
            auth_service::clear_auth_state_at(&path).map_err(|e| e.to_string())?;
            state.http.set_token(None);
            Ok(AuthStatus::from(&AuthState::default()))
        }
        Err(e) => {
            state.http.set_token(None);
            Err(e.to_string())
        }
    }
}

pub fn check_auth_status(state: &AppState) -> Result<AuthStatus, String> {
    let auth_state = auth_service::load_auth_state_from(&state.auth_path()).map_err(|e| e.to_string())?;
    Ok(AuthStatus::from(&auth_state))
}

pub async fn get_current_user(state: &AppState) -> Result<UserInfo, String> {
    state.auth.me().await.map_err(|e| e.to_string())
}

pub async fn signout(state: &AppState) -> Result<(), String> {
    state.controller.close().await;
    state.http.set_token(None);
    auth_service::clear_auth_state_at(&state.auth_path()).map_err(|e| e.to_string())
}
