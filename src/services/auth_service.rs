use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use crate::error::{Error, FieldError, Result};
use super::api_client::ApiClient;

// ============================================================================
// AUTH DATA STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: UserRole,
}

impl UserInfo {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<UserInfo>,
}

impl AuthState {
    /// Expired, or within the refresh buffer of expiring.
    pub fn needs_refresh(&self, now: i64) -> bool {
        self.expires_at
            .map(|exp| now >= exp - REFRESH_BUFFER_SECS)
            .unwrap_or(false)
    }
}

/// Response from the login, register and refresh endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing)]
    pub confirm_password: String,
}

const REFRESH_BUFFER_SECS: i64 = 60;
const MIN_PASSWORD_LEN: usize = 8;

// ============================================================================
// FORM VALIDATION
// ============================================================================

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
    })
}

fn validate_username(username: &str, errors: &mut Vec<FieldError>) {
    let len = username.trim().chars().count();
    if len == 0 {
        errors.push(FieldError::new("username", "Username is required"));
    } else if !(3..=64).contains(&len) {
        errors.push(FieldError::new("username", "Username must be between 3 and 64 characters"));
    }
}

pub fn validate_login(form: &LoginForm) -> Result<()> {
    let mut errors = Vec::new();
    validate_username(&form.username, &mut errors);
    if form.password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

pub fn validate_registration(form: &RegisterForm) -> Result<()> {
    let mut errors = Vec::new();
    validate_username(&form.username, &mut errors);

    if form.email.trim().is_empty() {
        errors.push(FieldError::new("email", "Email is required"));
    } else if !email_regex().is_match(form.email.trim()) {
        errors.push(FieldError::new("email", "Enter a valid email address"));
    }

    if form.password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new(
            "password",
            &format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    if form.password != form.confirm_password {
        errors.push(FieldError::new("confirmPassword", "Passwords do not match"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

// ============================================================================
// AUTH STATE PERSISTENCE
// ============================================================================

pub fn load_auth_state_from(path: &Path) -> Result<AuthState> {
    if !path.exists() {
        return Ok(AuthState::default());
    }

    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_auth_state_to(path: &Path, state: &AuthState) -> Result<()> {
    let content = serde_json::to_string_pretty(state)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn clear_auth_state_at(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

pub fn state_from_tokens(tokens: TokenResponse, now: i64) -> AuthState {
    AuthState {
        access_token: Some(tokens.access_token),
        refresh_token: tokens.refresh_token,
        expires_at: Some(now + tokens.expires_in),
        user: Some(tokens.user),
    }
}

// ============================================================================
// AUTH API
// ============================================================================

#[derive(Debug, Clone)]
pub struct AuthApi {
    http: ApiClient,
}

impl AuthApi {
    pub fn new(http: ApiClient) -> Self {
        Self { http }
    }

    pub async fn login(&self, form: &LoginForm) -> Result<TokenResponse> {
        validate_login(form)?;
        let tokens: TokenResponse = self.http.post_json("/auth/login", form).await?;
        tracing::info!(user = %tokens.user.username, "signed in");
        Ok(tokens)
    }

    pub async fn register(&self, form: &RegisterForm) -> Result<TokenResponse> {
        validate_registration(form)?;
        let tokens: TokenResponse = self.http.post_json("/auth/register", form).await?;
        tracing::info!(user = %tokens.user.username, "registered");
        Ok(tokens)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.http
            .post_json("/auth/refresh", &serde_json::json!({ "refreshToken": refresh_token }))
            .await
    }

    pub async fn me(&self) -> Result<UserInfo> {
        self.http.get_json("/auth/me").await
    }

    /// Get a valid access token for `state`, refreshing it (and updating
    /// `state`) when it is about to expire.
    pub async fn ensure_fresh(&self, state: &mut AuthState) -> Result<String> {
        let access_token = state
            .access_token
            .clone()
            .ok_or_else(|| Error::Unauthorized("Not signed in".to_string()))?;

        let now = chrono::Utc::now().timestamp();
        if !state.needs_refresh(now) {
            return Ok(access_token);
        }

        let refresh_token = state.refresh_token.clone().ok_or_else(|| {
            Error::Unauthorized("Session expired and no refresh token available".to_string())
        })?;

        tracing::debug!("refreshing access token");
        let tokens = self.refresh(&refresh_token).await?;
        let mut refreshed = state_from_tokens(tokens, now);
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }
        *state = refreshed;

        state
            .access_token
            .clone()
            .ok_or_else(|| Error::Unauthorized("Refresh returned no token".to_string()))
    }
}
