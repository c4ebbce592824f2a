use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use super::file_service::get_app_data_dir;

pub const API_URL_ENV: &str = "SUPPLIER_PORTAL_API_URL";
pub const WS_URL_ENV: &str = "SUPPLIER_PORTAL_WS_URL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Reconnect and heartbeat tuning for the streaming connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_reconnect_attempts: 10,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub ws_base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_upload_bytes() -> u64 {
    20 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ws_base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
            download_dir: None,
            realtime: RealtimeConfig::default(),
        }
    }
}

impl Config {
    /// Streaming endpoint base: the explicit setting, or the API base with
    /// its scheme switched to `ws`/`wss`.
    pub fn ws_url(&self) -> Result<String> {
        if let Some(ws) = &self.ws_base_url {
            return Ok(ws.trim_end_matches('/').to_string());
        }

        let mut url = url::Url::parse(&self.api_base_url)
            .map_err(|e| Error::Config(format!("Invalid API URL {}: {}", self.api_base_url, e)))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(Error::Config(format!("Unsupported API URL scheme: {}", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::Config(format!("Cannot derive websocket URL from {}", self.api_base_url)))?;
        Ok(url.as_str().trim_end_matches('/').to_string())
    }
}

pub fn validate_base_url(value: &str, schemes: &[&str]) -> Result<String> {
    let url = url::Url::parse(value.trim())
        .map_err(|e| Error::validation("url", &format!("Invalid URL: {}", e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(Error::validation(
            "url",
            &format!("URL scheme must be one of: {}", schemes.join(", ")),
        ));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn get_config_path() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join("config.json"))
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_path()?)
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(&get_config_path()?, config)
}

/// Apply environment overrides on top of a stored config.
pub fn apply_env_overrides(mut config: Config, env: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(api) = env(API_URL_ENV).filter(|v| !v.is_empty()) {
        config.api_base_url = api;
    }
    if let Some(ws) = env(WS_URL_ENV).filter(|v| !v.is_empty()) {
        config.ws_base_url = Some(ws);
    }
    config
}

/// The stored config with environment overrides applied.
pub fn get_effective_config() -> Result<Config> {
    let config = load_config()?;
    Ok(apply_env_overrides(config, |key| std::env::var(key).ok()))
}

pub fn set_api_base_url(url: &str) -> Result<Config> {
    let url = validate_base_url(url, &["http", "https"])?;
    let mut config = load_config().unwrap_or_default();
    config.api_base_url = url;
    save_config(&config)?;
    Ok(config)
}

pub fn set_ws_base_url(url: &str) -> Result<Config> {
    let url = validate_base_url(url, &["ws", "wss"])?;
    let mut config = load_config().unwrap_or_default();
    config.ws_base_url = Some(url);
    save_config(&config)?;
    Ok(config)
}

pub fn set_download_dir(dir: &Path) -> Result<Config> {
    let mut config = load_config().unwrap_or_default();
    config.download_dir = Some(dir.to_path_buf());
    save_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_is_derived_from_api_url() {
        let config = Config {
            api_base_url: "https://portal.example.com/api/".to_string(),
            ..Config::default()
        };
        assert_eq!(config.ws_url().unwrap(), "wss://portal.example.com/api");

        let config = Config {
            ws_base_url: Some("ws://localhost:9000/".to_string()),
            ..Config::default()
        };
        assert_eq!(config.ws_url().unwrap(), "ws://localhost:9000");
    }

    #[test]
    fn partial_config_files_fill_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"apiBaseUrl":"http://x/api","realtime":{"maxReconnectAttempts":3}}"#)
                .unwrap();

        assert_eq!(config.api_base_url, "http://x/api");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.realtime.max_reconnect_attempts, 3);
        assert_eq!(config.realtime.initial_backoff_ms, 1_000);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("missing-{}.json", uuid::Uuid::new_v4()));
        assert_eq!(load_config_from(&path).unwrap(), Config::default());
    }

    #[test]
    fn env_overrides_win_over_stored_values() {
        let config = apply_env_overrides(Config::default(), |key| match key {
            API_URL_ENV => Some("https://staging.example.com/api".to_string()),
            _ => None,
        });
        assert_eq!(config.api_base_url, "https://staging.example.com/api");
        assert_eq!(config.ws_base_url, None);
    }

    #[test]
    fn rejects_urls_with_wrong_scheme() {
        let err = validate_base_url("ftp://example.com", &["http", "https"]).unwrap_err();
        assert_eq!(err.field_errors()[0].field, "url");
        assert!(validate_base_url("https://example.com/api/", &["http", "https"]).is_ok());
    }
}
