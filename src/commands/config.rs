use std::path::PathBuf;
use crate::services::config_service::{self, Config};

pub fn get_config() -> Result<Config, String> {
    config_service::get_effective_config().map_err(|e| e.to_string())
}

pub fn set_api_url(url: String) -> Result<Config, String> {
    config_service::set_api_base_url(&url).map_err(|e| e.to_string())
}

pub fn set_ws_url(url: String) -> Result<Config, String> {
    config_service::set_ws_base_url(&url).map_err(|e| e.to_string())
}

pub fn set_download_dir(dir: PathBuf) -> Result<Config, String> {
    config_service::set_download_dir(&dir).map_err(|e| e.to_string())
}
