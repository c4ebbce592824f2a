use std::path::{Path, PathBuf};
use crate::error::Result;
use crate::services::admin_api::AdminApi;
use crate::services::api_client::ApiClient;
use crate::services::auth_service::AuthApi;
use crate::services::chat_api::ChatApi;
use crate::services::chat_controller::ChatController;
use crate::services::config_service::Config;
use crate::services::file_api::FileApi;
use crate::services::realtime::{RealtimeOptions, WebSocketService};

/// Everything the command layer needs, wired from one config. All API
/// wrappers share a single [`ApiClient`] and therefore one bearer token.
pub struct AppState {
    pub config: Config,
    pub data_dir: PathBuf,
    pub http: ApiClient,
    pub auth: AuthApi,
    pub chats: ChatApi,
    pub files: FileApi,
    pub admin: AdminApi,
    pub controller: ChatController,
}

impl AppState {
    pub fn new(config: Config, data_dir: &Path) -> Result<Self> {
        let http = ApiClient::from_config(&config)?;
        let chats = ChatApi::new(http.clone());
        let realtime = WebSocketService::new(&config.ws_url()?, RealtimeOptions::from(&config.realtime));

        Ok(Self {
            auth: AuthApi::new(http.clone()),
            files: FileApi::new(http.clone(), config.max_upload_bytes),
            admin: AdminApi::new(http.clone()),
            controller: ChatController::new(http.clone(), chats.clone(), realtime),
            chats,
            http,
            data_dir: data_dir.to_path_buf(),
            config,
        })
    }

    pub fn auth_path(&self) -> PathBuf {
        self.data_dir.join("auth.json")
    }
}
