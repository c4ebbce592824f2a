use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use crate::models::{Chat, FileReference};
use crate::services::auth_service::{TokenResponse, UserInfo, UserRole};
use crate::services::realtime::ServerEvent;

/// Signing in with this username yields an admin account.
pub const ADMIN_USERNAME: &str = "admin";

const TOKEN_TTL_SECS: i64 = 3600;
const CHANNEL_CAPACITY: usize = 256;

pub struct Account {
    pub password: String,
    pub user: UserInfo,
}

pub struct StoredChat {
    pub owner: String,
    pub chat: Chat,
}

pub struct StoredFile {
    pub info: FileReference,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Everything the mock backend remembers. Lost when the process exits.
#[derive(Default)]
pub struct MockData {
    pub accounts: HashMap<String, Account>,
    pub sessions: HashMap<String, String>,
    pub refresh_tokens: HashMap<String, String>,
    pub chats: HashMap<String, StoredChat>,
    pub files: HashMap<String, StoredFile>,
}

impl MockData {
    /// Open a session for an existing account.
    pub fn issue_tokens(&mut self, username: &str) -> Option<TokenResponse> {
        let user = self.accounts.get(username)?.user.clone();

        let access_token = format!("mock-access-{}", uuid::Uuid::new_v4());
        let refresh_token = format!("mock-refresh-{}", uuid::Uuid::new_v4());
        self.sessions.insert(access_token.clone(), username.to_string());
        self.refresh_tokens.insert(refresh_token.clone(), username.to_string());

        Some(TokenResponse {
            access_token,
            refresh_token: Some(refresh_token),
            expires_in: TOKEN_TTL_SECS,
            user,
        })
    }

    pub fn add_account(&mut self, username: &str, email: Option<String>, password: &str) -> UserInfo {
        let role = if username == ADMIN_USERNAME {
            UserRole::Admin
        } else {
            UserRole::User
        };
        let user = UserInfo {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email,
            role,
        };
        self.accounts.insert(
            username.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    pub fn user_for_token(&self, token: &str) -> Option<UserInfo> {
        let username = self.sessions.get(token)?;
        self.accounts.get(username).map(|a| a.user.clone())
    }

    pub fn touch_chat(&mut self, chat_id: &str) {
        if let Some(stored) = self.chats.get_mut(chat_id) {
            stored.chat.updated_at = Utc::now();
        }
    }
}

pub struct MockState {
    data: RwLock<MockData>,
    channels: Mutex<HashMap<String, broadcast::Sender<ServerEvent>>>,
    chunk_delay: Duration,
}

impl MockState {
    pub fn new(chunk_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            data: RwLock::new(MockData::default()),
            channels: Mutex::new(HashMap::new()),
            chunk_delay,
        })
    }

    pub fn data(&self) -> &RwLock<MockData> {
        &self.data
    }

    pub fn chunk_delay(&self) -> Duration {
        self.chunk_delay
    }

    /// Subscribe to a chat's event stream.
    pub fn subscribe(&self, chat_id: &str) -> broadcast::Receiver<ServerEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(chat_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Push an event to every socket open on `chat_id`. A channel whose
    /// sockets have all gone away is dropped.
    pub fn publish(&self, chat_id: &str, event: ServerEvent) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = channels.get(chat_id) else {
            return;
        };
        if tx.send(event).is_err() {
            tracing::debug!(chat_id, "no open socket for chat event");
            channels.remove(chat_id);
        }
    }

    /// Forget a deleted chat's channel. Open sockets see the stream end.
    pub fn close_channel(&self, chat_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(chat_id);
    }

    #[cfg(test)]
    fn open_channels(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
