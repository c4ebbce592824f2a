use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use super::FileReference;

/// Prefix for ids of messages inserted locally before the server confirmed them.
pub const TEMP_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Ai,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionType {
    Like,
    Dislike,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: String,
    pub message_id: String,
    #[serde(rename = "type")]
    pub reaction_type: ReactionType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub status: MessageStatus,
    #[serde(default)]
    pub files: Vec<FileReference>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Build a locally-owned user message awaiting server confirmation.
    pub fn optimistic(chat_id: &str, content: &str, files: Vec<FileReference>) -> Self {
        Self {
            id: format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            message_type: MessageType::User,
            status: MessageStatus::Pending,
            files,
            reactions: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    pub fn reaction(&self, reaction_type: ReactionType) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.reaction_type == reaction_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_message_preview: Option<String>,
}

impl From<&Chat> for ChatSummary {
    fn from(chat: &Chat) -> Self {
        Self {
            id: chat.id.clone(),
            title: chat.title.clone(),
            message_count: chat.messages.len(),
            updated_at: chat.updated_at,
            last_message_preview: chat.messages.last().map(|m| preview(&m.content, 80)),
        }
    }
}

/// Response to a message send: the confirmed user message and, when the
/// backend has already queued a reply, the assistant placeholder that will
/// be streamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub user_message: ChatMessage,
    #[serde(default)]
    pub assistant_message: Option<ChatMessage>,
}

pub fn preview(content: &str, max_chars: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max_chars {
        let head: String = flat.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        flat
    }
}
