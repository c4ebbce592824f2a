use serde::{Deserialize, Serialize};
use crate::error::Result;
use crate::models::ChatMessage;

/// Frames pushed by the backend on a chat's streaming connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Chunk {
        message_id: String,
        content: String,
        #[serde(default)]
        sequence: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        message_id: String,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        message: Option<ChatMessage>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default)]
        message_id: Option<String>,
        error: String,
    },
    Ping,
    Pong,
    #[serde(rename_all = "camelCase")]
    Suggestions {
        #[serde(default)]
        message_id: Option<String>,
        suggestions: Vec<String>,
    },
}

/// Frames the client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Ping,
    Pong,
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    #[serde(rename_all = "camelCase")]
    Reconnecting { attempt: u32, delay_ms: u64 },
    Disconnected,
    Failed,
}

impl ConnectionStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// What the socket task reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Status(ConnectionStatus),
    Server(ServerEvent),
}

pub fn parse_server_event(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, frame = %text, "ignoring unrecognised frame");
            None
        }
    }
}
