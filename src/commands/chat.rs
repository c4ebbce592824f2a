use std::path::PathBuf;
use std::time::Duration;
use crate::models::{Chat, ChatMessage, ChatSummary, Reaction, ReactionType, SendMessageResponse};
use crate::services::chat_state::display_messages;
use crate::state::AppState;

pub async fn list_chats(state: &AppState) -> Result<Vec<ChatSummary>, String> {
    state.chats.list_chats().await.map_err(|e| e.to_string())
}

pub async fn create_chat(state: &AppState, title: Option<String>) -> Result<Chat, String> {
    state
        .chats
        .create_chat(title.as_deref())
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_chat(state: &AppState, chat_id: String) -> Result<Chat, String> {
    state.chats.get_chat(&chat_id).await.map_err(|e| e.to_string())
}

pub async fn rename_chat(state: &AppState, chat_id: String, title: String) -> Result<Chat, String> {
    state
        .chats
        .rename_chat(&chat_id, &title)
        .await
        .map_err(|e| e.to_string())
}

pub async fn delete_chat(state: &AppState, chat_id: String) -> Result<(), String> {
    let is_open = state.controller.store().snapshot().chat_id.as_deref() == Some(chat_id.as_str());
    if is_open {
        state.controller.close().await;
    }
    state.chats.delete_chat(&chat_id).await.map_err(|e| e.to_string())
}

/// Make `chat_id` the active chat and return its messages for display.
pub async fn open_chat(state: &AppState, chat_id: String) -> Result<Vec<ChatMessage>, String> {
    state
        .controller
        .open_chat(&chat_id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(display_messages(&state.controller.store().snapshot()))
}

/// Upload `attachments`, then send the message in the active chat.
pub async fn send_chat_message(
    state: &AppState,
    content: String,
    attachments: Vec<PathBuf>,
) -> Result<SendMessageResponse, String> {
    let mut files = Vec::with_capacity(attachments.len());
    for path in &attachments {
        let file = state.files.upload(path).await.map_err(|e| e.to_string())?;
        files.push(file);
    }

    state
        .controller
        .send_message(&content, files)
        .await
        .map_err(|e| e.to_string())
}

pub async fn wait_for_reply(
    state: &AppState,
    user_message_id: String,
    timeout: Duration,
) -> Result<ChatMessage, String> {
    state
        .controller
        .wait_for_reply(&user_message_id, timeout)
        .await
        .map_err(|e| e.to_string())
}

pub async fn react_to_message(
    state: &AppState,
    message_id: String,
    reaction_type: ReactionType,
) -> Result<Reaction, String> {
    state
        .controller
        .react(&message_id, reaction_type)
        .await
        .map_err(|e| e.to_string())
}

pub async fn close_chat(state: &AppState) {
    state.controller.close().await;
}

/// Refetch the active chat's history and reconcile it with the live state.
pub async fn reload_chat(state: &AppState) -> Result<Vec<ChatMessage>, String> {
    state.controller.reload().await.map_err(|e| e.to_string())?;
    Ok(display_messages(&state.controller.store().snapshot()))
}

pub fn dismiss_chat_error(state: &AppState) {
    state.controller.dismiss_error();
}
