use std::sync::Arc;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info};
use crate::models::{
    preview, Chat, ChatMessage, ChatSummary, MessageStatus, MessageType, Reaction, ReactionType,
    SendMessageResponse,
};
use crate::services::realtime::ServerEvent;
use super::auth::current_user;
use super::error::MockError;
use super::state::{MockState, StoredChat};

const DEFAULT_TITLE: &str = "New chat";
const WORDS_PER_CHUNK: usize = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatRequest {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameChatRequest {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    content: String,
    #[serde(default)]
    file_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactionRequest {
    #[serde(rename = "type")]
    reaction_type: ReactionType,
}

pub fn routes() -> Router<Arc<MockState>> {
    Router::new()
        .route("/chats", get(list_chats).post(create_chat))
        .route("/chats/:id", get(get_chat).patch(rename_chat).delete(delete_chat))
        .route("/chats/:id/messages", get(get_messages).post(send_message))
        .route("/messages/:id/reactions", post(add_reaction))
}

fn owned_chat<'a>(
    chats: &'a std::collections::HashMap<String, StoredChat>,
    chat_id: &str,
    username: &str,
) -> Result<&'a Chat, MockError> {
    chats
        .get(chat_id)
        .filter(|stored| stored.owner == username)
        .map(|stored| &stored.chat)
        .ok_or(MockError::NotFound("Chat"))
}

async fn list_chats(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatSummary>>, MockError> {
    let user = current_user(&state, &headers).await?;
    let data = state.data().read().await;
    let chats = data
        .chats
        .values()
        .filter(|stored| stored.owner == user.username)
        .map(|stored| ChatSummary::from(&stored.chat))
        .collect();
    Ok(Json(chats))
}

async fn create_chat(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<Chat>), MockError> {
    let user = current_user(&state, &headers).await?;
    let now = Utc::now();
    let chat = Chat {
        id: uuid::Uuid::new_v4().to_string(),
        title: body
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        messages: Vec::new(),
        created_at: now,
        updated_at: now,
    };

    state.data().write().await.chats.insert(
        chat.id.clone(),
        StoredChat {
            owner: user.username.clone(),
            chat: chat.clone(),
        },
    );
    info!(chat_id = %chat.id, user = %user.username, "mock chat created");
    Ok((StatusCode::CREATED, Json(chat)))
}

async fn get_chat(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
) -> Result<Json<Chat>, MockError> {
    let user = current_user(&state, &headers).await?;
    let data = state.data().read().await;
    owned_chat(&data.chats, &chat_id, &user.username).map(|c| Json(c.clone()))
}

async fn rename_chat(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
    Json(body): Json<RenameChatRequest>,
) -> Result<Json<Chat>, MockError> {
    let user = current_user(&state, &headers).await?;
    let title = body.title.trim();
    if title.is_empty() {
        return Err(MockError::field("title", "Title cannot be empty"));
    }

    let mut data = state.data().write().await;
    owned_chat(&data.chats, &chat_id, &user.username)?;
    let stored = data
        .chats
        .get_mut(&chat_id)
        .ok_or(MockError::NotFound("Chat"))?;
    stored.chat.title = title.to_string();
    stored.chat.updated_at = Utc::now();
    Ok(Json(stored.chat.clone()))
}

async fn delete_chat(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
) -> Result<StatusCode, MockError> {
    let user = current_user(&state, &headers).await?;
    let mut data = state.data().write().await;
    owned_chat(&data.chats, &chat_id, &user.username)?;
    data.chats.remove(&chat_id);
    state.close_channel(&chat_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_messages(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, MockError> {
    let user = current_user(&state, &headers).await?;
    let data = state.data().read().await;
    owned_chat(&data.chats, &chat_id, &user.username).map(|c| Json(c.messages.clone()))
}

/// Store the user's message and an assistant placeholder, then stream the
/// reply over the chat's socket in the background.
async fn send_message(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<SendMessageResponse>), MockError> {
    let user = current_user(&state, &headers).await?;
    if body.content.trim().is_empty() && body.file_ids.is_empty() {
        return Err(MockError::field("content", "Message cannot be empty"));
    }

    let mut data = state.data().write().await;
    owned_chat(&data.chats, &chat_id, &user.username)?;

    let mut files = Vec::with_capacity(body.file_ids.len());
    for id in &body.file_ids {
        let file = data.files.get(id).ok_or(MockError::NotFound("File"))?;
        files.push(file.info.clone());
    }

    let now = Utc::now();
    let user_message = ChatMessage {
        id: uuid::Uuid::new_v4().to_string(),
        chat_id: chat_id.clone(),
        content: body.content.clone(),
        message_type: MessageType::User,
        status: MessageStatus::Completed,
        files,
        reactions: Vec::new(),
        created_at: now,
        updated_at: None,
    };
    let assistant_message = ChatMessage {
        id: uuid::Uuid::new_v4().to_string(),
        chat_id: chat_id.clone(),
        content: String::new(),
        message_type: MessageType::Ai,
        status: MessageStatus::Processing,
        files: Vec::new(),
        reactions: Vec::new(),
        created_at: now + chrono::Duration::milliseconds(1),
        updated_at: None,
    };

    if let Some(stored) = data.chats.get_mut(&chat_id) {
        stored.chat.messages.push(user_message.clone());
        stored.chat.messages.push(assistant_message.clone());
    }
    data.touch_chat(&chat_id);
    drop(data);

    let reply = compose_reply(&body.content);
    tokio::spawn(stream_reply(
        Arc::clone(&state),
        chat_id,
        assistant_message.id.clone(),
        reply,
    ));

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            user_message,
            assistant_message: Some(assistant_message),
        }),
    ))
}

async fn add_reaction(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
    Json(body): Json<ReactionRequest>,
) -> Result<(StatusCode, Json<Reaction>), MockError> {
    let user = current_user(&state, &headers).await?;
    let mut data = state.data().write().await;

    let message = data
        .chats
        .values_mut()
        .filter(|stored| stored.owner == user.username)
        .flat_map(|stored| stored.chat.messages.iter_mut())
        .find(|m| m.id == message_id)
        .ok_or(MockError::NotFound("Message"))?;

    if message.message_type != MessageType::Ai {
        return Err(MockError::BadRequest("Only assistant replies can be rated".to_string()));
    }

    let reaction = Reaction {
        id: uuid::Uuid::new_v4().to_string(),
        message_id: message_id.clone(),
        reaction_type: body.reaction_type,
        created_at: Utc::now(),
    };
    message.reactions.retain(|r| r.reaction_type != body.reaction_type);
    message.reactions.push(reaction.clone());
    debug!(message_id = %message_id, reaction = ?body.reaction_type, "mock reaction stored");
    Ok((StatusCode::CREATED, Json(reaction)))
}

fn compose_reply(question: &str) -> String {
    let page = rand::thread_rng().gen_range(1..=40);
    let topic = if question.trim().is_empty() {
        "your attachment".to_string()
    } else {
        format!("\"{}\"", preview(question, 60))
    };
    format!(
        "Thanks for asking about {}. Suppliers can find the details in \
         [[doc:supplier-handbook#page={}|Supplier handbook]]. If anything is \
         still unclear, open a ticket from the portal's help section.",
        topic, page
    )
}

/// Replay `reply` as sequenced chunks, then complete the stored message.
async fn stream_reply(state: Arc<MockState>, chat_id: String, message_id: String, reply: String) {
    let delay = state.chunk_delay();
    // Let the sender's socket subscribe before the first chunk.
    tokio::time::sleep(delay * 4).await;

    let words: Vec<&str> = reply.split_inclusive(' ').collect();
    for (sequence, chunk) in words.chunks(WORDS_PER_CHUNK).enumerate() {
        state.publish(
            &chat_id,
            ServerEvent::Chunk {
                message_id: message_id.clone(),
                content: chunk.concat(),
                sequence: Some(sequence as u64),
            },
        );
        tokio::time::sleep(delay).await;
    }

    let completed = {
        let mut data = state.data().write().await;
        let message = data
            .chats
            .get_mut(&chat_id)
            .and_then(|stored| stored.chat.messages.iter_mut().find(|m| m.id == message_id));
        let Some(message) = message else {
            debug!(chat_id = %chat_id, "chat removed while streaming");
            return;
        };
        message.content = reply.clone();
        message.status = MessageStatus::Completed;
        message.updated_at = Some(Utc::now());
        let completed = message.clone();
        data.touch_chat(&chat_id);
        completed
    };

    state.publish(
        &chat_id,
        ServerEvent::Complete {
            message_id: message_id.clone(),
            content: Some(reply),
            message: Some(completed),
        },
    );
    state.publish(
        &chat_id,
        ServerEvent::Suggestions {
            message_id: Some(message_id),
            suggestions: vec![
                "How do I update my bank details?".to_string(),
                "When will my invoice be paid?".to_string(),
            ],
        },
    );
}
