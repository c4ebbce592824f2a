//! Reducer over the active chat's local state.
//!
//! All mutations of the cached conversation go through [`reduce`], whether
//! they come from REST responses, streamed socket events or user actions.

use std::collections::HashMap;
use chrono::{DateTime, Duration, Utc};
use crate::error::{ErrorBanner, ErrorKind};
use crate::models::{ChatMessage, MessageStatus, MessageType, Reaction};
use super::realtime::ConnectionStatus;

/// Optimistic messages are matched against server copies created no
/// earlier than this before the local insert.
const CLOCK_SKEW_SECS: i64 = 60;

pub const CONNECTION_LOST: &str = "Lost connection to the assistant. Reload the chat to try again.";

#[derive(Debug, Clone, PartialEq)]
pub struct StreamingMessage {
    pub message_id: String,
    pub content: String,
    pub last_sequence: Option<u64>,
    pub chunks: usize,
    pub started_at: DateTime<Utc>,
}

impl StreamingMessage {
    fn new(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            content: String::new(),
            last_sequence: None,
            chunks: 0,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatState {
    pub chat_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub streaming: HashMap<String, StreamingMessage>,
    pub suggestions: Vec<String>,
    pub connection: ConnectionStatus,
    pub error: Option<ErrorBanner>,
    pub sending: bool,
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            chat_id: None,
            messages: Vec::new(),
            streaming: HashMap::new(),
            suggestions: Vec::new(),
            connection: ConnectionStatus::Disconnected,
            error: None,
            sending: false,
        }
    }
}

impl ChatState {
    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// True while a send is in flight or any reply is still being produced.
    pub fn is_busy(&self) -> bool {
        self.sending
            || !self.streaming.is_empty()
            || self.messages.iter().any(|m| {
                matches!(m.status, MessageStatus::Pending | MessageStatus::Processing)
            })
    }
}

#[derive(Debug, Clone)]
pub enum ChatAction {
    Reset { chat_id: Option<String> },
    MessagesLoaded(Vec<ChatMessage>),
    OptimisticSend(ChatMessage),
    SendConfirmed {
        temp_id: String,
        message: ChatMessage,
        assistant: Option<ChatMessage>,
    },
    SendFailed { temp_id: String, error: ErrorBanner },
    Chunk {
        message_id: String,
        content: String,
        sequence: Option<u64>,
    },
    Complete {
        message_id: String,
        content: Option<String>,
        message: Option<ChatMessage>,
    },
    StreamError { message_id: Option<String>, error: String },
    Suggestions(Vec<String>),
    Connection(ConnectionStatus),
    ConnectionLost,
    ReactionAdded(Reaction),
    ShowError(ErrorBanner),
    DismissError,
}

pub fn reduce(state: &mut ChatState, action: ChatAction) {
    match action {
        ChatAction::Reset { chat_id } => {
            *state = ChatState {
                chat_id,
                ..ChatState::default()
            };
        }
        ChatAction::MessagesLoaded(server) => messages_loaded(state, server),
        ChatAction::OptimisticSend(message) => {
            state.suggestions.clear();
            state.sending = true;
            state.messages.push(message);
        }
        ChatAction::SendConfirmed {
            temp_id,
            message,
            assistant,
        } => {
            state.sending = false;
            let already_known = state.message(&message.id).is_some();
            match state.messages.iter().position(|m| m.id == temp_id) {
                Some(index) if already_known => {
                    state.messages.remove(index);
                }
                Some(index) => state.messages[index] = message,
                None if !already_known => state.messages.push(message),
                None => {}
            }

            if let Some(assistant) = assistant {
                if state.message(&assistant.id).is_none() {
                    state.messages.push(assistant);
                }
            }
        }
        ChatAction::SendFailed { temp_id, error } => {
            state.sending = false;
            if let Some(message) = state.message_mut(&temp_id) {
                message.status = MessageStatus::Failed;
            }
            state.error = Some(error);
        }
        ChatAction::Chunk {
            message_id,
            content,
            sequence,
        } => chunk_received(state, message_id, content, sequence),
        ChatAction::Complete {
            message_id,
            content,
            message,
        } => complete(state, message_id, content, message),
        ChatAction::StreamError { message_id, error } => {
            if let Some(id) = message_id {
                let partial = state.streaming.remove(&id).map(|b| b.content);
                match state.message_mut(&id) {
                    Some(message) => {
                        if let Some(partial) = partial.filter(|p| !p.is_empty()) {
                            message.content = partial;
                        }
                        message.status = MessageStatus::Failed;
                        message.updated_at = Some(Utc::now());
                    }
                    None => {
                        if let Some(partial) = partial.filter(|p| !p.is_empty()) {
                            let chat_id = state.chat_id.clone().unwrap_or_default();
                            state.messages.push(ai_message(&id, &chat_id, partial, MessageStatus::Failed));
                        }
                    }
                }
            }
            state.error = Some(ErrorBanner::transport(error));
        }
        ChatAction::Suggestions(suggestions) => state.suggestions = suggestions,
        ChatAction::Connection(status) => {
            match &status {
                ConnectionStatus::Failed => {
                    state.error = Some(ErrorBanner::transport(CONNECTION_LOST));
                }
                ConnectionStatus::Connected => {
                    let lost_banner = state
                        .error
                        .as_ref()
                        .is_some_and(|e| e.kind == ErrorKind::Transport && e.message == CONNECTION_LOST);
                    if lost_banner {
                        state.error = None;
                    }
                }
                _ => {}
            }
            state.connection = status;
        }
        ChatAction::ConnectionLost => state.streaming.clear(),
        ChatAction::ReactionAdded(reaction) => {
            if let Some(message) = state.message_mut(&reaction.message_id) {
                message
                    .reactions
                    .retain(|r| r.reaction_type != reaction.reaction_type);
                message.reactions.push(reaction);
            }
        }
        ChatAction::ShowError(banner) => state.error = Some(banner),
        ChatAction::DismissError => state.error = None,
    }
}

fn ai_message(id: &str, chat_id: &str, content: String, status: MessageStatus) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        chat_id: chat_id.to_string(),
        content,
        message_type: MessageType::Ai,
        status,
        files: Vec::new(),
        reactions: Vec::new(),
        created_at: Utc::now(),
        updated_at: None,
    }
}

fn messages_loaded(state: &mut ChatState, mut server: Vec<ChatMessage>) {
    let local_optimistic: Vec<ChatMessage> = state
        .messages
        .drain(..)
        .filter(|m| m.is_optimistic())
        .collect();

    let mut claimed = vec![false; server.len()];
    let mut survivors = Vec::new();
    for local in local_optimistic {
        let earliest = local.created_at - Duration::seconds(CLOCK_SKEW_SECS);
        let matched = server.iter().enumerate().position(|(i, m)| {
            !claimed[i]
                && m.message_type == MessageType::User
                && m.content == local.content
                && m.created_at >= earliest
        });
        match matched {
            Some(i) => claimed[i] = true,
            None => survivors.push(local),
        }
    }

    for message in &mut server {
        if message.status == MessageStatus::Completed {
            state.streaming.remove(&message.id);
        } else if state.streaming.contains_key(&message.id) {
            message.status = MessageStatus::Processing;
        }
    }

    server.extend(survivors);
    server.sort_by_key(|m| m.created_at);
    state.messages = server;
}

fn chunk_received(state: &mut ChatState, message_id: String, content: String, sequence: Option<u64>) {
    if state
        .message(&message_id)
        .is_some_and(|m| m.status == MessageStatus::Completed)
    {
        tracing::debug!(message_id = %message_id, "dropping chunk for completed message");
        return;
    }

    let buffer = state
        .streaming
        .entry(message_id.clone())
        .or_insert_with(|| StreamingMessage::new(&message_id));

    if let (Some(seq), Some(last)) = (sequence, buffer.last_sequence) {
        if seq <= last {
            tracing::debug!(message_id = %message_id, seq, last, "dropping duplicate chunk");
            return;
        }
    }

    buffer.content.push_str(&content);
    buffer.chunks += 1;
    if sequence.is_some() {
        buffer.last_sequence = sequence;
    }

    if let Some(message) = state.message_mut(&message_id) {
        message.status = MessageStatus::Processing;
    }
}

fn complete(
    state: &mut ChatState,
    message_id: String,
    content: Option<String>,
    message: Option<ChatMessage>,
) {
    let buffered = state.streaming.remove(&message_id).map(|b| b.content);
    let final_content = message
        .as_ref()
        .map(|m| m.content.clone())
        .or(content)
        .or(buffered);

    if let Some(mut authoritative) = message {
        authoritative.status = MessageStatus::Completed;
        match state.message_mut(&message_id) {
            Some(existing) => *existing = authoritative,
            None => state.messages.push(authoritative),
        }
        return;
    }

    match state.message_mut(&message_id) {
        Some(existing) => {
            if let Some(content) = final_content {
                existing.content = content;
            }
            existing.status = MessageStatus::Completed;
            existing.updated_at = Some(Utc::now());
        }
        None => {
            let chat_id = state.chat_id.clone().unwrap_or_default();
            state.messages.push(ai_message(
                &message_id,
                &chat_id,
                final_content.unwrap_or_default(),
                MessageStatus::Completed,
            ));
        }
    }
}

/// Messages as they should be shown right now: live streamed text merged
/// into its message, and buffers without a message yet appended at the end.
pub fn display_messages(state: &ChatState) -> Vec<ChatMessage> {
    let mut shown: Vec<ChatMessage> = state
        .messages
        .iter()
        .map(|m| match state.streaming.get(&m.id) {
            Some(buffer) => ChatMessage {
                content: buffer.content.clone(),
                status: MessageStatus::Processing,
                ..m.clone()
            },
            None => m.clone(),
        })
        .collect();

    let mut orphans: Vec<&StreamingMessage> = state
        .streaming
        .values()
        .filter(|b| state.message(&b.message_id).is_none())
        .collect();
    orphans.sort_by_key(|b| b.started_at);

    let chat_id = state.chat_id.clone().unwrap_or_default();
    shown.extend(orphans.into_iter().map(|b| {
        let mut message = ai_message(&b.message_id, &chat_id, b.content.clone(), MessageStatus::Processing);
        message.created_at = b.started_at;
        message
    }));
    shown
}

/// The assistant message answering `user_message_id`: the first `ai`
/// message after it in display order.
pub fn reply_after(state: &ChatState, user_message_id: &str) -> Option<ChatMessage> {
    display_messages(state)
        .into_iter()
        .skip_while(|m| m.id != user_message_id)
        .skip(1)
        .find(|m| m.message_type == MessageType::Ai)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReactionType;

    #[test]
    fn reply_is_the_next_ai_message() {
        let mut state = state_for("c1");
        reduce(
            &mut state,
            ChatAction::MessagesLoaded(vec![
                server_message("u1", MessageType::User, "q1", MessageStatus::Completed),
                server_message("a1", MessageType::Ai, "r1", MessageStatus::Completed),
                server_message("u2", MessageType::User, "q2", MessageStatus::Completed),
            ]),
        );
        assert_eq!(reply_after(&state, "u1").unwrap().id, "a1");
        assert!(reply_after(&state, "u2").is_none());

        reduce(&mut state, chunk("a2", "partial", Some(0)));
        let reply = reply_after(&state, "u2").unwrap();
        assert_eq!(reply.content, "partial");
        assert_eq!(reply.status, MessageStatus::Processing);
    }

    fn state_for(chat_id: &str) -> ChatState {
        let mut state = ChatState::default();
        reduce(&mut state, ChatAction::Reset { chat_id: Some(chat_id.to_string()) });
        state
    }

    fn server_message(id: &str, message_type: MessageType, content: &str, status: MessageStatus) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            chat_id: "c1".to_string(),
            content: content.to_string(),
            message_type,
            status,
            files: Vec::new(),
            reactions: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn chunk(id: &str, content: &str, sequence: Option<u64>) -> ChatAction {
        ChatAction::Chunk {
            message_id: id.to_string(),
            content: content.to_string(),
            sequence,
        }
    }

    #[test]
    fn chunks_accumulate_per_message() {
        let mut state = state_for("c1");
        reduce(&mut state, chunk("a1", "Your order ", Some(0)));
        reduce(&mut state, chunk("a2", "Other", None));
        reduce(&mut state, chunk("a1", "shipped.", Some(1)));

        assert_eq!(state.streaming["a1"].content, "Your order shipped.");
        assert_eq!(state.streaming["a2"].content, "Other");
        assert!(state.is_busy());
    }

    #[test]
    fn lost_connection_drops_partial_streams() {
        let mut state = state_for("c1");
        reduce(
            &mut state,
            ChatAction::MessagesLoaded(vec![server_message("u1", MessageType::User, "q1", MessageStatus::Completed)]),
        );
        reduce(&mut state, ChatAction::Connection(ConnectionStatus::Connected));
        reduce(&mut state, chunk("a1", "Your order ", Some(0)));
        assert!(state.is_busy());

        reduce(&mut state, ChatAction::ConnectionLost);

        assert!(state.streaming.is_empty());
        assert_eq!(state.messages.len(), 1);
        assert!(state.connection.is_live());
        assert!(reply_after(&state, "u1").is_none());
    }

    #[test]
    fn replayed_sequences_are_dropped() {
        let mut state = state_for("c1");
        reduce(&mut state, chunk("a1", "one ", Some(0)));
        reduce(&mut state, chunk("a1", "two ", Some(1)));
        reduce(&mut state, chunk("a1", "one ", Some(0)));
        reduce(&mut state, chunk("a1", "two ", Some(1)));
        reduce(&mut state, chunk("a1", "three", Some(2)));

        assert_eq!(state.streaming["a1"].content, "one two three");
        assert_eq!(state.streaming["a1"].chunks, 3);
    }

    #[test]
    fn completion_freezes_content_and_clears_the_buffer() {
        let mut state = state_for("c1");
        reduce(
            &mut state,
            ChatAction::MessagesLoaded(vec![server_message("a1", MessageType::Ai, "", MessageStatus::Processing)]),
        );
        reduce(&mut state, chunk("a1", "Hello", Some(0)));
        assert_eq!(display_messages(&state)[0].content, "Hello");

        reduce(
            &mut state,
            ChatAction::Complete {
                message_id: "a1".to_string(),
                content: None,
                message: None,
            },
        );

        assert!(state.streaming.is_empty());
        let message = state.message("a1").unwrap();
        assert_eq!(message.content, "Hello");
        assert_eq!(message.status, MessageStatus::Completed);
        assert!(!state.is_busy());

        // Late chunk after completion is ignored.
        reduce(&mut state, chunk("a1", " again", Some(1)));
        assert!(state.streaming.is_empty());
        assert_eq!(state.message("a1").unwrap().content, "Hello");
    }

    #[test]
    fn server_message_on_completion_is_authoritative() {
        let mut state = state_for("c1");
        reduce(&mut state, chunk("a1", "partial", Some(0)));
        let mut final_message = server_message("a1", MessageType::Ai, "Full answer [[doc:f1|Terms]]", MessageStatus::Processing);
        final_message.created_at = Utc::now();

        reduce(
            &mut state,
            ChatAction::Complete {
                message_id: "a1".to_string(),
                content: Some("ignored".to_string()),
                message: Some(final_message),
            },
        );

        let message = state.message("a1").unwrap();
        assert_eq!(message.content, "Full answer [[doc:f1|Terms]]");
        assert_eq!(message.status, MessageStatus::Completed);
    }

    #[test]
    fn optimistic_send_is_replaced_on_confirmation() {
        let mut state = state_for("c1");
        let optimistic = ChatMessage::optimistic("c1", "Where is PO 4471?", Vec::new());
        let temp_id = optimistic.id.clone();
        reduce(&mut state, ChatAction::OptimisticSend(optimistic));
        assert!(state.sending);

        reduce(
            &mut state,
            ChatAction::SendConfirmed {
                temp_id,
                message: server_message("u1", MessageType::User, "Where is PO 4471?", MessageStatus::Completed),
                assistant: Some(server_message("a1", MessageType::Ai, "", MessageStatus::Processing)),
            },
        );

        let ids: Vec<_> = state.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "a1"]);
        assert!(!state.sending);
    }

    #[test]
    fn reload_reconciles_optimistic_messages_without_duplicates() {
        let mut state = state_for("c1");
        let confirmed_later = ChatMessage::optimistic("c1", "hello", Vec::new());
        let still_pending = ChatMessage::optimistic("c1", "second question", Vec::new());
        let mut server_copy = server_message("u1", MessageType::User, "hello", MessageStatus::Completed);
        server_copy.created_at = confirmed_later.created_at;
        reduce(&mut state, ChatAction::OptimisticSend(confirmed_later));
        reduce(&mut state, ChatAction::OptimisticSend(still_pending.clone()));

        reduce(&mut state, ChatAction::MessagesLoaded(vec![server_copy]));

        let ids: Vec<_> = state.messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["u1".to_string(), still_pending.id]);
    }

    #[test]
    fn send_failure_marks_message_and_raises_banner() {
        let mut state = state_for("c1");
        let optimistic = ChatMessage::optimistic("c1", "hi", Vec::new());
        let temp_id = optimistic.id.clone();
        reduce(&mut state, ChatAction::OptimisticSend(optimistic));
        reduce(
            &mut state,
            ChatAction::SendFailed {
                temp_id: temp_id.clone(),
                error: ErrorBanner::transport("Network error"),
            },
        );

        assert_eq!(state.message(&temp_id).unwrap().status, MessageStatus::Failed);
        assert!(state.error.as_ref().unwrap().dismissible);

        reduce(&mut state, ChatAction::DismissError);
        assert!(state.error.is_none());
    }

    #[test]
    fn stream_error_keeps_partial_content() {
        let mut state = state_for("c1");
        reduce(&mut state, chunk("a1", "Half an ans", Some(0)));
        reduce(
            &mut state,
            ChatAction::StreamError {
                message_id: Some("a1".to_string()),
                error: "model overloaded".to_string(),
            },
        );

        let message = state.message("a1").unwrap();
        assert_eq!(message.content, "Half an ans");
        assert_eq!(message.status, MessageStatus::Failed);
        assert!(state.streaming.is_empty());
        assert_eq!(state.error.as_ref().unwrap().message, "model overloaded");
    }

    #[test]
    fn reload_keeps_live_streams_and_drops_finished_ones() {
        let mut state = state_for("c1");
        reduce(&mut state, chunk("a1", "streaming", Some(0)));
        reduce(&mut state, chunk("a2", "stale", Some(0)));

        reduce(
            &mut state,
            ChatAction::MessagesLoaded(vec![
                server_message("a1", MessageType::Ai, "", MessageStatus::Pending),
                server_message("a2", MessageType::Ai, "done text", MessageStatus::Completed),
            ]),
        );

        assert_eq!(state.message("a1").unwrap().status, MessageStatus::Processing);
        assert!(state.streaming.contains_key("a1"));
        assert!(!state.streaming.contains_key("a2"));
        assert_eq!(display_messages(&state)[1].content, "done text");
    }

    #[test]
    fn connection_failure_banner_clears_on_reconnect() {
        let mut state = state_for("c1");
        reduce(&mut state, ChatAction::Connection(ConnectionStatus::Failed));
        assert_eq!(state.error.as_ref().unwrap().message, CONNECTION_LOST);

        reduce(&mut state, ChatAction::Connection(ConnectionStatus::Connected));
        assert!(state.error.is_none());
        assert!(state.connection.is_live());
    }

    #[test]
    fn one_reaction_of_each_type_per_message() {
        let mut state = state_for("c1");
        reduce(
            &mut state,
            ChatAction::MessagesLoaded(vec![server_message("a1", MessageType::Ai, "x", MessageStatus::Completed)]),
        );
        for id in ["r1", "r2"] {
            reduce(
                &mut state,
                ChatAction::ReactionAdded(Reaction {
                    id: id.to_string(),
                    message_id: "a1".to_string(),
                    reaction_type: ReactionType::Like,
                    created_at: Utc::now(),
                }),
            );
        }

        let message = state.message("a1").unwrap();
        assert_eq!(message.reactions.len(), 1);
        assert_eq!(message.reaction(ReactionType::Like).unwrap().id, "r2");
    }

    #[test]
    fn orphan_streams_are_displayed_after_messages() {
        let mut state = state_for("c1");
        reduce(
            &mut state,
            ChatAction::MessagesLoaded(vec![server_message("u1", MessageType::User, "q", MessageStatus::Completed)]),
        );
        reduce(&mut state, chunk("a9", "thinking", None));

        let shown = display_messages(&state);
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[1].id, "a9");
        assert_eq!(shown[1].message_type, MessageType::Ai);
        assert_eq!(shown[1].status, MessageStatus::Processing);
    }

    #[test]
    fn reset_discards_everything() {
        let mut state = state_for("c1");
        reduce(&mut state, chunk("a1", "x", None));
        reduce(&mut state, ChatAction::Suggestions(vec!["Track my order".to_string()]));
        reduce(&mut state, ChatAction::Reset { chat_id: Some("c2".to_string()) });

        assert_eq!(state, state_for("c2"));
    }
}
