//! Owns the active chat: its socket, its event pump and its reactive state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use crate::error::{Error, ErrorBanner, Result};
use crate::models::{ChatMessage, FileReference, MessageStatus, Reaction, ReactionType, SendMessageResponse};
use super::api_client::ApiClient;
use super::chat_api::{validate_message, ChatApi};
use super::chat_state::{reduce, reply_after, ChatAction, ChatState};
use super::realtime::{ConnectionHandle, ConnectionStatus, RealtimeEvent, ServerEvent, WebSocketService};

const CONNECT_WAIT: Duration = Duration::from_secs(5);

/// Reactive container for [`ChatState`]. Every change goes through the
/// reducer; watchers are woken after each dispatch.
#[derive(Debug, Clone)]
pub struct ChatStore {
    state: Arc<watch::Sender<ChatState>>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self {
            state: Arc::new(state),
        }
    }

    pub fn dispatch(&self, action: ChatAction) {
        self.state.send_modify(|state| reduce(state, action));
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub async fn wait_until(
        &self,
        timeout: Duration,
        pred: impl FnMut(&ChatState) -> bool,
    ) -> Result<ChatState> {
        let mut rx = self.subscribe();
        let state = tokio::time::timeout(timeout, rx.wait_for(pred))
            .await
            .map_err(|_| Error::Realtime("Timed out waiting for the assistant".to_string()))?
            .map_err(|_| Error::Realtime("Chat state closed".to_string()))?;
        Ok(state.clone())
    }
}

struct ActiveChat {
    connection: ConnectionHandle,
    pump: JoinHandle<()>,
}

pub struct ChatController {
    http: ApiClient,
    chats: ChatApi,
    realtime: WebSocketService,
    store: ChatStore,
    active: Mutex<Option<ActiveChat>>,
}

impl ChatController {
    pub fn new(http: ApiClient, chats: ChatApi, realtime: WebSocketService) -> Self {
        Self {
            http,
            chats,
            realtime,
            store: ChatStore::new(),
            active: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    /// Switch to `chat_id`: drop the previous chat's socket and state, load
    /// the history and start streaming.
    pub async fn open_chat(&self, chat_id: &str) -> Result<()> {
        self.close().await;
        self.store.dispatch(ChatAction::Reset {
            chat_id: Some(chat_id.to_string()),
        });

        let messages = match self.chats.get_messages(chat_id).await {
            Ok(messages) => messages,
            Err(e) => {
                self.store.dispatch(ChatAction::ShowError(ErrorBanner::from_error(&e)));
                return Err(e);
            }
        };
        self.store.dispatch(ChatAction::MessagesLoaded(messages));

        let (connection, events) = self.realtime.connect(chat_id, self.http.token().as_deref())?;
        let pump = tokio::spawn(pump_events(
            chat_id.to_string(),
            events,
            self.store.clone(),
            self.chats.clone(),
        ));

        *self.active.lock().await = Some(ActiveChat { connection, pump });

        // Streamed replies are only delivered to live sockets, so give the
        // first connection a chance before the caller starts sending.
        let settled = self
            .store
            .wait_until(CONNECT_WAIT, |s| {
                matches!(s.connection, ConnectionStatus::Connected | ConnectionStatus::Failed)
            })
            .await;
        match settled {
            Ok(state) if state.connection.is_live() => tracing::debug!(chat_id, "chat opened"),
            _ => tracing::warn!(chat_id, "chat opened without a live connection"),
        }
        Ok(())
    }

    pub async fn reload(&self) -> Result<()> {
        let chat_id = self.current_chat_id()?;
        let messages = self.chats.get_messages(&chat_id).await?;
        self.store.dispatch(ChatAction::MessagesLoaded(messages));
        Ok(())
    }

    fn current_chat_id(&self) -> Result<String> {
        self.store
            .snapshot()
            .chat_id
            .ok_or_else(|| Error::validation("chat", "No chat is open"))
    }

    /// Insert the message optimistically, then confirm or fail it with the
    /// server's answer.
    pub async fn send_message(
        &self,
        content: &str,
        files: Vec<FileReference>,
    ) -> Result<SendMessageResponse> {
        let chat_id = self.current_chat_id()?;
        let file_ids: Vec<String> = files.iter().map(|f| f.id.clone()).collect();
        validate_message(content, &file_ids)?;

        let optimistic = ChatMessage::optimistic(&chat_id, content, files);
        let temp_id = optimistic.id.clone();
        self.store.dispatch(ChatAction::OptimisticSend(optimistic));

        match self.chats.send_message(&chat_id, content, &file_ids).await {
            Ok(response) => {
                self.store.dispatch(ChatAction::SendConfirmed {
                    temp_id,
                    message: response.user_message.clone(),
                    assistant: response.assistant_message.clone(),
                });
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "message send failed");
                self.store.dispatch(ChatAction::SendFailed {
                    temp_id,
                    error: ErrorBanner::from_error(&e),
                });
                Err(e)
            }
        }
    }

    /// Wait until the reply to `user_message_id` has completed or failed.
    pub async fn wait_for_reply(&self, user_message_id: &str, timeout: Duration) -> Result<ChatMessage> {
        let state = self
            .store
            .wait_until(timeout, |state| {
                state.connection == ConnectionStatus::Failed
                    || reply_after(state, user_message_id).is_some_and(|m| {
                        matches!(m.status, MessageStatus::Completed | MessageStatus::Failed)
                    })
            })
            .await?;

        match reply_after(&state, user_message_id) {
            Some(reply) if reply.status == MessageStatus::Completed => Ok(reply),
            Some(_) => Err(Error::Realtime(
                state
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "The assistant reply failed".to_string()),
            )),
            None => Err(Error::Realtime("Lost connection before the reply arrived".to_string())),
        }
    }

    pub async fn react(&self, message_id: &str, reaction_type: ReactionType) -> Result<Reaction> {
        let reaction = self.chats.add_reaction(message_id, reaction_type).await?;
        self.store.dispatch(ChatAction::ReactionAdded(reaction.clone()));
        Ok(reaction)
    }

    pub fn dismiss_error(&self) {
        self.store.dispatch(ChatAction::DismissError);
    }

    /// Disconnect the active chat, if any.
    pub async fn close(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            tracing::debug!(chat_id = %active.connection.chat_id(), "closing chat");
            active.connection.close().await;
            active.pump.abort();
        }
    }
}

/// Apply socket events to the store. After a reconnect the streaming
/// buffers are dropped and the history is re-fetched.
async fn pump_events(
    chat_id: String,
    mut events: mpsc::UnboundedReceiver<RealtimeEvent>,
    store: ChatStore,
    chats: ChatApi,
) {
    let mut needs_resync = false;

    while let Some(event) = events.recv().await {
        match event {
            RealtimeEvent::Status(status) => {
                let connected = status == ConnectionStatus::Connected;
                if matches!(status, ConnectionStatus::Reconnecting { .. }) {
                    store.dispatch(ChatAction::ConnectionLost);
                    needs_resync = true;
                }
                store.dispatch(ChatAction::Connection(status));

                if connected && needs_resync {
                    needs_resync = false;
                    match chats.get_messages(&chat_id).await {
                        Ok(messages) => store.dispatch(ChatAction::MessagesLoaded(messages)),
                        Err(e) => tracing::warn!(chat_id = %chat_id, error = %e, "resync after reconnect failed"),
                    }
                }
            }
            RealtimeEvent::Server(event) => match event {
                ServerEvent::Chunk {
                    message_id,
                    content,
                    sequence,
                } => store.dispatch(ChatAction::Chunk {
                    message_id,
                    content,
                    sequence,
                }),
                ServerEvent::Complete {
                    message_id,
                    content,
                    message,
                } => store.dispatch(ChatAction::Complete {
                    message_id,
                    content,
                    message,
                }),
                ServerEvent::Error { message_id, error } => {
                    tracing::warn!(chat_id = %chat_id, error = %error, "assistant reported an error");
                    store.dispatch(ChatAction::StreamError { message_id, error });
                }
                ServerEvent::Suggestions { suggestions, .. } => {
                    store.dispatch(ChatAction::Suggestions(suggestions))
                }
                ServerEvent::Ping | ServerEvent::Pong => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockServer;
    use crate::models::MessageType;
    use crate::services::auth_service::{AuthApi, LoginForm};

    async fn signed_in(server: &MockServer) -> ChatApi {
        let http = ApiClient::new(&server.api_base_url(), Duration::from_secs(10)).unwrap();
        let form = LoginForm {
            username: "acme-supplier".to_string(),
            password: "correct horse".to_string(),
        };
        let tokens = AuthApi::new(http.clone()).login(&form).await.unwrap();
        http.set_token(Some(tokens.access_token));
        ChatApi::new(http)
    }

    async fn completed_reply(chats: &ChatApi, chat_id: &str) -> ChatMessage {
        for _ in 0..200 {
            let messages = chats.get_messages(chat_id).await.unwrap();
            if let Some(reply) = messages
                .into_iter()
                .find(|m| m.message_type == MessageType::Ai && m.status == MessageStatus::Completed)
            {
                return reply;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("assistant never finished replying");
    }

    #[tokio::test]
    async fn reconnect_drops_partial_streams_and_refetches_history() {
        let server = MockServer::start("127.0.0.1:0".parse().unwrap(), Duration::from_millis(1))
            .await
            .unwrap();
        let chats = signed_in(&server).await;
        let chat = chats.create_chat(Some("Deliveries")).await.unwrap();
        chats.send_message(&chat.id, "Where is PO 4471?", &[]).await.unwrap();
        let reply = completed_reply(&chats, &chat.id).await;

        let store = ChatStore::new();
        store.dispatch(ChatAction::Reset {
            chat_id: Some(chat.id.clone()),
        });
        store.dispatch(ChatAction::Connection(ConnectionStatus::Connected));
        store.dispatch(ChatAction::Chunk {
            message_id: reply.id.clone(),
            content: "Where is".to_string(),
            sequence: Some(0),
        });
        assert_eq!(store.snapshot().streaming.len(), 1);

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_events(chat.id.clone(), rx, store.clone(), chats.clone()));

        tx.send(RealtimeEvent::Status(ConnectionStatus::Reconnecting {
            attempt: 1,
            delay_ms: 1000,
        }))
        .unwrap();
        let lost = store
            .wait_until(Duration::from_secs(5), |s| {
                matches!(s.connection, ConnectionStatus::Reconnecting { .. })
            })
            .await
            .unwrap();
        assert!(lost.streaming.is_empty());
        assert!(lost.messages.is_empty());

        tx.send(RealtimeEvent::Status(ConnectionStatus::Connected)).unwrap();
        let synced = store
            .wait_until(Duration::from_secs(5), |s| s.messages.len() == 2)
            .await
            .unwrap();
        assert!(synced.connection.is_live());
        assert!(synced.streaming.is_empty());
        assert_eq!(synced.messages[1].id, reply.id);
        assert_eq!(synced.messages[1].content, reply.content);

        drop(tx);
        pump.await.unwrap();
    }
}
