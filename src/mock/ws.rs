use std::sync::Arc;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use crate::services::realtime::{parse_server_event, ServerEvent};
use super::auth::user_for_token;
use super::error::MockError;
use super::state::MockState;

#[derive(Debug, Deserialize)]
struct SocketParams {
    token: Option<String>,
}

pub fn routes() -> Router<Arc<MockState>> {
    Router::new().route("/ws/chats/:id", get(chat_socket))
}

async fn chat_socket(
    State(state): State<Arc<MockState>>,
    Path(chat_id): Path<String>,
    Query(params): Query<SocketParams>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, MockError> {
    let token = params
        .token
        .ok_or_else(|| MockError::Unauthorized("Missing token".to_string()))?;
    let user = user_for_token(&state, &token).await?;

    let owned = state
        .data()
        .read()
        .await
        .chats
        .get(&chat_id)
        .is_some_and(|stored| stored.owner == user.username);
    if !owned {
        return Err(MockError::NotFound("Chat"));
    }

    // Subscribed before the handshake so events sent right after connect arrive.
    let events = state.subscribe(&chat_id);
    debug!(chat_id = %chat_id, user = %user.username, "mock socket opened");
    Ok(upgrade.on_upgrade(move |socket| session(socket, chat_id, events)))
}

async fn session(socket: WebSocket, chat_id: String, events: broadcast::Receiver<ServerEvent>) {
    let (mut sink, mut stream) = socket.split();
    let mut events = BroadcastStream::new(events);

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(event)) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "failed to encode chat event");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(chat_id = %chat_id, skipped, "mock socket lagged behind");
                }
                None => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if parse_server_event(&text) == Some(ServerEvent::Ping) {
                        let Ok(pong) = serde_json::to_string(&ServerEvent::Pong) else {
                            continue;
                        };
                        if sink.send(Message::Text(pong)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(chat_id = %chat_id, error = %e, "mock socket error");
                    break;
                }
            },
        }
    }

    debug!(chat_id = %chat_id, "mock socket closed");
}
