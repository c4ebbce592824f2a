//! Streaming connection to the assistant backend.

mod backoff;
mod events;
mod websocket_service;

pub use backoff::Backoff;
pub use events::{parse_server_event, ClientEvent, ConnectionStatus, RealtimeEvent, ServerEvent};
pub use websocket_service::{ConnectionHandle, RealtimeOptions, WebSocketService};
