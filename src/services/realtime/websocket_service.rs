use std::time::Duration;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use crate::error::{Error, Result};
use crate::services::api_client::segment;
use crate::services::config_service::RealtimeConfig;
use super::backoff::Backoff;
use super::events::{parse_server_event, ClientEvent, ConnectionStatus, RealtimeEvent, ServerEvent};

/// Timing knobs for one streaming connection.
#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    pub backoff: Backoff,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl From<&RealtimeConfig> for RealtimeOptions {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            backoff: Backoff::from_config(config),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs.max(1)),
        }
    }
}

/// Opens one streaming socket per chat and keeps it alive.
#[derive(Debug, Clone)]
pub struct WebSocketService {
    ws_base_url: String,
    options: RealtimeOptions,
}

/// Owner side of a running connection. Dropping it stops the socket task.
#[derive(Debug)]
pub struct ConnectionHandle {
    chat_id: String,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Close the socket without reconnecting.
    pub fn disconnect(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Disconnect and wait for the socket task to wind down.
    pub async fn close(mut self) {
        self.disconnect();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

enum SessionEnd {
    /// The owner asked us to stop, or stopped listening.
    Shutdown,
    /// The server closed normally; do not reconnect.
    Closed,
    /// Anything else; reconnect with backoff.
    Lost(String),
}

impl WebSocketService {
    pub fn new(ws_base_url: &str, options: RealtimeOptions) -> Self {
        Self {
            ws_base_url: ws_base_url.trim_end_matches('/').to_string(),
            options,
        }
    }

    pub fn chat_url(&self, chat_id: &str, token: Option<&str>) -> Result<String> {
        let mut url = url::Url::parse(&format!("{}/ws/chats/{}", self.ws_base_url, segment(chat_id)))
            .map_err(|e| Error::Config(format!("Invalid websocket URL: {}", e)))?;
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url.into())
    }

    /// Spawn the socket task for `chat_id`. Events arrive on the returned
    /// receiver until the connection is closed or gives up.
    pub fn connect(
        &self,
        chat_id: &str,
        token: Option<&str>,
    ) -> Result<(ConnectionHandle, mpsc::UnboundedReceiver<RealtimeEvent>)> {
        let url = self.chat_url(chat_id, token)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_connection(
            chat_id.to_string(),
            url,
            self.options.clone(),
            tx,
            shutdown_rx,
        ));

        Ok((
            ConnectionHandle {
                chat_id: chat_id.to_string(),
                shutdown,
                task: Some(task),
            },
            rx,
        ))
    }
}

fn emit(tx: &mpsc::UnboundedSender<RealtimeEvent>, event: RealtimeEvent) -> bool {
    tx.send(event).is_ok()
}

async fn run_connection(
    chat_id: String,
    url: String,
    options: RealtimeOptions,
    tx: mpsc::UnboundedSender<RealtimeEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = options.backoff.clone();
    backoff.reset();

    if !emit(&tx, RealtimeEvent::Status(ConnectionStatus::Connecting)) {
        return;
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        let connected = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((stream, _)) => {
                backoff.reset();
                tracing::info!(chat_id = %chat_id, "realtime connected");
                if !emit(&tx, RealtimeEvent::Status(ConnectionStatus::Connected)) {
                    return;
                }

                match drive_session(stream, &options, &tx, &mut shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Closed => {
                        tracing::info!(chat_id = %chat_id, "realtime closed by server");
                        break;
                    }
                    SessionEnd::Lost(reason) => {
                        tracing::warn!(chat_id = %chat_id, reason = %reason, "realtime connection lost");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "realtime connect failed");
            }
        }

        let Some(delay) = backoff.next_delay() else {
            tracing::error!(chat_id = %chat_id, attempts = backoff.attempt(), "giving up on realtime connection");
            emit(&tx, RealtimeEvent::Status(ConnectionStatus::Failed));
            return;
        };

        let status = ConnectionStatus::Reconnecting {
            attempt: backoff.attempt(),
            delay_ms: delay.as_millis() as u64,
        };
        if !emit(&tx, RealtimeEvent::Status(status)) {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    emit(&tx, RealtimeEvent::Status(ConnectionStatus::Disconnected));
}

async fn send_event<K>(sink: &mut K, event: ClientEvent) -> Result<()>
where
    K: futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = event.to_json()?;
    sink.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| Error::Realtime(e.to_string()))
}

async fn drive_session<S>(
    stream: WebSocketStream<S>,
    options: &RealtimeOptions,
    tx: &mpsc::UnboundedSender<RealtimeEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut source) = stream.split();

    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + options.heartbeat_interval,
        options.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let close = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                };
                let _ = sink.send(WsMessage::Close(Some(close))).await;
                return SessionEnd::Shutdown;
            }
            _ = heartbeat.tick() => {
                if let Err(e) = send_event(&mut sink, ClientEvent::Ping).await {
                    return SessionEnd::Lost(format!("heartbeat send failed: {}", e));
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + options.heartbeat_timeout);
                }
            }
            _ = sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                return SessionEnd::Lost("heartbeat timed out".to_string());
            }
            frame = source.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match parse_server_event(&text.to_string()) {
                    Some(ServerEvent::Pong) => pong_deadline = None,
                    Some(ServerEvent::Ping) => {
                        if let Err(e) = send_event(&mut sink, ClientEvent::Pong).await {
                            return SessionEnd::Lost(format!("pong send failed: {}", e));
                        }
                    }
                    Some(event) => {
                        if !emit(tx, RealtimeEvent::Server(event)) {
                            return SessionEnd::Shutdown;
                        }
                    }
                    None => {}
                },
                Some(Ok(WsMessage::Pong(_))) => pong_deadline = None,
                Some(Ok(WsMessage::Close(frame))) => {
                    return match frame {
                        Some(f) if f.code == CloseCode::Normal => SessionEnd::Closed,
                        Some(f) => SessionEnd::Lost(format!("closed with code {}", u16::from(f.code))),
                        None => SessionEnd::Lost("closed without status".to_string()),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                None => return SessionEnd::Lost("stream ended".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn fast_options(max_attempts: u32) -> RealtimeOptions {
        RealtimeOptions {
            backoff: Backoff::new(Duration::from_millis(10), Duration::from_millis(50), max_attempts)
                .without_jitter(),
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("ws://{}", listener.local_addr().unwrap());
        (listener, base)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<RealtimeEvent>) -> RealtimeEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn wait_for_status(
        rx: &mut mpsc::UnboundedReceiver<RealtimeEvent>,
        pred: impl Fn(&ConnectionStatus) -> bool,
    ) -> Vec<RealtimeEvent> {
        let mut seen = Vec::new();
        loop {
            let event = next_event(rx).await;
            let done = matches!(&event, RealtimeEvent::Status(s) if pred(s));
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    fn chunk(id: &str, content: &str, sequence: u64) -> String {
        serde_json::json!({ "type": "chunk", "messageId": id, "content": content, "sequence": sequence })
            .to_string()
    }

    fn normal_close() -> WsMessage {
        WsMessage::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        }))
    }

    #[test]
    fn chat_url_carries_token() {
        let service = WebSocketService::new("wss://portal.example.com/api/", fast_options(1));
        assert_eq!(
            service.chat_url("chat 1", Some("a+b")).unwrap(),
            "wss://portal.example.com/api/ws/chats/chat%201?token=a%2Bb"
        );
    }

    #[tokio::test]
    async fn streams_events_until_normal_close() {
        let (listener, base) = bind().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(WsMessage::Text(chunk("m1", "Hel", 0).into())).await.unwrap();
            ws.send(WsMessage::Text(chunk("m1", "lo", 1).into())).await.unwrap();
            ws.send(WsMessage::Text(r#"{"type":"complete","messageId":"m1"}"#.to_string().into()))
                .await
                .unwrap();
            ws.send(normal_close()).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let service = WebSocketService::new(&base, fast_options(3));
        let (_handle, mut rx) = service.connect("c1", None).unwrap();
        let events = wait_for_status(&mut rx, |s| *s == ConnectionStatus::Disconnected).await;

        assert_eq!(events[0], RealtimeEvent::Status(ConnectionStatus::Connecting));
        assert_eq!(events[1], RealtimeEvent::Status(ConnectionStatus::Connected));
        assert_eq!(
            events[2],
            RealtimeEvent::Server(ServerEvent::Chunk {
                message_id: "m1".to_string(),
                content: "Hel".to_string(),
                sequence: Some(0),
            })
        );
        assert!(matches!(events[4], RealtimeEvent::Server(ServerEvent::Complete { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, RealtimeEvent::Status(ConnectionStatus::Reconnecting { .. }))));
    }

    #[tokio::test]
    async fn reconnects_after_abnormal_close() {
        let (listener, base) = bind().await;
        tokio::spawn(async move {
            // First session: drop the socket without a close handshake.
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            drop(ws);

            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(WsMessage::Text(chunk("m2", "again", 0).into())).await.unwrap();
            ws.send(normal_close()).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let service = WebSocketService::new(&base, fast_options(5));
        let (_handle, mut rx) = service.connect("c1", None).unwrap();
        let events = wait_for_status(&mut rx, |s| *s == ConnectionStatus::Disconnected).await;

        let connected = events
            .iter()
            .filter(|e| **e == RealtimeEvent::Status(ConnectionStatus::Connected))
            .count();
        assert_eq!(connected, 2);
        assert!(events.contains(&RealtimeEvent::Status(ConnectionStatus::Reconnecting {
            attempt: 1,
            delay_ms: 10,
        })));
        assert!(events
            .iter()
            .any(|e| matches!(e, RealtimeEvent::Server(ServerEvent::Chunk { content, .. }) if content == "again")));
    }

    #[tokio::test]
    async fn missed_heartbeat_forces_reconnect() {
        let (listener, base) = bind().await;
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            loop {
                let (tcp, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    // Read pings but never answer them.
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await {
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                });
            }
        });

        let options = RealtimeOptions {
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_timeout: Duration::from_millis(100),
            ..fast_options(5)
        };
        let service = WebSocketService::new(&base, options);
        let (handle, mut rx) = service.connect("c1", None).unwrap();

        wait_for_status(&mut rx, |s| matches!(s, ConnectionStatus::Reconnecting { .. })).await;
        wait_for_status(&mut rx, |s| *s == ConnectionStatus::Connected).await;
        assert!(accepted.load(Ordering::SeqCst) >= 2);

        handle.close().await;
    }

    #[tokio::test]
    async fn answered_heartbeats_keep_the_session() {
        let (listener, base) = bind().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let WsMessage::Text(text) = msg {
                    if text.to_string().contains("ping") {
                        let _ = ws.send(WsMessage::Text(r#"{"type":"pong"}"#.to_string().into())).await;
                    }
                }
            }
        });

        let options = RealtimeOptions {
            heartbeat_interval: Duration::from_millis(30),
            heartbeat_timeout: Duration::from_millis(200),
            ..fast_options(5)
        };
        let service = WebSocketService::new(&base, options);
        let (handle, mut rx) = service.connect("c1", None).unwrap();
        wait_for_status(&mut rx, |s| *s == ConnectionStatus::Connected).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        handle.disconnect();
        let events = wait_for_status(&mut rx, |s| *s == ConnectionStatus::Disconnected).await;
        assert!(!events
            .iter()
            .any(|e| matches!(e, RealtimeEvent::Status(ConnectionStatus::Reconnecting { .. }))));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (listener, base) = bind().await;
        drop(listener);

        let service = WebSocketService::new(&base, fast_options(2));
        let (handle, mut rx) = service.connect("c1", None).unwrap();
        let events = wait_for_status(&mut rx, |s| *s == ConnectionStatus::Failed).await;

        assert_eq!(
            events,
            vec![
                RealtimeEvent::Status(ConnectionStatus::Connecting),
                RealtimeEvent::Status(ConnectionStatus::Reconnecting { attempt: 1, delay_ms: 10 }),
                RealtimeEvent::Status(ConnectionStatus::Reconnecting { attempt: 2, delay_ms: 20 }),
                RealtimeEvent::Status(ConnectionStatus::Failed),
            ]
        );
        handle.close().await;
    }
}
