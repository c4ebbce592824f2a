//! In-memory stand-in for the supplier portal backend: the REST routes and
//! the chat streaming socket, served under `/api`. Used for local demos and
//! integration tests.

mod admin;
mod auth;
mod chats;
mod error;
mod files;
mod state;
mod ws;

pub use error::MockError;
pub use state::{MockState, ADMIN_USERNAME};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(40);

pub fn router(state: Arc<MockState>) -> Router {
    let api = Router::new()
        .merge(auth::routes())
        .merge(chats::routes())
        .merge(files::routes())
        .merge(admin::routes())
        .merge(ws::routes());

    Router::new().nest("/api", api).with_state(state)
}

/// A mock backend running in a background task. Dropping it stops the
/// server.
pub struct MockServer {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Bind `addr` and start serving.
    pub async fn start(addr: SocketAddr, chunk_delay: Duration) -> crate::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let app = router(MockState::new(chunk_delay));

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "mock backend stopped");
            }
        });
        info!(%local_addr, "mock backend listening");

        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn api_base_url(&self) -> String {
        format!("http://{}/api", self.local_addr)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
