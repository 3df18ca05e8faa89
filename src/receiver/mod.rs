/*!
 * Local webhook receiver
 *
 * A single-route HTTP endpoint that accepts audit-log deliveries and hands
 * them to the event store (and optionally a tail sink). Startup writes the
 * listener state snapshot; shutdown is driven by a cancellation token and
 * gets a bounded grace period to drain in-flight requests.
 */

pub mod decode;
pub mod handler;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::{self, DEFAULT_MAX_BODY_BYTES};
use crate::error::{RelayError, Result};
use crate::paths::AuditPaths;
use crate::store::{self, EventStore};
use crate::tail::RecordSink;

pub use handler::ReceiveError;

/// Grace period for in-flight requests once shutdown is requested
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub listen_address: String,
    pub path: String,
    pub max_body_bytes: u64,
    /// Expected `Authorization` header value; blank disables the check
    pub expected_authorization: String,
    pub public_url: Option<String>,
    pub profile: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen_address: config::DEFAULT_LISTEN_ADDRESS.to_string(),
            path: config::DEFAULT_LISTEN_PATH.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            expected_authorization: String::new(),
            public_url: None,
            profile: config::DEFAULT_PROFILE.to_string(),
        }
    }
}

/// Snapshot written once the socket is bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerState {
    pub started_at: DateTime<Utc>,
    pub profile: String,
    pub listen_address: String,
    pub listen_path: String,
    pub local_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    pub events_file: String,
}

pub(crate) struct ReceiverInner {
    pub(crate) path: String,
    pub(crate) max_body_bytes: u64,
    pub(crate) expected_authorization: String,
    pub(crate) store: Arc<EventStore>,
    pub(crate) sink: Option<Arc<dyn RecordSink>>,
}

/// Shared handler state
#[derive(Clone)]
pub struct ReceiverState {
    pub(crate) inner: Arc<ReceiverInner>,
}

pub struct Receiver {
    config: ReceiverConfig,
    paths: AuditPaths,
    state: ReceiverState,
}

impl Receiver {
    pub fn new(config: ReceiverConfig, paths: AuditPaths) -> Self {
        let inner = ReceiverInner {
            path: config::normalize_path(&config.path),
            max_body_bytes: if config.max_body_bytes == 0 {
                DEFAULT_MAX_BODY_BYTES
            } else {
                config.max_body_bytes
            },
            expected_authorization: config.expected_authorization.trim().to_string(),
            store: Arc::new(EventStore::new(&paths.events_file)),
            sink: None,
        };
        Self {
            config,
            paths,
            state: ReceiverState {
                inner: Arc::new(inner),
            },
        }
    }

    /// Forward every persisted batch to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        let current = &self.state.inner;
        self.state = ReceiverState {
            inner: Arc::new(ReceiverInner {
                path: current.path.clone(),
                max_body_bytes: current.max_body_bytes,
                expected_authorization: current.expected_authorization.clone(),
                store: Arc::clone(&current.store),
                sink: Some(sink),
            }),
        };
        self
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind the socket and record the listener state snapshot
    pub async fn bind(self) -> Result<BoundReceiver> {
        let address = config::parse_listen_address(&self.config.listen_address)?;
        let listener = TcpListener::bind(address).await.map_err(|e| {
            RelayError::execution(format!("failed to listen on {}", address), e)
        })?;
        let local_addr = listener.local_addr()?;
        let path = self.state.inner.path.clone();

        let state = ListenerState {
            started_at: Utc::now(),
            profile: self.config.profile.clone(),
            listen_address: local_addr.to_string(),
            listen_path: path.clone(),
            local_endpoint: format_local_endpoint(local_addr, &path),
            public_url: config::non_blank(self.config.public_url.as_deref()).map(str::to_string),
            events_file: self.paths.events_file.display().to_string(),
        };
        store::write_state(&self.paths.listener_state_file, &state)
            .map_err(|e| RelayError::execution("failed to write listener state", e))?;

        tracing::info!(
            listen_address = %state.listen_address,
            path = %state.listen_path,
            events_file = %state.events_file,
            "audit-log receiver listening"
        );

        Ok(BoundReceiver {
            listener,
            router: self.router(),
            state,
        })
    }
}

pub struct BoundReceiver {
    listener: TcpListener,
    router: Router,
    state: ListenerState,
}

impl BoundReceiver {
    pub fn state(&self) -> &ListenerState {
        &self.state
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` fires, then drain for up to `SHUTDOWN_GRACE`
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let BoundReceiver { listener, router, .. } = self;
        let graceful = shutdown.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .await
        });

        tokio::select! {
            joined = &mut server => return flatten_serve(joined),
            _ = shutdown.cancelled() => {
                tracing::debug!("audit-log receiver shutting down");
            }
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(joined) => flatten_serve(joined),
            Err(_) => {
                tracing::warn!(
                    grace_secs = SHUTDOWN_GRACE.as_secs(),
                    "in-flight requests did not drain in time; closing receiver"
                );
                server.abort();
                Ok(())
            }
        }
    }
}

fn flatten_serve(
    joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RelayError::execution("audit-log receiver failed", e)),
        Err(e) => Err(RelayError::Process(format!("audit-log receiver task failed: {}", e))),
    }
}

/// Single fallback route; the handler does its own path matching so that
/// every wrong path is a 404 and every wrong method is a 405.
pub fn build_router(state: ReceiverState) -> Router {
    Router::new()
        .fallback(handler::receive)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Endpoint a local client can reach: unspecified hosts become loopback
pub fn format_local_endpoint(addr: SocketAddr, path: &str) -> String {
    let host = match addr.ip() {
        ip if ip.is_unspecified() => "127.0.0.1".to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
        IpAddr::V4(v4) => v4.to_string(),
    };
    format!("http://{}:{}{}", host, addr.port(), config::normalize_path(path))
}
