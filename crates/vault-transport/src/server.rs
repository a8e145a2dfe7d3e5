//! HTTP transport server using Axum.
//!
//! One POST to `/mcp` carries one JSON-RPC message; the session id travels
//! in the `Mcp-Session-Id` header both ways. GET serves endpoint discovery,
//! DELETE closes a session explicitly. All lifecycle decisions live behind
//! the `SessionHandler` trait — the transport only moves bytes and headers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use vault_protocol::SESSION_HEADER;

/// Trait implemented by the request router to handle decoded HTTP calls.
pub trait SessionHandler: Send + Sync + 'static {
    /// Handle a POST body carrying one JSON-RPC message.
    fn handle_post(
        &self,
        session_id: Option<String>,
        body: String,
    ) -> impl std::future::Future<Output = HttpReply> + Send;

    /// Handle an explicit session close (DELETE).
    fn handle_delete(
        &self,
        session_id: Option<String>,
    ) -> impl std::future::Future<Output = HttpReply> + Send;

    /// Endpoint-discovery payload for GET.
    fn discovery(&self) -> serde_json::Value;

    /// Health payload with live counters.
    fn health(&self) -> serde_json::Value;
}

/// Transport-level reply: HTTP status, optional session header, optional
/// JSON body (already serialized).
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub session_id: Option<String>,
    pub body: Option<String>,
}

impl HttpReply {
    pub fn new(status: u16, session_id: Option<String>, body: Option<String>) -> Self {
        Self {
            status,
            session_id,
            body,
        }
    }

    /// 202 Accepted with no body (notifications).
    pub fn accepted(session_id: Option<String>) -> Self {
        Self::new(202, session_id, None)
    }
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Enable permissive CORS (session header exposed to browsers)
    pub enable_cors: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 7070,
            hostname: "127.0.0.1".into(),
            enable_cors: false,
        }
    }
}

/// Shared state for the transport server.
struct AppState<H: SessionHandler> {
    handler: Arc<H>,
}

/// The transport server — binds the listener and routes HTTP calls to the
/// session handler.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
}

impl TransportServer {
    /// Start the transport server with the given session handler.
    /// Accepts `Arc<H>` so the handler can be shared with the sweep task
    /// and shutdown hooks.
    pub async fn start<H: SessionHandler>(
        config: TransportConfig,
        handler: Arc<H>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let state = Arc::new(AppState { handler });

        let mut app = Router::new()
            .route(
                "/mcp",
                get(discovery_handler::<H>)
                    .post(post_handler::<H>)
                    .delete(delete_handler::<H>),
            )
            .route("/health", get(health_handler::<H>))
            .with_state(state);

        if config.enable_cors {
            let session_header = axum::http::HeaderName::from_static("mcp-session-id");
            app = app.layer(CorsLayer::permissive().expose_headers([session_header]));
        }

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!(
            "Vault MCP transport listening on http://{}:{}/mcp",
            config.hostname, actual_port
        );

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Vault MCP transport server stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn into_response(reply: HttpReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = match reply.body {
        Some(body) => (status, body).into_response(),
        None => status.into_response(),
    };
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(session_id) = reply.session_id {
        match HeaderValue::from_str(&session_id) {
            Ok(value) => {
                response.headers_mut().insert(SESSION_HEADER, value);
            }
            Err(_) => warn!(%session_id, "Session id not representable as header"),
        }
    }
    response
}

async fn post_handler<H: SessionHandler>(
    State(state): State<Arc<AppState<H>>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let session_id = session_header(&headers);
    let reply = state.handler.handle_post(session_id, body).await;
    into_response(reply)
}

async fn delete_handler<H: SessionHandler>(
    State(state): State<Arc<AppState<H>>>,
    headers: HeaderMap,
) -> Response {
    let session_id = session_header(&headers);
    let reply = state.handler.handle_delete(session_id).await;
    into_response(reply)
}

async fn discovery_handler<H: SessionHandler>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    Json(state.handler.discovery())
}

async fn health_handler<H: SessionHandler>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    Json(state.handler.health())
}
