//! Channel — the stateful duplex binding between one session and its
//! protocol handler.
//!
//! A channel turns repeated HTTP request/response pairs into one ongoing
//! protocol conversation: each [`Channel::exchange`] call runs exactly one
//! request through the session's handler. At most one live channel exists
//! per session id; the router closes a predecessor before binding a
//! replacement.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use vault_protocol::{McpError, McpRequest, McpResponse};

/// Trait implemented by the per-session protocol handler.
/// The channel dispatches every exchange through this seam.
pub trait HandlerEndpoint: Send + Sync {
    /// Run one request through the handler and produce its response.
    fn dispatch(
        &self,
        request: McpRequest,
    ) -> impl std::future::Future<Output = McpResponse> + Send;

    /// Attempt the internal handshake the server performs on behalf of
    /// clients that skipped `initialize`. Returns true if the handler
    /// accepted the given protocol version.
    fn handshake_internally(
        &self,
        version: &str,
    ) -> impl std::future::Future<Output = bool> + Send;

    /// Whether the handler has completed a handshake (real or internal).
    fn is_initialized(&self) -> bool;
}

/// Object-safe wrapper for the HandlerEndpoint trait.
pub trait ChannelHandler: Send + Sync {
    fn dispatch_dyn<'a>(
        &'a self,
        request: McpRequest,
    ) -> Pin<Box<dyn std::future::Future<Output = McpResponse> + Send + 'a>>;
    fn handshake_internally_dyn<'a>(
        &'a self,
        version: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>>;
    fn is_initialized_dyn(&self) -> bool;
}

impl<T: HandlerEndpoint> ChannelHandler for T {
    fn dispatch_dyn<'a>(
        &'a self,
        request: McpRequest,
    ) -> Pin<Box<dyn std::future::Future<Output = McpResponse> + Send + 'a>> {
        Box::pin(self.dispatch(request))
    }
    fn handshake_internally_dyn<'a>(
        &'a self,
        version: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = bool> + Send + 'a>> {
        Box::pin(self.handshake_internally(version))
    }
    fn is_initialized_dyn(&self) -> bool {
        self.is_initialized()
    }
}

/// One live protocol conversation for a session.
pub struct Channel {
    session_id: String,
    handler: Arc<dyn ChannelHandler>,
    closed: AtomicBool,
    exchanges: AtomicU64,
}

impl Channel {
    pub fn new(session_id: impl Into<String>, handler: Arc<dyn ChannelHandler>) -> Self {
        Self {
            session_id: session_id.into(),
            handler,
            closed: AtomicBool::new(false),
            exchanges: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn handler(&self) -> &Arc<dyn ChannelHandler> {
        &self.handler
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of request/response cycles completed on this channel.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    /// Run one request/response cycle through the bound handler.
    pub async fn exchange(&self, request: McpRequest) -> McpResponse {
        if self.is_closed() {
            return McpResponse::error(Some(request.id), McpError::no_active_transport());
        }
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        self.handler.dispatch_dyn(request).await
    }

    /// Attempt the compatibility handshake with one protocol version.
    pub async fn handshake_internally(&self, version: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        self.handler.handshake_internally_dyn(version).await
    }

    /// Mark the channel closed. Returns true for the caller that actually
    /// performed the close, so close-driven bookkeeping (live-connection
    /// counter) runs exactly once per channel.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}
