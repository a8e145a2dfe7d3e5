//! Request router — the session lifecycle state machine.
//!
//! Every inbound HTTP call lands here. The router decides whether an
//! existing session's channel handles the request, whether a new session
//! must be provisioned, whether the compatibility handshake runs on the
//! client's behalf, and how resources are reclaimed for idle, evicted, or
//! explicitly closed sessions.
//!
//! All shared state is owned by this struct; per-identifier async locks
//! serialize create/bind decisions so concurrent first-use of one id yields
//! exactly one channel and handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vault_protocol::{
    McpError, McpErrorCode, McpRequest, McpResponse, RequestId, SESSION_HEADER,
    SUPPORTED_PROTOCOL_VERSIONS,
    methods::{is_initialize, is_ping},
};
use vault_transport::{Channel, HttpReply, SessionHandler, TransportRegistry};

use crate::config::ServerIdentity;
use crate::handler_pool::HandlerPool;
use crate::sessions::SessionRegistry;
use crate::workers::WorkerPool;

pub struct RequestRouter {
    identity: ServerIdentity,
    sessions: SessionRegistry,
    transports: TransportRegistry,
    handlers: HandlerPool,
    workers: Arc<WorkerPool>,
    locks: KeyedLocks,
    shutdown: AtomicBool,
}

impl RequestRouter {
    pub fn new(
        identity: ServerIdentity,
        sessions: SessionRegistry,
        transports: TransportRegistry,
        handlers: HandlerPool,
        workers: Arc<WorkerPool>,
    ) -> Self {
        Self {
            identity,
            sessions,
            transports,
            handlers,
            workers,
            locks: KeyedLocks::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn transports(&self) -> &TransportRegistry {
        &self.transports
    }

    pub fn handlers(&self) -> &HandlerPool {
        &self.handlers
    }

    // ── Entry points ────────────────────────────────────────────────────

    /// Handle one POSTed JSON-RPC message.
    pub async fn handle_post(&self, session_header: Option<String>, body: String) -> HttpReply {
        if self.shutdown.load(Ordering::SeqCst) {
            let resp = McpResponse::error(None, McpError::shutting_down());
            return json_reply(503, session_header, &resp);
        }

        let parsed: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(e) => {
                let resp =
                    McpResponse::error(None, McpError::parse_error(format!("Invalid JSON: {e}")));
                return json_reply(400, session_header, &resp);
            }
        };

        let jsonrpc_ok = parsed.get("jsonrpc").and_then(Value::as_str) == Some("2.0");
        let method = parsed.get("method").and_then(Value::as_str);
        let id: Option<RequestId> = parsed
            .get("id")
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        let Some(method) = method else {
            let resp = McpResponse::error(
                id,
                McpError::invalid_request("Request is missing a method"),
            );
            return json_reply(400, session_header, &resp);
        };
        if !jsonrpc_ok {
            let resp = McpResponse::error(
                id,
                McpError::invalid_request("Invalid JSON-RPC 2.0 request"),
            );
            return json_reply(400, session_header, &resp);
        }
        let method = method.to_string();
        let params = parsed.get("params").cloned();

        // Notifications carry no id and expect no body.
        let Some(id) = id else {
            if let Some(sid) = &session_header {
                self.sessions.touch(sid);
            }
            debug!(method = %method, "Notification accepted");
            return HttpReply::accepted(session_header);
        };

        let request = McpRequest::new(id, method.clone(), params);

        // State 1: keepalive fast-path. Never creates a session, channel,
        // or handler; never consults the transport registry.
        if is_ping(&method) {
            if let Some(sid) = &session_header {
                self.sessions.touch(sid);
            }
            let resp = McpResponse::success(request.id, json!({}));
            return json_reply(200, session_header, &resp);
        }

        let handshake = is_initialize(&method);
        match session_header {
            Some(sid) => self.route_session(sid, request, handshake).await,
            None => {
                // States 4 and 5: brand-new client, server-generated id.
                let sid = Uuid::new_v4().to_string();
                self.route_session(sid, request, handshake).await
            }
        }
    }

    /// Explicit session close (DELETE).
    pub async fn handle_delete(&self, session_header: Option<String>) -> HttpReply {
        let Some(sid) = session_header else {
            let body = json!({ "error": format!("Missing {SESSION_HEADER} header") });
            return HttpReply::new(400, None, Some(body.to_string()));
        };

        let guard = self.locks.acquire(&sid).await;
        let had_channel = self.transports.close_and_unbind(&sid);
        self.workers.release(&sid);
        self.handlers.evict(&sid);
        self.sessions.remove(&sid);
        drop(guard);
        self.locks.purge(&sid);

        if had_channel {
            info!(session_id = %sid, "Session closed by client");
            HttpReply::new(200, Some(sid), Some(json!({ "closed": true }).to_string()))
        } else {
            HttpReply::new(
                404,
                None,
                Some(json!({ "error": "Unknown session" }).to_string()),
            )
        }
    }

    /// Reclaim idle sessions and cascade their channel/handler/worker
    /// teardown. Driven by a periodic task, not by requests.
    pub fn sweep_idle(&self) -> usize {
        let expired = self.sessions.sweep(Instant::now());
        for sid in &expired {
            self.release_session_resources(sid);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Idle sessions swept");
        }
        expired.len()
    }

    /// Stop accepting new session work, then tear down channels, workers,
    /// and handlers, in that order.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down session core");
        let closed = self.transports.close_all();
        let cleared = self.sessions.clear();
        self.workers.shutdown();
        self.handlers.shutdown();
        info!(
            channels = closed,
            sessions = cleared.len(),
            "Session core shut down"
        );
    }

    // ── State machine internals ─────────────────────────────────────────

    /// States 2–6 for one session identifier.
    async fn route_session(&self, sid: String, request: McpRequest, handshake: bool) -> HttpReply {
        let request_id = request.id.clone();

        // Serialize lookup-or-create per identifier: concurrent requests
        // bearing the same never-seen id must not both win the create race.
        // The compatibility handshake also runs under this lock, so a loser
        // that reuses the fresh channel never sees an uninitialized handler.
        let outcome = {
            let guard = self.locks.acquire(&sid).await;
            let outcome = if let Some(existing) = self.transports.get(&sid) {
                self.sessions.touch(&sid);
                Ok((existing, false))
            } else {
                self.sessions.create_or_get(&sid);
                match self.open_channel(&sid) {
                    Ok(channel) => {
                        if !handshake {
                            self.compat_handshake(&sid, &channel).await;
                        }
                        Ok((channel, true))
                    }
                    Err(e) => Err(e),
                }
            };
            drop(guard);
            self.locks.purge(&sid);
            outcome
        };

        match outcome {
            // State 2: known session, live channel — reuse and dispatch.
            Ok((channel, false)) => {
                let resp = channel.exchange(request).await;
                json_reply(200, Some(sid), &resp)
            }
            // States 3a and 4: handshake through a fresh channel.
            Ok((channel, true)) if handshake => {
                debug!(session_id = %sid, "Handshake on fresh channel");
                let resp = channel.exchange(request).await;
                json_reply(200, Some(sid), &resp)
            }
            // States 3b and 5: non-handshake request with no live channel.
            // The compatibility handshake already ran on the fresh channel;
            // forward the original request (fail-open).
            Ok((channel, true)) => {
                debug!(session_id = %sid, method = %request.method, "Compatibility handshake path");
                let mut resp = channel.exchange(request).await;
                // State 6: a still-uninitialized handler answers with a
                // structured error carrying the assigned session id.
                attach_session_id(&mut resp, &sid);
                json_reply(200, Some(sid), &resp)
            }
            // State 7: no channel could be obtained at all.
            Err(e) => {
                warn!(session_id = %sid, error = %e, "No channel available for request");
                let status = if e.error_code() == McpErrorCode::ShuttingDown {
                    503
                } else {
                    500
                };
                let resp = McpResponse::error(Some(request_id), e);
                json_reply(status, Some(sid), &resp)
            }
        }
    }

    /// Construct and bind a channel for the id, closing any predecessor
    /// first, then apply the capacity policy. Called with the id's lock
    /// held.
    fn open_channel(&self, sid: &str) -> Result<Arc<Channel>, McpError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(McpError::shutting_down());
        }

        let handler = self.handlers.get_or_create(sid);
        let channel = Arc::new(Channel::new(sid, handler));
        // At most one live channel per id: explicit close before bind.
        self.transports.close_and_unbind(sid);
        self.transports.bind(sid, channel.clone());

        // Capacity policy: evict least-recently-active sessions and cascade.
        // The new session carries the freshest activity stamp, so it is not
        // a candidate unless capacity is zero.
        for evicted in self.sessions.evict_if_over_capacity() {
            self.release_session_resources(&evicted);
        }

        if self.transports.get(sid).is_none() {
            // Evicted out from under us (capacity 0 or 1 corner); the
            // defensive branch answers rather than panicking.
            return Err(McpError::no_active_transport());
        }
        Ok(channel)
    }

    /// Attempt the internal handshake with each supported protocol version.
    /// Failures are logged and swallowed: fail-open, so the original request
    /// is still forwarded and the client receives a concrete error.
    async fn compat_handshake(&self, sid: &str, channel: &Channel) {
        if channel.handler().is_initialized_dyn() {
            return;
        }
        for version in SUPPORTED_PROTOCOL_VERSIONS {
            if channel.handshake_internally(version).await {
                debug!(session_id = %sid, version, "Compatibility handshake accepted");
                return;
            }
        }
        warn!(
            session_id = %sid,
            "Compatibility handshake failed for all supported versions; continuing"
        );
    }

    /// Cascade teardown for a removed session: channel first, then the
    /// worker context, then the handler entry.
    fn release_session_resources(&self, sid: &str) {
        self.transports.close_and_unbind(sid);
        self.workers.release(sid);
        self.handlers.evict(sid);
    }

    // ── Read-only surfaces ──────────────────────────────────────────────

    pub fn discovery(&self) -> Value {
        json!({
            "name": self.identity.name,
            "version": self.identity.version,
            "transport": "http",
            "protocolVersions": SUPPORTED_PROTOCOL_VERSIONS,
            "sessionHeader": SESSION_HEADER,
            "endpoints": { "mcp": "/mcp", "health": "/health" },
        })
    }

    pub fn health(&self) -> Value {
        json!({
            "status": "ok",
            "sessions": self.sessions.stats(),
            "handlers": self.handlers.stats(),
            "liveConnections": self.transports.live_connections(),
            "activeWorkers": self.workers.active_workers(),
        })
    }
}

impl SessionHandler for RequestRouter {
    async fn handle_post(&self, session_id: Option<String>, body: String) -> HttpReply {
        RequestRouter::handle_post(self, session_id, body).await
    }

    async fn handle_delete(&self, session_id: Option<String>) -> HttpReply {
        RequestRouter::handle_delete(self, session_id).await
    }

    fn discovery(&self) -> Value {
        RequestRouter::discovery(self)
    }

    fn health(&self) -> Value {
        RequestRouter::health(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Per-identifier async locks. Entries are dropped once no task holds or
/// waits on them, so transient ids do not accumulate.
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    fn purge(&self, key: &str) {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(key) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(key);
            }
        }
    }
}

fn json_reply(status: u16, session_id: Option<String>, resp: &McpResponse) -> HttpReply {
    let body = serde_json::to_string(resp).unwrap_or_else(|_| {
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Response serialization failed"}}"#
            .to_string()
    });
    HttpReply::new(status, session_id, Some(body))
}

/// State 6: not-initialized errors carry the assigned session id in the
/// payload as well as the response header.
fn attach_session_id(resp: &mut McpResponse, sid: &str) {
    if let McpResponse::Error(err) = resp {
        if err.error.error_code() == McpErrorCode::NotInitialized {
            let mut data = match err.error.data.take() {
                Some(Value::Object(map)) => Value::Object(map),
                _ => json!({}),
            };
            data["sessionId"] = json!(sid);
            err.error.data = Some(data);
        }
    }
}
