//! Protocol handler — per-session negotiated state and method dispatch.
//!
//! One handler exists per session id (pooled in [`crate::handler_pool`]),
//! so negotiated capabilities never leak across sessions. The handler owns
//! no transport state; the channel calls into it through the
//! `HandlerEndpoint` seam.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use vault_protocol::{
    ClientCapabilities, ClientInfo, HandlerResult, InitializeParams, InitializeResult,
    LATEST_PROTOCOL_VERSION, McpError, McpErrorCode, McpRequest, McpResponse, Methods,
    ServerCapabilities, ServerInfo, ToolsCapability, is_supported_version,
};
use vault_tools::ToolRegistry;
use vault_transport::HandlerEndpoint;

use crate::config::ServerIdentity;
use crate::workers::{WorkFuture, WorkerPool};

/// State produced by a completed handshake (real or internal).
#[derive(Debug, Clone)]
struct NegotiatedState {
    protocol_version: String,
    client_info: Option<ClientInfo>,
    capabilities: ClientCapabilities,
}

pub struct ProtocolHandler {
    session_id: String,
    identity: ServerIdentity,
    tools: Arc<ToolRegistry>,
    workers: Arc<WorkerPool>,
    negotiated: RwLock<Option<NegotiatedState>>,
    requests: AtomicU64,
}

impl ProtocolHandler {
    pub fn new(
        session_id: impl Into<String>,
        identity: ServerIdentity,
        tools: Arc<ToolRegistry>,
        workers: Arc<WorkerPool>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            identity,
            tools,
            workers,
            negotiated: RwLock::new(None),
            requests: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn initialized(&self) -> bool {
        self.negotiated.read().is_some()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.negotiated
            .read()
            .as_ref()
            .map(|s| s.protocol_version.clone())
    }

    /// Client identity from the handshake, if one was declared.
    pub fn client_info(&self) -> Option<ClientInfo> {
        self.negotiated
            .read()
            .as_ref()
            .and_then(|s| s.client_info.clone())
    }

    /// Capabilities the client declared during the handshake.
    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.negotiated
            .read()
            .as_ref()
            .map(|s| s.capabilities.clone())
    }

    /// Requests dispatched through this handler.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Run one request and wrap the outcome into a JSON-RPC response.
    pub async fn dispatch(&self, request: McpRequest) -> McpResponse {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let id = request.id.clone();

        if !request.is_valid() {
            return McpResponse::error(
                Some(id),
                McpError::invalid_request("Invalid JSON-RPC 2.0 request"),
            );
        }

        match self.handle(&request.method, request.params).await {
            Ok(result) => McpResponse::success(id, result),
            Err(error) => McpResponse::error(Some(id), error),
        }
    }

    /// Complete the handshake on the client's behalf with one candidate
    /// protocol version. Returns true if the version is acceptable. Called
    /// by the router once per newly created channel for clients that never
    /// sent an explicit `initialize`.
    pub fn accept_internal_handshake(&self, version: &str) -> bool {
        if !is_supported_version(version) {
            return false;
        }
        let mut negotiated = self.negotiated.write();
        if negotiated.is_none() {
            debug!(session_id = %self.session_id, version, "Internal handshake accepted");
            *negotiated = Some(NegotiatedState {
                protocol_version: version.to_string(),
                client_info: None,
                capabilities: ClientCapabilities::default(),
            });
        }
        true
    }

    // ── Method dispatch ─────────────────────────────────────────────────

    async fn handle(&self, method: &str, params: Option<Value>) -> HandlerResult {
        match method {
            Methods::INITIALIZE => self.handle_initialize(params),
            Methods::PING => Ok(json!({})),
            Methods::TOOLS_LIST => {
                self.require_initialized()?;
                let tools: Vec<Value> = self.tools.list().iter().map(|t| t.to_json()).collect();
                Ok(json!({ "tools": tools }))
            }
            Methods::TOOLS_CALL => {
                self.require_initialized()?;
                self.handle_tool_call(params).await
            }
            Methods::NOTIFICATION_INITIALIZED | Methods::NOTIFICATION_CANCELLED => Ok(Value::Null),
            other => Err(McpError::method_not_found(other)),
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> HandlerResult {
        let params: InitializeParams = match params {
            Some(v) => serde_json::from_value(v)
                .map_err(|e| McpError::invalid_params(format!("Invalid initialize params: {e}")))?,
            None => return Err(McpError::invalid_params("initialize requires params")),
        };

        // Unknown client versions get the latest we speak, per the
        // negotiation rules; known ones are echoed back.
        let negotiated_version = if is_supported_version(&params.protocol_version) {
            params.protocol_version.clone()
        } else {
            warn!(
                session_id = %self.session_id,
                requested = %params.protocol_version,
                "Unknown protocol version, offering latest"
            );
            LATEST_PROTOCOL_VERSION.to_string()
        };

        let client_name = params
            .client_info
            .as_ref()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "unknown".into());
        info!(
            session_id = %self.session_id,
            client = %client_name,
            version = %negotiated_version,
            "Session initialized"
        );

        *self.negotiated.write() = Some(NegotiatedState {
            protocol_version: negotiated_version.clone(),
            client_info: params.client_info,
            capabilities: params.capabilities,
        });

        let result = InitializeResult {
            protocol_version: negotiated_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: ServerInfo {
                name: self.identity.name.clone(),
                version: self.identity.version.clone(),
            },
        };
        serde_json::to_value(result).map_err(|e| McpError::internal(e.to_string()))
    }

    async fn handle_tool_call(&self, params: Option<Value>) -> HandlerResult {
        let p: ToolCallParams = match params {
            Some(v) => serde_json::from_value(v)
                .map_err(|e| McpError::invalid_params(format!("Invalid tool call: {e}")))?,
            None => return Err(McpError::invalid_params("tools/call requires params")),
        };

        let tool = self
            .tools
            .get(&p.name)
            .ok_or_else(|| McpError::invalid_params(format!("Unknown tool: {}", p.name)))?;

        let outcome = if tool.worker_eligible_dyn() {
            let arguments = p.arguments;
            let tool_for_worker = tool.clone();
            let work: WorkFuture =
                Box::pin(async move { tool_for_worker.call_dyn(arguments).await });
            match self.workers.submit(&self.session_id, &p.name, work).await {
                Ok(result) => result,
                // Pool-level failures keep their reserved codes so clients
                // can distinguish them from tool errors
                Err(pool_err) => return Err(pool_err.to_protocol(&p.name)),
            }
        } else {
            tool.call_dyn(p.arguments).await
        };

        // Argument validation failures are protocol errors; execution
        // failures are rendered as isError tool results.
        match outcome {
            Err(e) if e.error_code() == McpErrorCode::InvalidParams => Err(e),
            other => Ok(render_tool_result(other)),
        }
    }

    fn require_initialized(&self) -> Result<(), McpError> {
        if self.initialized() {
            Ok(())
        } else {
            Err(McpError::not_initialized())
        }
    }
}

impl HandlerEndpoint for ProtocolHandler {
    async fn dispatch(&self, request: McpRequest) -> McpResponse {
        ProtocolHandler::dispatch(self, request).await
    }

    async fn handshake_internally(&self, version: &str) -> bool {
        self.accept_internal_handshake(version)
    }

    fn is_initialized(&self) -> bool {
        self.initialized()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameter types & presentation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Render a tool outcome into MCP content blocks. Tool-level errors become
/// `isError` results; the payload is forwarded verbatim as text.
fn render_tool_result(outcome: HandlerResult) -> Value {
    match outcome {
        Ok(value) => {
            let text = match &value {
                Value::String(s) => s.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
            };
            json!({
                "content": [{ "type": "text", "text": text }],
                "isError": false
            })
        }
        Err(error) => json!({
            "content": [{ "type": "text", "text": error.message }],
            "isError": true
        }),
    }
}
