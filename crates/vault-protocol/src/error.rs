//! Protocol error types and standard JSON-RPC 2.0 error codes.

use serde::{Deserialize, Serialize};

/// Standard JSON-RPC 2.0 error codes plus the server's reserved codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpErrorCode {
    // JSON-RPC 2.0 standard errors
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,

    // Server errors
    ServerError,
    /// The session has no live channel and needs an explicit handshake.
    NotInitialized,
    ShuttingDown,
    /// Defensive fallback — no channel could be obtained for the request.
    NoActiveTransport,
    /// A queued unit of work exceeded its deadline; the client may retry.
    WorkerTimeout,
    /// The worker queue is full; backpressure signal, retry later.
    WorkerBusy,

    // Custom code
    Custom(i32),
}

impl McpErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError => -32000,
            Self::NotInitialized => -32001,
            Self::ShuttingDown => -32002,
            Self::NoActiveTransport => -32003,
            Self::WorkerTimeout => -32004,
            Self::WorkerBusy => -32005,
            Self::Custom(c) => *c,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32000 => Self::ServerError,
            -32001 => Self::NotInitialized,
            -32002 => Self::ShuttingDown,
            -32003 => Self::NoActiveTransport,
            -32004 => Self::WorkerTimeout,
            -32005 => Self::WorkerBusy,
            c => Self::Custom(c),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl McpError {
    pub fn new(code: McpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(McpErrorCode::MethodNotFound, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InternalError, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::ServerError, message)
    }

    pub fn not_initialized() -> Self {
        Self::new(
            McpErrorCode::NotInitialized,
            "Session not initialized. Send an initialize request with this session id.",
        )
    }

    pub fn shutting_down() -> Self {
        Self::new(McpErrorCode::ShuttingDown, "Server is shutting down")
    }

    pub fn no_active_transport() -> Self {
        Self::new(
            McpErrorCode::NoActiveTransport,
            "No active transport for this session. Initialize and retry.",
        )
    }

    pub fn worker_timeout(operation: &str) -> Self {
        Self::new(
            McpErrorCode::WorkerTimeout,
            format!("Operation timed out: {operation}"),
        )
    }

    pub fn worker_busy() -> Self {
        Self::new(
            McpErrorCode::WorkerBusy,
            "Worker queue is full. Retry later.",
        )
    }

    pub fn error_code(&self) -> McpErrorCode {
        McpErrorCode::from_code(self.code)
    }
}

impl std::fmt::Display for McpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MCP Error [{}]: {}", self.code, self.message)
    }
}

impl std::error::Error for McpError {}
