//! Vault MCP - Protocol Types
//!
//! JSON-RPC 2.0 compatible types for the vault tool-calling protocol.
//! This crate is the single source of truth for all wire shapes,
//! method names, protocol versions, and error codes.

pub mod error;
pub mod initialize;
pub mod jsonrpc;
pub mod methods;
pub mod version;

pub use error::{McpError, McpErrorCode};
pub use initialize::{
    ClientCapabilities, ClientInfo, InitializeParams, InitializeResult,
    ServerCapabilities, ServerInfo, ToolsCapability,
};
pub use jsonrpc::{
    HandlerResult, McpErrorResponse, McpNotification, McpRequest, McpResponse,
    McpSuccessResponse, RequestId,
};
pub use methods::{MethodName, Methods};
pub use version::{LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS, is_supported_version};

/// HTTP header carrying the opaque session identifier.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";
