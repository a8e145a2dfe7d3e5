//! Protocol method name constants.
//!
//! Each constant is the exact string sent over the wire as the `method`
//! field of a JSON-RPC request.

/// All protocol method names.
pub struct Methods;

impl Methods {
    // ── Lifecycle ───────────────────────────────────────────────────────
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";

    // ── Tools ───────────────────────────────────────────────────────────
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";

    // ── Notifications (client → server, no response) ────────────────────
    pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
    pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
}

/// True for the handshake method that opens a protocol conversation.
pub fn is_initialize(method: &str) -> bool {
    method == Methods::INITIALIZE
}

/// True for the lightweight liveness ping that must never allocate
/// session state.
pub fn is_ping(method: &str) -> bool {
    method == Methods::PING
}

/// Returns true if the given string is a method this server understands.
pub fn is_protocol_method(method: &str) -> bool {
    matches!(
        method,
        Methods::INITIALIZE
            | Methods::PING
            | Methods::TOOLS_LIST
            | Methods::TOOLS_CALL
            | Methods::NOTIFICATION_INITIALIZED
            | Methods::NOTIFICATION_CANCELLED
    )
}

/// Type alias — the method name is always a `&str` at the protocol level.
pub type MethodName = &'static str;
