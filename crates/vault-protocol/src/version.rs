//! Protocol version negotiation.
//!
//! The server advertises the latest version and accepts any listed one.
//! The list is also the attempt order for the compatibility handshake the
//! router performs on behalf of clients that skip `initialize`.

/// Protocol revisions this server accepts, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05", "2024-10-07"];

/// The revision offered to clients that request an unknown version.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";

pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}
