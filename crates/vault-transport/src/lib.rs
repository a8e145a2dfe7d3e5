//! Vault MCP Transport Layer
//!
//! Turns stateless HTTP request/response pairs into per-session protocol
//! conversations. The transport layer owns:
//! - The [`channel::Channel`] abstraction (one live duplex binding per session)
//! - The [`registry::TransportRegistry`] (session id → channel, live counter)
//! - The axum HTTP server (POST/GET/DELETE on `/mcp`, plus `/health`)
//!
//! The transport is decoupled from the routing logic via the
//! [`server::SessionHandler`] trait.

pub mod channel;
pub mod registry;
pub mod server;

pub use channel::{Channel, ChannelHandler, HandlerEndpoint};
pub use registry::TransportRegistry;
pub use server::{HttpReply, SessionHandler, TransportConfig, TransportServer};
