//! Vault MCP Server — session and transport lifecycle core.
//!
//! The request router owns all shared state (session registry, transport
//! registry, handler pool, worker pool) and implements the `SessionHandler`
//! seam for the HTTP transport. Nothing in this crate is ambient or global;
//! everything is constructed in `main` and passed by reference.

pub mod config;
pub mod handler;
pub mod handler_pool;
pub mod router;
pub mod sessions;
pub mod workers;

pub use config::{ServerIdentity, SessionConfig, WorkerConfig};
pub use handler::ProtocolHandler;
pub use handler_pool::{HandlerPool, HandlerPoolStats};
pub use router::RequestRouter;
pub use sessions::{SessionRegistry, SessionStats};
pub use workers::{WorkerError, WorkerPool};
