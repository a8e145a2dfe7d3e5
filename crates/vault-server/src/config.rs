//! Typed configuration for the session core.
//!
//! All capacities and timeouts are configuration inputs; nothing in the
//! lifecycle code hard-codes them.

use std::time::Duration;

/// Server identity reported in the initialize result and discovery payload.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            name: "vault-mcp".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Session registry policy.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum live sessions; the least-recently-active are evicted beyond
    /// this. 1 collapses the server to single-session mode.
    pub max_sessions: usize,
    /// Idle time after which a session is reclaimed by the sweep.
    pub idle_timeout: Duration,
    /// Interval between idle sweeps.
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Worker pool sizing and deadlines.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum units of work executing concurrently across all sessions.
    pub max_workers: usize,
    /// Queued items per session before submissions are rejected.
    pub queue_depth: usize,
    /// Deadline for one unit of work, queue wait included.
    pub item_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 16,
            queue_depth: 32,
            item_timeout: Duration::from_secs(30),
        }
    }
}
