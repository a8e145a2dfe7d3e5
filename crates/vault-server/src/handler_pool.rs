//! Handler pool — lazily creates and caches one protocol handler per
//! session id, so session-scoped state (negotiated capabilities, protocol
//! version) never leaks across sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};
use vault_tools::ToolRegistry;

use crate::config::ServerIdentity;
use crate::handler::ProtocolHandler;
use crate::workers::WorkerPool;

/// Aggregate pool counters for observability.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerPoolStats {
    pub active_handlers: usize,
    pub max_sessions: usize,
    pub total_requests: u64,
}

pub struct HandlerPool {
    handlers: DashMap<String, Arc<ProtocolHandler>>,
    identity: ServerIdentity,
    tools: Arc<ToolRegistry>,
    workers: Arc<WorkerPool>,
    max_sessions: usize,
    /// Handler constructions since startup.
    created: AtomicU64,
    /// Requests dispatched by handlers that have since been evicted.
    retired_requests: AtomicU64,
}

impl HandlerPool {
    pub fn new(
        identity: ServerIdentity,
        tools: Arc<ToolRegistry>,
        workers: Arc<WorkerPool>,
        max_sessions: usize,
    ) -> Self {
        Self {
            handlers: DashMap::new(),
            identity,
            tools,
            workers,
            max_sessions,
            created: AtomicU64::new(0),
            retired_requests: AtomicU64::new(0),
        }
    }

    /// Return the cached handler for the id, constructing and registering
    /// one if absent. Construction is cheap and synchronous; repeated calls
    /// are O(1) map hits.
    pub fn get_or_create(&self, session_id: &str) -> Arc<ProtocolHandler> {
        self.handlers
            .entry(session_id.to_string())
            .or_insert_with(|| {
                self.created.fetch_add(1, Ordering::Relaxed);
                debug!(session_id, "Protocol handler created");
                Arc::new(ProtocolHandler::new(
                    session_id,
                    self.identity.clone(),
                    self.tools.clone(),
                    self.workers.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<ProtocolHandler>> {
        self.handlers.get(session_id).map(|entry| entry.clone())
    }

    /// Drop the handler entry for a removed session.
    pub fn evict(&self, session_id: &str) -> bool {
        match self.handlers.remove(session_id) {
            Some((_, handler)) => {
                self.retired_requests
                    .fetch_add(handler.request_count(), Ordering::Relaxed);
                debug!(session_id, "Protocol handler evicted");
                true
            }
            None => false,
        }
    }

    /// Drop every handler (shutdown path).
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.evict(id);
        }
        info!(handlers = ids.len(), "Handler pool shut down");
    }

    /// Handler constructions since startup.
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> HandlerPoolStats {
        let live: u64 = self.handlers.iter().map(|e| e.request_count()).sum();
        HandlerPoolStats {
            active_handlers: self.handlers.len(),
            max_sessions: self.max_sessions,
            total_requests: live + self.retired_requests.load(Ordering::Relaxed),
        }
    }
}
