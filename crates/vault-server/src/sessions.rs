//! Session registry — one record per active session, plus eviction policy.
//!
//! Pure data and policy, no I/O. Sweep and capacity eviction return the
//! removed ids as plain values; the router is responsible for cascading
//! channel closure and handler eviction, which keeps the ordering of
//! mutations explicit.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::SessionConfig;

/// One active session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: Instant,
    /// Wall-clock creation time, for stats payloads.
    pub created_at_ms: i64,
    pub last_activity: Instant,
    pub request_count: u64,
}

impl Session {
    fn new(id: &str, now: Instant) -> Self {
        Self {
            id: id.to_string(),
            created_at: now,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            last_activity: now,
            request_count: 0,
        }
    }
}

/// Aggregate counters for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub total_requests: u64,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    config: SessionConfig,
    /// Requests counted against sessions that have since been removed.
    retired_requests: RwLock<u64>,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            retired_requests: RwLock::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Idempotent: returns the existing record if present, else creates one
    /// with a zero activity count.
    pub fn create_or_get(&self, id: &str) -> Session {
        let mut sessions = self.sessions.write();
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                info!(session_id = %id, "Session created");
                Session::new(id, Instant::now())
            })
            .clone()
    }

    /// Update last-activity and bump the request count. No-op (not an
    /// error) if the session does not exist.
    pub fn touch(&self, id: &str) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(id) {
            session.last_activity = Instant::now();
            session.request_count += 1;
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a single session. Returns true if it existed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        if let Some(session) = removed {
            *self.retired_requests.write() += session.request_count;
            info!(session_id = %id, requests = session.request_count, "Session removed");
            true
        } else {
            false
        }
    }

    /// Remove and report every session idle longer than the configured
    /// timeout, for cascading cleanup by the caller.
    pub fn sweep(&self, now: Instant) -> Vec<String> {
        let idle_timeout = self.config.idle_timeout;
        let expired: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .filter(|s| now.duration_since(s.last_activity) > idle_timeout)
                .map(|s| s.id.clone())
                .collect()
        };

        for id in &expired {
            self.remove(id);
            debug!(session_id = %id, "Session swept (idle)");
        }
        expired
    }

    /// While over capacity, remove the least-recently-active session(s);
    /// ties broken by earliest creation time. Returns the removed ids so the
    /// caller can close their channels.
    pub fn evict_if_over_capacity(&self) -> Vec<String> {
        let mut evicted = Vec::new();
        loop {
            let victim = {
                let sessions = self.sessions.read();
                if sessions.len() <= self.config.max_sessions {
                    break;
                }
                sessions
                    .values()
                    .min_by_key(|s| (s.last_activity, s.created_at))
                    .map(|s| s.id.clone())
            };
            match victim {
                Some(id) => {
                    self.remove(&id);
                    info!(session_id = %id, "Session evicted (over capacity)");
                    evicted.push(id);
                }
                None => break,
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drop every session (shutdown path). Cascading cleanup is the
    /// caller's job, as with sweep and eviction.
    pub fn clear(&self) -> Vec<String> {
        let mut sessions = self.sessions.write();
        let ids: Vec<String> = sessions.keys().cloned().collect();
        let retired: u64 = sessions.values().map(|s| s.request_count).sum();
        *self.retired_requests.write() += retired;
        sessions.clear();
        ids
    }

    pub fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read();
        let live: u64 = sessions.values().map(|s| s.request_count).sum();
        SessionStats {
            active_sessions: sessions.len(),
            max_sessions: self.config.max_sessions,
            total_requests: live + *self.retired_requests.read(),
        }
    }
}
