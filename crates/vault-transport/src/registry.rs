//! Transport registry — maps session identifiers to their live channels.
//!
//! The registry never constructs channels; the request router decides when
//! construction is appropriate for the current request's phase and binds the
//! result here. The live-connection counter tracks bound channels and is
//! decremented exactly once per channel close.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::channel::Channel;

pub struct TransportRegistry {
    channels: DashMap<String, Arc<Channel>>,
    live_connections: AtomicUsize,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            live_connections: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Channel>> {
        self.channels.get(session_id).map(|entry| entry.clone())
    }

    /// Store the mapping for a newly constructed channel.
    /// The caller must have closed any predecessor for this id first —
    /// the registry keeps that ordering explicit rather than closing
    /// implicitly.
    pub fn bind(&self, session_id: &str, channel: Arc<Channel>) {
        if let Some(prior) = self.channels.insert(session_id.to_string(), channel) {
            // Contract violation by the caller; close the orphan so the
            // counter stays consistent.
            warn!(session_id, "bind replaced a live channel without close");
            if prior.close() {
                self.live_connections.fetch_sub(1, Ordering::SeqCst);
            }
        }
        self.live_connections.fetch_add(1, Ordering::SeqCst);
        debug!(session_id, live = self.live_connections(), "Channel bound");
    }

    /// Remove the mapping without closing. Safe to call when absent.
    pub fn unbind(&self, session_id: &str) -> Option<Arc<Channel>> {
        self.channels.remove(session_id).map(|(_, channel)| channel)
    }

    /// Close the channel for a session and drop its mapping.
    /// Returns true if a bound channel was found. The live-connection
    /// counter decrements only when this call actually performed the close.
    pub fn close_and_unbind(&self, session_id: &str) -> bool {
        match self.unbind(session_id) {
            Some(channel) => {
                if channel.close() {
                    self.live_connections.fetch_sub(1, Ordering::SeqCst);
                }
                debug!(session_id, live = self.live_connections(), "Channel closed");
                true
            }
            None => false,
        }
    }

    /// Close every bound channel and clear the registry (shutdown path).
    pub fn close_all(&self) -> usize {
        let ids: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for id in ids {
            if self.close_and_unbind(&id) {
                closed += 1;
            }
        }
        closed
    }

    pub fn live_connections(&self) -> usize {
        self.live_connections.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}
