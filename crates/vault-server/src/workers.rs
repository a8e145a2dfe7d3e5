//! Worker pool — bounded concurrency for expensive tool operations.
//!
//! One lightweight task per session, created lazily; a shared semaphore caps
//! how many units of work execute at once, so total CPU/IO fan-out stays
//! bounded no matter how many HTTP calls arrive. Each worker has a bounded
//! queue; a full queue is the backpressure signal surfaced to the caller.
//! A panicking unit of work is converted into a failed item — never a pool
//! crash — and other sessions' workers are unaffected.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use vault_protocol::{HandlerResult, McpError};

use crate::config::WorkerConfig;

/// An opaque unit of work: the pool never inspects what it runs.
pub type WorkFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// Pool-level failures, distinct from application errors so clients can
/// tell "retry later" from "bad request".
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker queue is full")]
    Busy,
    #[error("Worker pool is shut down")]
    Closed,
    #[error("Work item timed out")]
    Timeout,
}

impl WorkerError {
    pub fn to_protocol(&self, operation: &str) -> McpError {
        match self {
            Self::Busy => McpError::worker_busy(),
            Self::Closed => McpError::shutting_down(),
            Self::Timeout => McpError::worker_timeout(operation),
        }
    }
}

struct WorkItem {
    operation: String,
    work: WorkFuture,
    completion: oneshot::Sender<HandlerResult>,
}

struct WorkerHandle {
    tx: mpsc::Sender<WorkItem>,
    task: tokio::task::JoinHandle<()>,
}

pub struct WorkerPool {
    workers: DashMap<String, WorkerHandle>,
    /// Caps concurrent execution across all sessions.
    permits: Arc<Semaphore>,
    config: WorkerConfig,
    shutdown: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            workers: DashMap::new(),
            permits: Arc::new(Semaphore::new(config.max_workers)),
            config,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Number of sessions with a live execution context.
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue one unit of work for a session and wait for its completion.
    ///
    /// Exactly one outcome is produced per accepted item: the application
    /// result, a timeout, or closed-on-shutdown. Rejected items (full
    /// queue) never enter the queue at all.
    pub async fn submit(
        &self,
        session_id: &str,
        operation: &str,
        work: WorkFuture,
    ) -> Result<HandlerResult, WorkerError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(WorkerError::Closed);
        }

        let (completion_tx, completion_rx) = oneshot::channel();
        let item = WorkItem {
            operation: operation.to_string(),
            work,
            completion: completion_tx,
        };

        let tx = self.worker_sender(session_id);
        match tx.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(session_id, operation, "Worker queue full, rejecting");
                return Err(WorkerError::Busy);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(WorkerError::Closed),
        }

        // The deadline covers queue wait plus execution. Timed-out items
        // drop their completion receiver; the worker skips them on dequeue.
        match tokio::time::timeout(self.config.item_timeout, completion_rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(WorkerError::Closed),
            Err(_) => {
                warn!(session_id, operation, "Work item timed out");
                Err(WorkerError::Timeout)
            }
        }
    }

    /// Release one session's execution context. Queued items are dropped;
    /// their submitters observe Closed. Other sessions are untouched.
    pub fn release(&self, session_id: &str) {
        if let Some((_, handle)) = self.workers.remove(session_id) {
            drop(handle.tx);
            handle.task.abort();
            debug!(session_id, "Worker released");
        }
    }

    /// Drain the pool: cancel outstanding items and drop every per-session
    /// execution context.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.release(&id);
        }
        self.permits.close();
        info!("Worker pool shut down");
    }

    fn worker_sender(&self, session_id: &str) -> mpsc::Sender<WorkItem> {
        if let Some(handle) = self.workers.get(session_id) {
            return handle.tx.clone();
        }

        let entry = self.workers.entry(session_id.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.config.queue_depth);
            let permits = self.permits.clone();
            let id = session_id.to_string();
            debug!(session_id, "Worker created");
            let task = tokio::spawn(worker_loop(id, rx, permits));
            WorkerHandle { tx, task }
        });
        entry.tx.clone()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One session's execution context: items run strictly one at a time,
/// each behind a pool-wide permit.
async fn worker_loop(session_id: String, mut rx: mpsc::Receiver<WorkItem>, permits: Arc<Semaphore>) {
    while let Some(item) = rx.recv().await {
        // Abandoned by a timed-out submitter; skip without executing.
        if item.completion.is_closed() {
            continue;
        }

        let permit = match permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => break, // pool shut down
        };

        let outcome = match std::panic::AssertUnwindSafe(item.work).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                error!(session_id = %session_id, operation = %item.operation, "Work item panicked");
                Err(McpError::internal(format!(
                    "Operation panicked: {}",
                    item.operation
                )))
            }
        };
        drop(permit);

        // Receiver may have timed out meanwhile; nothing left to deliver.
        let _ = item.completion.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn pool(max_workers: usize, queue_depth: usize, timeout_ms: u64) -> WorkerPool {
        WorkerPool::new(WorkerConfig {
            max_workers,
            queue_depth,
            item_timeout: Duration::from_millis(timeout_ms),
        })
    }

    fn ok_work(value: i64) -> WorkFuture {
        Box::pin(async move { Ok(json!(value)) })
    }

    #[tokio::test]
    async fn submit_resolves_with_the_work_result() {
        let pool = pool(4, 8, 1000);
        let result = pool.submit("s-1", "op", ok_work(7)).await.unwrap().unwrap();
        assert_eq!(result, json!(7));
        assert_eq!(pool.active_workers(), 1);
    }

    #[tokio::test]
    async fn application_errors_pass_through() {
        let pool = pool(4, 8, 1000);
        let work: WorkFuture = Box::pin(async { Err(McpError::server_error("boom")) });
        let result = pool.submit("s-1", "op", work).await.unwrap();
        assert_eq!(result.unwrap_err().code, -32000);
    }

    #[tokio::test]
    async fn slow_items_time_out() {
        let pool = pool(4, 8, 50);
        let work: WorkFuture = Box::pin(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!(null))
        });
        let err = pool.submit("s-1", "slow", work).await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout));
    }

    #[tokio::test]
    async fn full_queue_rejects_with_busy() {
        // One execution slot, occupied by a sleeper; queue depth 1.
        let pool = Arc::new(pool(1, 1, 2000));

        let blocker: WorkFuture = Box::pin(async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(json!("done"))
        });
        let p = pool.clone();
        let running = tokio::spawn(async move { p.submit("s-1", "blocker", blocker).await });

        // Give the worker time to dequeue the blocker into execution
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Fills the queue slot
        let p = pool.clone();
        let queued = tokio::spawn(async move { p.submit("s-1", "queued", ok_work(1)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Queue now full
        let err = pool.submit("s-1", "overflow", ok_work(2)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Busy));

        // Accepted items still resolve — nothing is silently dropped
        assert_eq!(running.await.unwrap().unwrap().unwrap(), json!("done"));
        assert_eq!(queued.await.unwrap().unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn panic_is_isolated_to_the_item() {
        let pool = pool(4, 8, 1000);
        let work: WorkFuture = Box::pin(async { panic!("tool bug") });
        let result = pool.submit("s-1", "bad", work).await.unwrap();
        assert_eq!(result.unwrap_err().code, -32603);

        // Same session keeps working after the panic
        let result = pool.submit("s-1", "good", ok_work(3)).await.unwrap().unwrap();
        assert_eq!(result, json!(3));

        // Other sessions unaffected
        let result = pool.submit("s-2", "other", ok_work(4)).await.unwrap().unwrap();
        assert_eq!(result, json!(4));
    }

    #[tokio::test]
    async fn release_targets_a_single_session() {
        let pool = pool(4, 8, 1000);
        pool.submit("s-1", "op", ok_work(1)).await.unwrap().unwrap();
        pool.submit("s-2", "op", ok_work(2)).await.unwrap().unwrap();
        assert_eq!(pool.active_workers(), 2);

        pool.release("s-1");
        assert_eq!(pool.active_workers(), 1);

        // s-2 survives s-1's teardown
        pool.submit("s-2", "op", ok_work(5)).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let pool = pool(4, 8, 1000);
        pool.submit("s-1", "op", ok_work(1)).await.unwrap().unwrap();
        pool.shutdown();
        assert_eq!(pool.active_workers(), 0);

        let err = pool.submit("s-1", "op", ok_work(2)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Closed));
    }
}
