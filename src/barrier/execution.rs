use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::{
    communication::CommunicationError,
    node::{QueueError, QueueTable},
};

use super::{BarrierOp, ExecutionError};

/// The shared medium barrier operations are executed in.
///
/// Every host of a cluster must execute its barrier operations in contexts
/// that address the same queues, e.g. [`Session`](crate::node::Session)s
/// connected to the same coordinator.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Deposits one token into each of `queues` at once, waiting while any
    /// of them holds `capacity` tokens.
    ///
    /// Either every queue receives its token or, on error, none does.
    async fn enqueue_all(
        &self,
        queues: &[String],
        capacity: usize,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutionError>;

    /// Deposits one token into `queue`, waiting while it holds `capacity` tokens.
    async fn enqueue(
        &self,
        queue: &str,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutionError> {
        self.enqueue_all(&[queue.to_string()], capacity, timeout)
            .await
    }

    /// Takes `count` tokens out of `queue`, waiting until that many are available.
    async fn dequeue_many(
        &self,
        queue: &str,
        capacity: usize,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutionError>;

    /// Triggers `op` and waits for it to complete.
    async fn run(&self, op: &BarrierOp<'_>, timeout: Option<Duration>) -> Result<(), ExecutionError> {
        op.execute(self, timeout).await
    }
}

struct LocalWaiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

/// An [`ExecutionContext`] whose queues live in this process.
///
/// Useful when all hosts of a barrier are simulated in one process.
pub struct LocalExecutionContext {
    queues: Mutex<QueueTable<LocalWaiter>>,
    next_id: AtomicU64,
}

impl LocalExecutionContext {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(QueueTable::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// The number of tokens `queue` currently holds.
    pub fn len(&self, queue: &str) -> Option<usize> {
        self.queues.lock().ok()?.len(queue)
    }

    async fn wait_for<F>(&self, queue: &str, timeout: Option<Duration>, submit: F) -> Result<(), ExecutionError>
    where
        F: FnOnce(&mut QueueTable<LocalWaiter>, LocalWaiter) -> Result<Vec<LocalWaiter>, QueueError>,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = oneshot::channel();
        {
            let mut queues = self.queues.lock().map_err(|_| poisoned())?;
            let completed = submit(&mut *queues, LocalWaiter { id, tx }).map_err(|e| {
                ExecutionError::Rejected {
                    queue: queue.to_string(),
                    reason: e.to_string(),
                }
            })?;
            notify(completed);
        }

        // Withdraws the request if this future is dropped while it waits.
        let mut pending = PendingRequest {
            queues: &self.queues,
            id,
            armed: true,
        };
        let outcome = match timeout {
            None => rx.await.map_err(|_| disconnected()),
            Some(timeout) => {
                let waited = tokio::time::timeout(timeout, &mut rx).await;
                match waited {
                    Ok(received) => received.map_err(|_| disconnected()),
                    Err(_) if pending.withdraw() => Err(ExecutionError::Timeout {
                        queue: queue.to_string(),
                    }),
                    // Completed while the deadline passed.
                    Err(_) => rx.await.map_err(|_| disconnected()),
                }
            }
        };
        pending.armed = false;
        outcome
    }
}

struct PendingRequest<'a> {
    queues: &'a Mutex<QueueTable<LocalWaiter>>,
    id: u64,
    armed: bool,
}

impl PendingRequest<'_> {
    /// Removes the request from its queues. Returns `false` if it was no longer waiting.
    fn withdraw(&mut self) -> bool {
        self.armed = false;
        let id = self.id;
        let mut queues = match self.queues.lock() {
            Ok(queues) => queues,
            Err(_) => return false,
        };
        match queues.cancel(|w| w.id == id) {
            Some((_, completed)) => {
                notify(completed);
                true
            }
            None => false,
        }
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.withdraw();
        }
    }
}

impl Default for LocalExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

fn notify(completed: Vec<LocalWaiter>) {
    for waiter in completed {
        // The waiting request may have been dropped.
        let _ = waiter.tx.send(());
    }
}

fn poisoned() -> ExecutionError {
    tracing::error!("The local queue table is poisoned.");
    disconnected()
}

fn disconnected() -> ExecutionError {
    CommunicationError::Disconnected.into()
}

#[async_trait]
impl ExecutionContext for LocalExecutionContext {
    async fn enqueue_all(
        &self,
        queues: &[String],
        capacity: usize,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutionError> {
        let label = queues.join(",");
        self.wait_for(&label, timeout, |table, waiter| {
            table.enqueue_all(queues, capacity, waiter)
        })
        .await
    }

    async fn dequeue_many(
        &self,
        queue: &str,
        capacity: usize,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutionError> {
        self.wait_for(queue, timeout, |queues, waiter| {
            queues.dequeue_many(queue, capacity, count, waiter)
        })
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_expired_dequeue_consumes_nothing() {
        let ctx = LocalExecutionContext::new();
        ctx.enqueue("q", 2, None).await.unwrap();
        let result = ctx
            .dequeue_many("q", 2, 2, Some(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(ExecutionError::Timeout { .. })));
        assert_eq!(ctx.len("q"), Some(1), "The expired dequeue should not take the token.");
        ctx.enqueue("q", 2, None).await.unwrap();
        ctx.dequeue_many("q", 2, 2, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(ctx.len("q"), Some(0));
    }

    #[tokio::test]
    async fn test_capacity_mismatch_is_rejected() {
        let ctx = LocalExecutionContext::new();
        ctx.enqueue("q", 2, None).await.unwrap();
        assert!(matches!(
            ctx.enqueue("q", 3, None).await,
            Err(ExecutionError::Rejected { .. })
        ));
    }

    /// A dropped request leaves no waiter behind that could take tokens later.
    #[tokio::test]
    async fn test_dropped_request_is_withdrawn() {
        let ctx = LocalExecutionContext::new();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            ctx.dequeue_many("q", 1, 1, None),
        )
        .await;
        assert!(abandoned.is_err());
        ctx.enqueue("q", 1, None).await.unwrap();
        assert_eq!(ctx.len("q"), Some(1));
    }
}
