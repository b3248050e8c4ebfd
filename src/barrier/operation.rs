use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::watch;

use super::OperationError;

/// Work a signal host must finish before it announces itself at a barrier.
///
/// The barrier only observes completion; the work itself may run anywhere,
/// e.g. on an execution engine that reports back through a [`Completion`].
#[async_trait]
pub trait Operation: Send + Sync {
    /// Resolves once the operation completed.
    async fn wait(&self) -> Result<(), OperationError>;
}

/// An [`Operation`] that runs a closure on the blocking thread pool.
pub struct FnOperation<F> {
    f: Arc<F>,
}

impl<F> FnOperation<F>
where
    F: Fn() -> Result<(), OperationError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl<F> Operation for FnOperation<F>
where
    F: Fn() -> Result<(), OperationError> + Send + Sync + 'static,
{
    async fn wait(&self) -> Result<(), OperationError> {
        let f = Arc::clone(&self.f);
        tokio::task::spawn_blocking(move || (f)())
            .await
            .map_err(|e| OperationError(format!("the operation panicked: {}", e)))?
    }
}

/// A completion flag set by an external party.
///
/// Clones share the same flag. Waiting on a `Completion` resolves once
/// [`complete`](Completion::complete) or [`fail`](Completion::fail) is called;
/// the first outcome sticks, even when several threads race to set one.
#[derive(Clone)]
pub struct Completion {
    decided: Arc<AtomicBool>,
    tx: Arc<watch::Sender<Option<Result<(), OperationError>>>>,
    rx: watch::Receiver<Option<Result<(), OperationError>>>,
}

impl Completion {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            decided: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Marks the work as done. Returns `false` if an outcome was set already.
    pub fn complete(&self) -> bool {
        self.finish(Ok(()))
    }

    /// Marks the work as failed. Returns `false` if an outcome was set already.
    pub fn fail(&self, reason: impl Into<OperationError>) -> bool {
        self.finish(Err(reason.into()))
    }

    pub fn is_finished(&self) -> bool {
        self.rx.borrow().is_some()
    }

    fn finish(&self, outcome: Result<(), OperationError>) -> bool {
        if self
            .decided
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("Ignoring {:?} for an already finished completion.", outcome);
            return false;
        }
        // `self.rx` keeps the channel open.
        let _ = self.tx.send(Some(outcome));
        true
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operation for Completion {
    async fn wait(&self) -> Result<(), OperationError> {
        let mut rx = self.rx.clone();
        loop {
            let outcome = rx.borrow().clone();
            if let Some(outcome) = outcome {
                return outcome;
            }
            rx.changed()
                .await
                .map_err(|_| OperationError::from("the completion was dropped"))?;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_completion_first_outcome_sticks() {
        let completion = Completion::new();
        let waiter = completion.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        assert!(!completion.is_finished());
        assert!(completion.complete());
        assert!(!completion.fail("too late"));
        assert_eq!(handle.await.unwrap(), Ok(()));
        assert_eq!(completion.wait().await, Ok(()));
    }

    /// Exactly one of many racing callers decides the outcome, and waiters see that one.
    #[tokio::test]
    async fn test_racing_outcomes_agree() {
        for _ in 0..50 {
            let completion = Completion::new();
            let racers: Vec<_> = (0..8)
                .map(|i| {
                    let completion = completion.clone();
                    std::thread::spawn(move || {
                        let won = if i % 2 == 0 {
                            completion.complete()
                        } else {
                            completion.fail(format!("racer {}", i))
                        };
                        (i, won)
                    })
                })
                .collect();
            let winners: Vec<usize> = racers
                .into_iter()
                .map(|racer| racer.join().unwrap())
                .filter(|(_, won)| *won)
                .map(|(i, _)| i)
                .collect();
            assert_eq!(winners.len(), 1, "Only one caller should set the outcome.");
            let expected = if winners[0] % 2 == 0 {
                Ok(())
            } else {
                Err(OperationError(format!("racer {}", winners[0])))
            };
            assert_eq!(completion.wait().await, expected);
        }
    }

    #[tokio::test]
    async fn test_fn_operation() {
        let ok = FnOperation::new(|| Ok(()));
        assert_eq!(ok.wait().await, Ok(()));
        let failing = FnOperation::new(|| Err(OperationError::from("boom")));
        assert_eq!(failing.wait().await, Err(OperationError::from("boom")));
    }
}
