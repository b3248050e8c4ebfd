//! Barriers that let join hosts wait until every signal host finished its work.
//!
//! Hosts never address each other directly. Each join host owns a bounded
//! token queue named after the barrier, with one slot per signal host. A
//! signal host waits for its task list and then deposits one token into the
//! queue of every join host, all at once: a signal that fails leaves no
//! token behind. A join host dequeues as many tokens as there are
//! signal hosts, so it can only pass once each of them announced itself.
//! Hosts that are neither signal nor join hosts are bystanders.
//!
//! The queues live in an [`ExecutionContext`]: a
//! [`Session`](crate::node::Session) to the rendezvous coordinator when hosts
//! are separate processes, or a [`LocalExecutionContext`] in tests.
use std::{sync::Arc, time::Duration};

use futures::future;

use crate::{cluster::Host, context::ClusterContext, context::ContextError};

// Private submodules
mod errors;
mod execution;
mod operation;

// Public exports
pub use errors::{ExecutionError, OperationError};
pub use execution::{ExecutionContext, LocalExecutionContext};
pub use operation::{Completion, FnOperation, Operation};

/// The operations a signal host waits for before it announces itself.
pub type TaskList = Vec<Arc<dyn Operation>>;

/// The part of a [`Barrier`] executed by one signal host.
pub struct SignalOp {
    host: Host,
    tasks: TaskList,
    queues: Vec<String>,
    capacity: usize,
}

impl SignalOp {
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The queues this host deposits a token into, one per join host.
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    async fn execute<C>(&self, ctx: &C, timeout: Option<Duration>) -> Result<(), ExecutionError>
    where
        C: ExecutionContext + ?Sized,
    {
        future::try_join_all(self.tasks.iter().map(|task| task.wait())).await?;
        tracing::debug!(
            "[Barrier] Signal host {} completed {} tasks.",
            self.host,
            self.tasks.len()
        );
        // All tokens land together; a failed signal deposits none.
        ctx.enqueue_all(&self.queues, self.capacity, timeout).await
    }
}

/// The part of a [`Barrier`] executed by one join host.
pub struct JoinOp {
    host: Host,
    queue: String,
    count: usize,
}

impl JoinOp {
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The queue this host drains.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    async fn execute<C>(&self, ctx: &C, timeout: Option<Duration>) -> Result<(), ExecutionError>
    where
        C: ExecutionContext + ?Sized,
    {
        ctx.dequeue_many(&self.queue, self.count, self.count, timeout)
            .await?;
        tracing::debug!(
            "[Barrier] Join host {} received {} signals on {}.",
            self.host,
            self.count,
            self.queue
        );
        Ok(())
    }
}

/// The operation a host executes for a [`Barrier`].
pub enum BarrierOp<'a> {
    Signal(&'a SignalOp),
    Join(&'a JoinOp),
    /// The host takes no part in the barrier.
    NoOp,
}

impl<'a> BarrierOp<'a> {
    pub fn is_noop(&self) -> bool {
        matches!(self, BarrierOp::NoOp)
    }

    /// Executes the operation in `ctx` and waits for it to complete.
    pub async fn execute<C>(&self, ctx: &C, timeout: Option<Duration>) -> Result<(), ExecutionError>
    where
        C: ExecutionContext + ?Sized,
    {
        match self {
            BarrierOp::Signal(op) => op.execute(ctx, timeout).await,
            BarrierOp::Join(op) => op.execute(ctx, timeout).await,
            BarrierOp::NoOp => Ok(()),
        }
    }
}

/// A named synchronization point between signal hosts and join hosts.
///
/// Barriers built with the same name in different processes share their
/// queues, so every process constructs the same barrier and runs its own part.
/// Each signal host must run its part exactly once per barrier name; running
/// it twice fills the queues beyond one phase and is not detected.
pub struct Barrier {
    name: String,
    signal_ops: Vec<SignalOp>,
    join_ops: Vec<JoinOp>,
    timeout: Option<Duration>,
}

impl Barrier {
    /// Creates a barrier whose signal hosts announce themselves unconditionally.
    pub fn new(name: &str, signal_hosts: Vec<Host>, join_hosts: Vec<Host>) -> Self {
        let task_lists = signal_hosts.iter().map(|_| Vec::new()).collect();
        Self::build(name, signal_hosts, join_hosts, task_lists)
    }

    /// Creates a barrier where signal host `i` announces itself only after
    /// every operation of `task_lists[i]` completed.
    pub fn with_tasks(
        name: &str,
        signal_hosts: Vec<Host>,
        join_hosts: Vec<Host>,
        task_lists: Vec<TaskList>,
    ) -> Result<Self, ExecutionError> {
        if task_lists.len() != signal_hosts.len() {
            return Err(ExecutionError::TaskListMismatch {
                signal_hosts: signal_hosts.len(),
                task_lists: task_lists.len(),
            });
        }
        Ok(Self::build(name, signal_hosts, join_hosts, task_lists))
    }

    fn build(
        name: &str,
        signal_hosts: Vec<Host>,
        join_hosts: Vec<Host>,
        task_lists: Vec<TaskList>,
    ) -> Self {
        let capacity = signal_hosts.len();
        let queues: Vec<String> = (0..join_hosts.len())
            .map(|join_index| format!("{}_{}", name, join_index))
            .collect();
        let join_ops = join_hosts
            .into_iter()
            .zip(queues.iter())
            .map(|(host, queue)| JoinOp {
                host,
                queue: queue.clone(),
                count: capacity,
            })
            .collect();
        let signal_ops = signal_hosts
            .into_iter()
            .zip(task_lists)
            .map(|(host, tasks)| SignalOp {
                host,
                tasks,
                queues: queues.clone(),
                capacity,
            })
            .collect();
        Self {
            name: name.to_string(),
            signal_ops,
            join_ops,
            timeout: None,
        }
    }

    /// Bounds how long each queue request of the barrier may wait.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signal_hosts(&self) -> impl Iterator<Item = &Host> {
        self.signal_ops.iter().map(|op| &op.host)
    }

    pub fn join_hosts(&self) -> impl Iterator<Item = &Host> {
        self.join_ops.iter().map(|op| &op.host)
    }

    /// Returns the part of the barrier `host` executes.
    ///
    /// A host listed as signal host signals, even if it is a join host too.
    pub fn barrier(&self, host: &Host) -> BarrierOp<'_> {
        if let Some(op) = self.signal_ops.iter().find(|op| op.host == *host) {
            BarrierOp::Signal(op)
        } else if let Some(op) = self.join_ops.iter().find(|op| op.host == *host) {
            BarrierOp::Join(op)
        } else {
            BarrierOp::NoOp
        }
    }

    /// Executes the part of `host` in `ctx` and waits for it to complete.
    pub async fn run_in<C>(&self, ctx: &C, host: &Host) -> Result<(), ExecutionError>
    where
        C: ExecutionContext + ?Sized,
    {
        let op = self.barrier(host);
        if op.is_noop() {
            tracing::trace!("[Barrier {}] {} is a bystander.", self.name, host);
        }
        op.execute(ctx, self.timeout).await
    }

    /// Executes the part of this host in the session of `ctx`, blocking the
    /// calling thread until it completes.
    ///
    /// Without an own timeout the barrier uses the one configured in `ctx`.
    pub fn run(&self, ctx: &ClusterContext) -> Result<(), ContextError> {
        let host = ctx
            .this_host()
            .ok_or(ContextError::NotConstructed("this host"))?;
        let op = self.barrier(host);
        if op.is_noop() {
            tracing::debug!("[Barrier {}] {} is a bystander.", self.name, host);
            return Ok(());
        }
        let timeout = self.timeout.or_else(|| ctx.barrier_timeout());
        let session = ctx.session()?;
        tracing::debug!("[Barrier {}] Running the part of {}.", self.name, host);
        ctx.block_on(session.run(&op, timeout))??;
        Ok(())
    }
}
