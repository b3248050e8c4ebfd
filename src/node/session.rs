use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    net::TcpStream,
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
};
use tokio_util::codec::Framed;

use crate::{
    barrier::{ExecutionContext, ExecutionError},
    cluster::{Address, Host},
    communication::{
        connect_to_host, CommunicationError, ControlPlaneCodec, CoordinatorNotification, RequestId,
        SessionNotification,
    },
};

type SessionFramed = Framed<TcpStream, ControlPlaneCodec<SessionNotification, CoordinatorNotification>>;
type CoordinatorSink = SplitSink<SessionFramed, SessionNotification>;
type CoordinatorStream = SplitStream<SessionFramed>;

/// How the coordinator answered a request.
#[derive(Debug)]
enum Outcome {
    Completed,
    Rejected(String),
    TimedOut,
}

/// Messages from the [`Session`] handle to the task owning the connection.
enum SessionCommand {
    Request(RequestId, SessionNotification, oneshot::Sender<Outcome>),
    /// Acknowledged once the notification was written to the connection.
    Notify(SessionNotification, oneshot::Sender<()>),
    /// The caller stopped waiting for the request.
    Cancel(RequestId),
}

/// A client connection from this host to the coordinator of a remote
/// [`Server`](crate::node::Server).
///
/// Requests may be issued concurrently; each one waits for its own answer.
/// A request whose future is dropped is withdrawn at the coordinator, so it
/// neither deposits nor consumes tokens unless it completed already.
/// Dropping the `Session` closes the connection, which withdraws the
/// requests still waiting there.
pub struct Session {
    host: Host,
    remote: Host,
    command_tx: UnboundedSender<SessionCommand>,
    next_request: AtomicU64,
}

impl Session {
    /// Connects `host` to the coordinator of `remote`, retrying for at most
    /// `attempts` attempts while the remote endpoint is not up yet.
    ///
    /// Must be called from within a runtime, which then drives the connection.
    pub async fn connect(
        host: Host,
        remote: Host,
        address: &Address,
        attempts: usize,
    ) -> Result<Self, CommunicationError> {
        let stream = connect_to_host(address, attempts).await?;
        let (mut coordinator_tx, coordinator_rx) = Framed::new(
            stream,
            ControlPlaneCodec::<SessionNotification, CoordinatorNotification>::default(),
        )
        .split();

        // Identify this host to the coordinator.
        coordinator_tx
            .send(SessionNotification::Initialized(host.clone()))
            .await?;
        tracing::debug!("[Session {}] Connected to {} at {}.", host, remote, address);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let session_host = host.clone();
        tokio::spawn(async move {
            if let Err(error) =
                Session::drive(&session_host, coordinator_tx, coordinator_rx, command_rx).await
            {
                tracing::warn!(
                    "[Session {}] The connection terminated with an error: {}",
                    session_host,
                    error
                );
            }
        });

        Ok(Self {
            host,
            remote,
            command_tx,
            next_request: AtomicU64::new(0),
        })
    }

    async fn drive(
        host: &Host,
        mut coordinator_tx: CoordinatorSink,
        mut coordinator_rx: CoordinatorStream,
        mut command_rx: UnboundedReceiver<SessionCommand>,
    ) -> Result<(), CommunicationError> {
        let mut pending: HashMap<RequestId, oneshot::Sender<Outcome>> = HashMap::new();
        loop {
            tokio::select! {
                // Handle requests issued through the handle.
                command = command_rx.recv() => {
                    match command {
                        Some(SessionCommand::Request(request, msg, outcome_tx)) => {
                            pending.insert(request, outcome_tx);
                            coordinator_tx.send(msg).await?;
                        }
                        Some(SessionCommand::Cancel(request)) => {
                            if pending.remove(&request).is_some() {
                                coordinator_tx.send(SessionNotification::Cancel { request }).await?;
                            }
                        }
                        Some(SessionCommand::Notify(msg, ack_tx)) => {
                            let closing = matches!(msg, SessionNotification::Shutdown);
                            coordinator_tx.send(msg).await?;
                            let _ = ack_tx.send(());
                            if closing {
                                return Ok(());
                            }
                        }
                        None => {
                            // The handle was dropped.
                            tracing::trace!("[Session {}] Closing the connection.", host);
                            coordinator_tx.send(SessionNotification::Shutdown).await?;
                            return Ok(());
                        }
                    }
                }

                // Handle answers from the coordinator.
                msg_from_coordinator = coordinator_rx.next() => {
                    let (request, outcome) = match msg_from_coordinator {
                        Some(Ok(CoordinatorNotification::Completed(request))) => {
                            (request, Outcome::Completed)
                        }
                        Some(Ok(CoordinatorNotification::Rejected(request, reason))) => {
                            (request, Outcome::Rejected(reason))
                        }
                        Some(Ok(CoordinatorNotification::TimedOut(request))) => {
                            (request, Outcome::TimedOut)
                        }
                        Some(Ok(CoordinatorNotification::Shutdown)) => {
                            tracing::debug!("[Session {}] The coordinator shut down.", host);
                            return Ok(());
                        }
                        Some(Err(error)) => return Err(error.into()),
                        None => return Err(CommunicationError::Disconnected),
                    };
                    match pending.remove(&request) {
                        Some(outcome_tx) => {
                            // The caller may have given up waiting.
                            let _ = outcome_tx.send(outcome);
                        }
                        // Answers to withdrawn requests may cross the cancellation.
                        None => tracing::debug!(
                            "[Session {}] Received {:?} for the withdrawn request {}.",
                            host,
                            outcome,
                            request
                        ),
                    }
                }
            }
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The host whose coordinator this session is connected to.
    pub fn remote(&self) -> &Host {
        &self.remote
    }

    async fn request(
        &self,
        queue: &str,
        make_msg: impl FnOnce(RequestId) -> SessionNotification,
    ) -> Result<(), ExecutionError> {
        let request = self.next_request.fetch_add(1, Ordering::SeqCst);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        self.command_tx
            .send(SessionCommand::Request(request, make_msg(request), outcome_tx))
            .map_err(CommunicationError::from)?;

        // Withdraws the request if this future is dropped while it waits.
        let mut pending = PendingRequest {
            command_tx: &self.command_tx,
            request,
            armed: true,
        };
        let outcome = outcome_rx.await;
        pending.armed = false;
        match outcome.map_err(CommunicationError::from)? {
            Outcome::Completed => Ok(()),
            Outcome::Rejected(reason) => Err(ExecutionError::Rejected {
                queue: queue.to_string(),
                reason,
            }),
            Outcome::TimedOut => Err(ExecutionError::Timeout {
                queue: queue.to_string(),
            }),
        }
    }

    async fn notify(&self, msg: SessionNotification) -> Result<(), CommunicationError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx.send(SessionCommand::Notify(msg, ack_tx))?;
        ack_rx.await?;
        Ok(())
    }

    /// Asks the remote server to shut down, which makes its
    /// [`join`](crate::node::Server::join) return.
    ///
    /// Resolves once the request was sent.
    pub async fn shutdown_server(&self) -> Result<(), CommunicationError> {
        tracing::debug!("[Session {}] Asking {} to shut down.", self.host, self.remote);
        self.notify(SessionNotification::ShutdownServer).await
    }

    /// Closes the connection. Requests still waiting fail with a disconnection.
    pub async fn close(&self) -> Result<(), CommunicationError> {
        self.notify(SessionNotification::Shutdown).await
    }
}

struct PendingRequest<'a> {
    command_tx: &'a UnboundedSender<SessionCommand>,
    request: RequestId,
    armed: bool,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if self.armed {
            // The connection may be gone, which withdraws the request as well.
            let _ = self.command_tx.send(SessionCommand::Cancel(self.request));
        }
    }
}

fn deadline_ms(timeout: Option<Duration>) -> Option<u64> {
    timeout.map(|timeout| timeout.as_millis() as u64)
}

#[async_trait]
impl ExecutionContext for Session {
    async fn enqueue_all(
        &self,
        queues: &[String],
        capacity: usize,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutionError> {
        self.request(&queues.join(","), |request| SessionNotification::Enqueue {
            request,
            queues: queues.to_vec(),
            capacity,
            deadline_ms: deadline_ms(timeout),
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
        self.request(queue, |request| SessionNotification::DequeueMany {
            request,
            queue: queue.to_string(),
            capacity,
            count,
            deadline_ms: deadline_ms(timeout),
        })
        .await
    }
}
