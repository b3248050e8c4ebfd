//! The rendezvous service hosted by every [`Server`](crate::node::Server).
//!
//! A `Coordinator` accepts connections from [`Session`](crate::node::Session)s
//! and serves their enqueue and dequeue-many requests from a single
//! [`QueueTable`]. Requests that cannot complete right away are parked and
//! answered once other requests unblock them, their deadline passes, or their
//! session disconnects.
use std::{collections::HashMap, time::Duration};

use futures::{future, stream::SplitSink, SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, Receiver, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tokio_util::codec::Framed;

use crate::{
    cluster::Host,
    communication::{
        CommunicationError, ControlPlaneCodec, CoordinatorNotification, DriverNotification,
        RequestId, SessionNotification,
    },
};

use super::queues::QueueTable;

/// Identifies one connection accepted by the [`Coordinator`].
type SessionId = usize;

/// A request parked in the [`QueueTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Waiter {
    session: SessionId,
    request: RequestId,
}

/// The notifications relayed from the tasks handling each session to the
/// main loop of the [`Coordinator`].
#[derive(Debug)]
enum SessionHandlerNotification {
    Connected(SessionId, Host),
    Request(SessionId, SessionNotification),
    Expired(Waiter),
    ShutdownServer(SessionId),
    Disconnected(SessionId),
}

type SessionSink =
    SplitSink<Framed<TcpStream, ControlPlaneCodec<CoordinatorNotification, SessionNotification>>, CoordinatorNotification>;

pub(crate) struct Coordinator {
    /// The host whose [`Server`](crate::node::Server) runs this coordinator.
    host: Host,
    /// The bound endpoint of the server.
    listener: TcpListener,
    /// A Receiver corresponding to a channel between the owner of the Server and the Coordinator.
    driver_notification_rx: Receiver<DriverNotification>,
    /// The handlers corresponding to each connected Session.
    session_handlers: HashMap<SessionId, JoinHandle<()>>,
    /// Channels to the handler of each connected Session.
    channels_to_sessions: HashMap<SessionId, UnboundedSender<CoordinatorNotification>>,
    /// The hosts that identified themselves on each connection.
    session_hosts: HashMap<SessionId, Host>,
    queues: QueueTable<Waiter>,
    /// The timers expiring parked requests that carry a deadline.
    expiry_timers: HashMap<Waiter, JoinHandle<()>>,
    next_session_id: SessionId,
}

impl Coordinator {
    pub(crate) fn new(
        host: Host,
        listener: TcpListener,
        driver_notification_rx: Receiver<DriverNotification>,
    ) -> Self {
        Self {
            host,
            listener,
            driver_notification_rx,
            session_handlers: HashMap::new(),
            channels_to_sessions: HashMap::new(),
            session_hosts: HashMap::new(),
            queues: QueueTable::new(),
            expiry_timers: HashMap::new(),
            next_session_id: 0,
        }
    }

    /// Serves sessions until the owner of the server or a session requests a shutdown.
    pub(crate) async fn run(&mut self) -> Result<(), CommunicationError> {
        let (sessions_to_coordinator_tx, mut sessions_to_coordinator_rx) =
            mpsc::unbounded_channel();

        loop {
            tokio::select! {
                // Handle new Session connections.
                session_connection = self.listener.accept() => {
                    match session_connection {
                        Ok((session_stream, session_address)) => {
                            let session_id = self.next_session_id;
                            self.next_session_id += 1;
                            tracing::debug!(
                                "[Coordinator {}] Received a connection from {} (session {}).",
                                self.host,
                                session_address,
                                session_id
                            );
                            if let Err(error) = session_stream.set_nodelay(true) {
                                tracing::warn!(
                                    "[Coordinator {}] Could not set TCP_NODELAY on session {}: {}",
                                    self.host,
                                    session_id,
                                    error
                                );
                            }
                            let (coordinator_to_session_tx, coordinator_to_session_rx) =
                                mpsc::unbounded_channel();
                            self.channels_to_sessions
                                .insert(session_id, coordinator_to_session_tx);
                            let session_handler = tokio::spawn(Coordinator::handle_session(
                                session_id,
                                session_stream,
                                sessions_to_coordinator_tx.clone(),
                                coordinator_to_session_rx,
                            ));
                            self.session_handlers.insert(session_id, session_handler);
                        }
                        Err(error) => {
                            tracing::error!(
                                "[Coordinator {}] Received an error when accepting a connection: {}",
                                self.host,
                                error
                            );
                        }
                    }
                }

                // Handle messages from the owner of the Server.
                Some(driver_notification) = self.driver_notification_rx.recv() => {
                    match driver_notification {
                        DriverNotification::Shutdown => {
                            tracing::debug!(
                                "[Coordinator {}] Received a Shutdown notification from the owner.",
                                self.host
                            );
                            self.shutdown().await;
                            return Ok(());
                        }
                    }
                }

                // Handle messages relayed by the Session handlers.
                Some(session_handler_msg) = sessions_to_coordinator_rx.recv() => {
                    if let SessionHandlerNotification::ShutdownServer(session_id) = session_handler_msg {
                        tracing::debug!(
                            "[Coordinator {}] Session {} requested the server to shut down.",
                            self.host,
                            session_id
                        );
                        self.shutdown().await;
                        return Ok(());
                    }
                    self.handle_session_message(session_handler_msg, &sessions_to_coordinator_tx);
                }
            }
        }
    }

    /// Asks every session handler to close its connection and waits for them.
    async fn shutdown(&mut self) {
        for (session_id, channel) in self.channels_to_sessions.drain() {
            if channel.send(CoordinatorNotification::Shutdown).is_err() {
                tracing::trace!(
                    "[Coordinator {}] The handler of session {} already terminated.",
                    self.host,
                    session_id
                );
            }
        }
        for (_, timer) in self.expiry_timers.drain() {
            timer.abort();
        }
        future::join_all(self.session_handlers.drain().map(|(_, handler)| handler)).await;
        tracing::info!(
            "[Coordinator {}] Shutting down with {} requests still waiting.",
            self.host,
            self.queues.pending()
        );
    }

    fn handle_session_message(
        &mut self,
        session_handler_msg: SessionHandlerNotification,
        sessions_to_coordinator_tx: &UnboundedSender<SessionHandlerNotification>,
    ) {
        match session_handler_msg {
            SessionHandlerNotification::Connected(session_id, host) => {
                tracing::debug!(
                    "[Coordinator {}] Session {} belongs to host {}.",
                    self.host,
                    session_id,
                    host
                );
                self.session_hosts.insert(session_id, host);
            }
            SessionHandlerNotification::Request(session_id, request) => {
                self.handle_request(session_id, request, sessions_to_coordinator_tx);
            }
            SessionHandlerNotification::Expired(waiter) => {
                self.expiry_timers.remove(&waiter);
                // The request may have completed in the meantime, then there is nothing to expire.
                if let Some((expired, completed)) = self.queues.cancel(|w| *w == waiter) {
                    tracing::debug!(
                        "[Coordinator {}] Request {} of session {} timed out.",
                        self.host,
                        expired.request,
                        expired.session
                    );
                    self.respond(
                        expired.session,
                        CoordinatorNotification::TimedOut(expired.request),
                    );
                    self.complete(completed);
                }
            }
            SessionHandlerNotification::Disconnected(session_id) => {
                let host = self.session_hosts.remove(&session_id);
                tracing::debug!(
                    "[Coordinator {}] Session {} ({:?}) disconnected.",
                    self.host,
                    session_id,
                    host
                );
                self.channels_to_sessions.remove(&session_id);
                // The handler is terminating on its own.
                self.session_handlers.remove(&session_id);
                self.expiry_timers.retain(|waiter, timer| {
                    if waiter.session == session_id {
                        timer.abort();
                        false
                    } else {
                        true
                    }
                });
                let completed = self.queues.cancel_all(|w| w.session == session_id);
                self.complete(completed);
            }
            // Shutdown requests are handled by the main loop.
            SessionHandlerNotification::ShutdownServer(session_id) => tracing::warn!(
                "[Coordinator {}] Ignoring a late shutdown request of session {}.",
                self.host,
                session_id
            ),
        }
    }

    fn handle_request(
        &mut self,
        session_id: SessionId,
        request: SessionNotification,
        sessions_to_coordinator_tx: &UnboundedSender<SessionHandlerNotification>,
    ) {
        let (waiter, deadline_ms, result) = match request {
            SessionNotification::Enqueue {
                request,
                queues,
                capacity,
                deadline_ms,
            } => {
                tracing::trace!(
                    "[Coordinator {}] Session {} enqueues into {:?} (request {}).",
                    self.host,
                    session_id,
                    queues,
                    request
                );
                let waiter = Waiter {
                    session: session_id,
                    request,
                };
                let result = self.queues.enqueue_all(&queues, capacity, waiter);
                (waiter, deadline_ms, result)
            }
            SessionNotification::DequeueMany {
                request,
                queue,
                capacity,
                count,
                deadline_ms,
            } => {
                tracing::trace!(
                    "[Coordinator {}] Session {} dequeues {} tokens from {} (request {}).",
                    self.host,
                    session_id,
                    count,
                    queue,
                    request
                );
                let waiter = Waiter {
                    session: session_id,
                    request,
                };
                let result = self.queues.dequeue_many(&queue, capacity, count, waiter);
                (waiter, deadline_ms, result)
            }
            SessionNotification::Cancel { request } => {
                let waiter = Waiter {
                    session: session_id,
                    request,
                };
                if let Some(timer) = self.expiry_timers.remove(&waiter) {
                    timer.abort();
                }
                match self.queues.cancel(|w| *w == waiter) {
                    Some((_, completed)) => {
                        tracing::trace!(
                            "[Coordinator {}] Session {} withdrew request {}.",
                            self.host,
                            session_id,
                            request
                        );
                        self.complete(completed);
                    }
                    None => tracing::trace!(
                        "[Coordinator {}] Request {} of session {} was no longer waiting.",
                        self.host,
                        request,
                        session_id
                    ),
                }
                return;
            }
            // Connection management is handled by the session handlers.
            other => {
                tracing::warn!(
                    "[Coordinator {}] Ignoring {:?} relayed as a request of session {}.",
                    self.host,
                    other,
                    session_id
                );
                return;
            }
        };

        match result {
            Ok(completed) => {
                let parked = !completed.contains(&waiter);
                self.complete(completed);
                if let (true, Some(deadline_ms)) = (parked, deadline_ms) {
                    let expiry_tx = sessions_to_coordinator_tx.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(deadline_ms)).await;
                        // The coordinator may have shut down already.
                        let _ = expiry_tx.send(SessionHandlerNotification::Expired(waiter));
                    });
                    self.expiry_timers.insert(waiter, timer);
                }
            }
            Err(error) => {
                tracing::warn!(
                    "[Coordinator {}] Rejecting request {} of session {}: {}",
                    self.host,
                    waiter.request,
                    session_id,
                    error
                );
                self.respond(
                    session_id,
                    CoordinatorNotification::Rejected(waiter.request, error.to_string()),
                );
            }
        }
    }

    fn complete(&mut self, completed: Vec<Waiter>) {
        for waiter in completed {
            if let Some(timer) = self.expiry_timers.remove(&waiter) {
                timer.abort();
            }
            self.respond(waiter.session, CoordinatorNotification::Completed(waiter.request));
        }
    }

    fn respond(&self, session_id: SessionId, notification: CoordinatorNotification) {
        match self.channels_to_sessions.get(&session_id) {
            Some(channel) => {
                if let Err(error) = channel.send(notification) {
                    tracing::warn!(
                        "[Coordinator {}] Error responding to session {}: {}",
                        self.host,
                        session_id,
                        error
                    );
                }
            }
            None => tracing::warn!(
                "[Coordinator {}] Dropping {:?} for the unknown session {}.",
                self.host,
                notification,
                session_id
            ),
        }
    }

    /// A task that relays messages from a specific [`Session`](crate::node::Session)
    /// to the [`Coordinator`] and vice-versa.
    ///
    /// # Arguments
    /// * `session_id`: The ID the coordinator assigned to the connection.
    /// * `session_stream`: The TCP stream that was initiated by the `Session`.
    /// * `channel_to_coordinator`: An MPSC channel shared across all the handlers
    ///    to relay requests to the `Coordinator`.
    /// * `channel_from_coordinator`: An MPSC channel where the `Coordinator`
    ///    sends the responses destined to this session.
    async fn handle_session(
        session_id: SessionId,
        session_stream: TcpStream,
        channel_to_coordinator: UnboundedSender<SessionHandlerNotification>,
        mut channel_from_coordinator: UnboundedReceiver<CoordinatorNotification>,
    ) {
        let (mut session_tx, mut session_rx) = Framed::new(
            session_stream,
            ControlPlaneCodec::<CoordinatorNotification, SessionNotification>::default(),
        )
        .split();

        async fn send_to_session(
            session_id: SessionId,
            session_tx: &mut SessionSink,
            msg: CoordinatorNotification,
        ) -> bool {
            match session_tx.send(msg).await {
                Ok(()) => true,
                Err(error) => {
                    tracing::warn!(
                        "[SessionHandler {}] Error sending a response to the Session: {}",
                        session_id,
                        error
                    );
                    false
                }
            }
        }

        loop {
            tokio::select! {
                // Handle messages received from the Session.
                msg_from_session = session_rx.next() => {
                    let relayed = match msg_from_session {
                        Some(Ok(SessionNotification::Initialized(host))) => {
                            channel_to_coordinator.send(SessionHandlerNotification::Connected(session_id, host))
                        }
                        Some(Ok(SessionNotification::ShutdownServer)) => {
                            channel_to_coordinator.send(SessionHandlerNotification::ShutdownServer(session_id))
                        }
                        Some(Ok(SessionNotification::Shutdown)) => {
                            tracing::trace!("[SessionHandler {}] The Session closed the connection.", session_id);
                            let _ = channel_to_coordinator.send(SessionHandlerNotification::Disconnected(session_id));
                            return;
                        }
                        Some(Ok(request)) => {
                            channel_to_coordinator.send(SessionHandlerNotification::Request(session_id, request))
                        }
                        Some(Err(error)) => {
                            tracing::warn!(
                                "[SessionHandler {}] Error receiving a message from the Session: {}",
                                session_id,
                                error
                            );
                            let _ = channel_to_coordinator.send(SessionHandlerNotification::Disconnected(session_id));
                            return;
                        }
                        None => {
                            let _ = channel_to_coordinator.send(SessionHandlerNotification::Disconnected(session_id));
                            return;
                        }
                    };
                    if relayed.is_err() {
                        // The coordinator terminated.
                        return;
                    }
                }

                // Handle responses from the Coordinator.
                msg_from_coordinator = channel_from_coordinator.recv() => {
                    match msg_from_coordinator {
                        Some(CoordinatorNotification::Shutdown) => {
                            send_to_session(session_id, &mut session_tx, CoordinatorNotification::Shutdown).await;
                            return;
                        }
                        Some(msg) => {
                            if !send_to_session(session_id, &mut session_tx, msg).await {
                                let _ = channel_to_coordinator.send(SessionHandlerNotification::Disconnected(session_id));
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn make_coordinator() -> (Coordinator, mpsc::Sender<DriverNotification>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (driver_tx, driver_rx) = mpsc::channel(1);
        let coordinator = Coordinator::new(Host::any_address("worker", 0), listener, driver_rx);
        (coordinator, driver_tx)
    }

    /// Registers a session without a connection; returns what the coordinator sends to it.
    fn add_session(
        coordinator: &mut Coordinator,
        session_id: SessionId,
    ) -> UnboundedReceiver<CoordinatorNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        coordinator.channels_to_sessions.insert(session_id, tx);
        coordinator
            .session_handlers
            .insert(session_id, tokio::spawn(async {}));
        rx
    }

    fn dequeue(request: RequestId, queue: &str, deadline_ms: Option<u64>) -> SessionNotification {
        SessionNotification::DequeueMany {
            request,
            queue: queue.to_string(),
            capacity: 1,
            count: 1,
            deadline_ms,
        }
    }

    fn enqueue(request: RequestId, queue: &str) -> SessionNotification {
        SessionNotification::Enqueue {
            request,
            queues: vec![queue.to_string()],
            capacity: 1,
            deadline_ms: Some(60_000),
        }
    }

    /// A parked request that completes before its deadline stops its timer.
    #[tokio::test]
    async fn test_completion_stops_expiry_timer() {
        let (mut coordinator, _driver_tx) = make_coordinator().await;
        let (expiry_tx, _expiry_rx) = mpsc::unbounded_channel();
        let mut responses = add_session(&mut coordinator, 0);

        coordinator.handle_request(0, dequeue(1, "b_0", Some(60_000)), &expiry_tx);
        assert_eq!(coordinator.expiry_timers.len(), 1);
        coordinator.handle_request(0, enqueue(2, "b_0"), &expiry_tx);
        assert!(
            coordinator.expiry_timers.is_empty(),
            "Neither the completed dequeue nor the immediate enqueue should keep a timer."
        );
        assert!(matches!(responses.recv().await, Some(CoordinatorNotification::Completed(2))));
        assert!(matches!(responses.recv().await, Some(CoordinatorNotification::Completed(1))));
    }

    /// A cancelled request is withdrawn without an answer and consumes nothing.
    #[tokio::test]
    async fn test_cancel_withdraws_request() {
        let (mut coordinator, _driver_tx) = make_coordinator().await;
        let (expiry_tx, _expiry_rx) = mpsc::unbounded_channel();
        let mut responses = add_session(&mut coordinator, 0);

        coordinator.handle_request(0, dequeue(1, "p_0", Some(60_000)), &expiry_tx);
        coordinator.handle_request(0, SessionNotification::Cancel { request: 1 }, &expiry_tx);
        assert!(coordinator.expiry_timers.is_empty());
        assert_eq!(coordinator.queues.pending(), 0);

        coordinator.handle_request(0, enqueue(2, "p_0"), &expiry_tx);
        assert!(matches!(responses.recv().await, Some(CoordinatorNotification::Completed(2))));
        assert!(responses.try_recv().is_err(), "The cancelled request should get no answer.");
        assert_eq!(coordinator.queues.len("p_0"), Some(1));
    }

    /// A disconnected session leaves neither its handler, its timers nor its requests behind.
    #[tokio::test]
    async fn test_disconnect_releases_session_state() {
        let (mut coordinator, _driver_tx) = make_coordinator().await;
        let (expiry_tx, _expiry_rx) = mpsc::unbounded_channel();
        let _gone = add_session(&mut coordinator, 0);
        let mut other = add_session(&mut coordinator, 1);

        coordinator.handle_request(0, dequeue(1, "q", Some(60_000)), &expiry_tx);
        coordinator.handle_session_message(SessionHandlerNotification::Disconnected(0), &expiry_tx);
        assert!(!coordinator.session_handlers.contains_key(&0));
        assert_eq!(coordinator.session_handlers.len(), 1);
        assert!(coordinator.expiry_timers.is_empty());
        assert_eq!(coordinator.queues.pending(), 0);

        coordinator.handle_request(1, enqueue(1, "q"), &expiry_tx);
        assert!(matches!(other.recv().await, Some(CoordinatorNotification::Completed(1))));
        assert_eq!(
            coordinator.queues.len("q"),
            Some(1),
            "The token should stay for a later join."
        );
    }
}
