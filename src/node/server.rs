use std::net::SocketAddr;

use tokio::{
    net::TcpListener,
    runtime::{Builder, Runtime},
    sync::{mpsc, watch},
};

use crate::{
    cluster::{Address, Host},
    communication::{CommunicationError, DriverNotification},
};

use super::coordinator::Coordinator;

/// Settings for the endpoint a [`Server`] starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// The number of threads of the runtime that serves the endpoint.
    pub num_threads: usize,
    /// Binds to this address instead of the one the topology lists for the host,
    /// e.g. `0.0.0.0:2222`.
    pub bind_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            bind_address: None,
        }
    }
}

/// The in-process endpoint of one host of the cluster.
///
/// Each `Server` runs a coordinator on its own runtime which hosts the shared
/// queues barriers rendezvous on. Remote hosts reach it through a
/// [`Session`](crate::node::Session).
///
/// A `Server` owns a runtime, so it must be created and dropped outside of
/// any asynchronous context.
pub struct Server {
    host: Host,
    local_address: SocketAddr,
    /// A handle to communicate notifications to the underlying Coordinator.
    coordinator_handle: mpsc::Sender<DriverNotification>,
    /// Becomes `true` once the Coordinator terminated.
    terminated_rx: watch::Receiver<bool>,
    runtime: Runtime,
}

impl Server {
    /// Binds the endpoint of `host` and starts serving it.
    ///
    /// The endpoint binds to `address` unless the config overrides it. Binding
    /// errors are returned right away.
    pub(crate) fn start(
        host: Host,
        address: &Address,
        config: &ServerConfig,
    ) -> Result<Self, CommunicationError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.num_threads.max(1))
            .thread_name(format!("Server-{}", host.device_prefix()))
            .enable_all()
            .build()?;

        let bind_address = config
            .bind_address
            .clone()
            .unwrap_or_else(|| address.to_string());
        let listener = runtime.block_on(TcpListener::bind(bind_address.as_str()))?;
        let local_address = listener.local_addr()?;
        tracing::info!("[Server {}] Listening on {}.", host, local_address);

        // The channel used by the Server to submit requests to the Coordinator.
        let (coordinator_tx, coordinator_rx) = mpsc::channel(100);
        let (terminated_tx, terminated_rx) = watch::channel(false);

        let mut coordinator = Coordinator::new(host.clone(), listener, coordinator_rx);
        let coordinator_host = host.clone();
        runtime.spawn(async move {
            if let Err(error) = coordinator.run().await {
                tracing::error!(
                    "[Server {}] The coordinator terminated with an error: {}",
                    coordinator_host,
                    error
                );
            }
            let _ = terminated_tx.send(true);
        });

        Ok(Self {
            host,
            local_address,
            coordinator_handle: coordinator_tx,
            terminated_rx,
            runtime,
        })
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The address the endpoint is bound to.
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminated_rx.borrow()
    }

    /// Blocks the calling thread until the server terminates.
    ///
    /// The server terminates when [`shutdown`](Server::shutdown) is called or
    /// a remote session asks it to.
    pub fn join(&self) {
        let mut terminated_rx = self.terminated_rx.clone();
        self.runtime.block_on(async move {
            while !*terminated_rx.borrow() {
                if terminated_rx.changed().await.is_err() {
                    break;
                }
            }
        });
        tracing::debug!("[Server {}] Joined.", self.host);
    }

    /// Asks the server to terminate. Does not wait for it, see [`join`](Server::join).
    pub fn shutdown(&self) -> Result<(), CommunicationError> {
        if self.is_terminated() {
            return Ok(());
        }
        self.coordinator_handle
            .try_send(DriverNotification::Shutdown)
            .map_err(|_| CommunicationError::Disconnected)
    }
}
