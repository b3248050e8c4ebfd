//! The identity and endpoint of one process of a cluster.
//!
//! A [`ClusterContext`] holds set-once slots for the cluster topology, the
//! identity of this process ([`this_host`](ClusterContext::this_host)), the
//! designated master, the local [`Server`] and the [`Session`] to the
//! rendezvous coordinator. It is created once at process start and passed by
//! reference to every component that needs it. Setting a slot twice fails
//! with [`ContextError::DoubleInitialization`].
//!
//! The bootstrap order is cluster, this host, server, then optionally master;
//! [`make_distribute_host`] runs it in one call.
use std::{future::Future, time::Duration};

use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Runtime};
use tracing_appender::non_blocking::WorkerGuard;

use crate::{
    cluster::{Address, Cluster, ClusterConfig, Host},
    node::{Server, ServerConfig, Session},
    Configuration,
};

mod errors;

pub use errors::ContextError;

/// The role of the master host when none is given.
pub const MASTER_ROLE: &str = "master";
/// The role whose hosts receive worker graphs.
pub const WORKER_ROLE: &str = "worker";
/// Connection attempts, 100 ms apart, before a session gives up.
pub const DEFAULT_CONNECT_ATTEMPTS: usize = 600;

pub struct ClusterContext {
    cluster: OnceCell<Cluster>,
    this_host: OnceCell<Host>,
    master: OnceCell<Host>,
    server: OnceCell<Server>,
    session: OnceCell<Session>,
    /// Drives sessions and barriers run from synchronous code.
    client_runtime: OnceCell<Runtime>,
    barrier_timeout: Option<Duration>,
    connect_attempts: usize,
    /// A handle for the Logging subsystem that flushes the logs when dropped.
    logger_guard: Option<WorkerGuard>,
}

impl ClusterContext {
    /// Creates a context with all slots unset. Does not initialize logging.
    pub fn new() -> Self {
        Self {
            cluster: OnceCell::new(),
            this_host: OnceCell::new(),
            master: OnceCell::new(),
            server: OnceCell::new(),
            session: OnceCell::new(),
            client_runtime: OnceCell::new(),
            barrier_timeout: None,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            logger_guard: None,
        }
    }

    /// Initializes logging and bootstraps this process as configured.
    pub fn from_configuration(config: &Configuration) -> Result<Self, ContextError> {
        let mut ctx = Self::new().with_barrier_timeout(config.barrier_timeout);
        ctx.logger_guard = crate::init_logger(config.logging_level);
        let (master_role, master_task) = match &config.master {
            Some((role, task_index)) => (Some(role.as_str()), Some(*task_index)),
            None => (None, None),
        };
        make_distribute_host(
            &ctx,
            config.cluster.as_str(),
            &config.role,
            config.task_index,
            Some(config.server.clone()),
            master_role,
            master_task,
        )?;
        Ok(ctx)
    }

    /// Bounds barrier runs that do not carry a timeout of their own.
    pub fn with_barrier_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.barrier_timeout = timeout;
        self
    }

    pub fn with_connect_attempts(mut self, attempts: usize) -> Self {
        self.connect_attempts = attempts;
        self
    }

    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout
    }

    /// Parses `config` and stores the resulting cluster.
    ///
    /// Fails if a cluster is set already, even an identical one.
    pub fn set_cluster(&self, config: impl Into<ClusterConfig>) -> Result<&Cluster, ContextError> {
        if let Some(cluster) = self.cluster.get() {
            return Err(ContextError::DoubleInitialization {
                slot: "cluster",
                detail: cluster.dumps(),
            });
        }
        let cluster = Cluster::new(config)?;
        tracing::debug!("Set the cluster to {} hosts.", cluster.hosts().len());
        self.cluster
            .set(cluster)
            .map_err(|_| ContextError::DoubleInitialization {
                slot: "cluster",
                detail: String::new(),
            })?;
        self.cluster.get().ok_or(ContextError::NotConstructed("cluster"))
    }

    pub fn cluster(&self) -> Option<&Cluster> {
        self.cluster.get()
    }

    /// All hosts of the cluster; empty if no cluster is set.
    pub fn hosts(&self) -> &[Host] {
        match self.cluster.get() {
            Some(cluster) => cluster.hosts(),
            None => &[],
        }
    }

    pub fn host(&self, role: &str, task_index: usize) -> Option<&Host> {
        self.cluster.get()?.host(role, task_index)
    }

    /// The topology as JSON; empty if no cluster is set.
    pub fn dumps(&self) -> String {
        self.cluster
            .get()
            .map(|cluster| cluster.dumps())
            .unwrap_or_default()
    }

    /// Sets the identity of this process.
    pub fn set_host(
        &self,
        role: &str,
        task_index: usize,
        address: Option<Address>,
    ) -> Result<&Host, ContextError> {
        let host = Host::new(role, task_index, address);
        self.this_host
            .set(host)
            .map_err(|host| ContextError::DoubleInitialization {
                slot: "this host",
                detail: format!(
                    "cannot become {}, already {}",
                    host,
                    self.this_host
                        .get()
                        .map(|h| h.to_string())
                        .unwrap_or_default()
                ),
            })?;
        let host = self
            .this_host
            .get()
            .ok_or(ContextError::NotConstructed("this host"))?;
        tracing::debug!("This process is {}.", host);
        Ok(host)
    }

    pub fn this_host(&self) -> Option<&Host> {
        self.this_host.get()
    }

    pub fn is_me(&self, host: &Host) -> bool {
        self.this_host.get().map_or(false, |me| me == host)
    }

    /// Whether this process is the master. False while either is unset.
    pub fn is_master(&self) -> bool {
        self.this_host
            .get()
            .map_or(false, |me| self.is_master_host(me))
    }

    /// Designates the master host, by default `master:0`.
    pub fn set_master(
        &self,
        role: Option<&str>,
        task_index: Option<usize>,
    ) -> Result<&Host, ContextError> {
        let role = role.unwrap_or(MASTER_ROLE);
        let task_index = task_index.unwrap_or(0);
        let host = self
            .host(role, task_index)
            .cloned()
            .unwrap_or_else(|| Host::any_address(role, task_index));
        self.master
            .set(host)
            .map_err(|_| ContextError::DoubleInitialization {
                slot: "master",
                detail: self
                    .master
                    .get()
                    .map(|h| h.to_string())
                    .unwrap_or_default(),
            })?;
        let master = self.master.get().ok_or(ContextError::NotConstructed("master"))?;
        tracing::debug!("The master is {}.", master);
        Ok(master)
    }

    pub fn master(&self) -> Option<&Host> {
        self.master.get()
    }

    pub fn is_master_host(&self, host: &Host) -> bool {
        self.master.get().map_or(false, |master| master == host)
    }

    /// Starts the endpoint of this host.
    ///
    /// Requires the cluster and this host to be set. Nothing is started when
    /// an error is returned.
    pub fn set_server(&self, config: ServerConfig) -> Result<&Server, ContextError> {
        if self.server.get().is_some() {
            return Err(ContextError::DoubleInitialization {
                slot: "server",
                detail: String::new(),
            });
        }
        if self.cluster.get().is_none() {
            return Err(ContextError::MissingPrecondition {
                slot: "server",
                missing: "cluster",
            });
        }
        let host = self
            .this_host
            .get()
            .ok_or(ContextError::MissingPrecondition {
                slot: "server",
                missing: "this host",
            })?;
        let address = self.address_of(host)?;
        let server = Server::start(host.clone(), &address, &config)?;
        self.server
            .set(server)
            .map_err(|_| ContextError::DoubleInitialization {
                slot: "server",
                detail: String::new(),
            })?;
        self.server.get().ok_or(ContextError::NotConstructed("server"))
    }

    pub fn server(&self) -> Option<&Server> {
        self.server.get()
    }

    /// Blocks the calling thread until the server of this host terminates.
    pub fn join(&self) -> Result<(), ContextError> {
        self.server
            .get()
            .ok_or(ContextError::NotConstructed("server"))?
            .join();
        Ok(())
    }

    /// The host whose coordinator all barriers of the cluster rendezvous at:
    /// the master if designated, otherwise the first host of the cluster.
    pub fn rendezvous_host(&self) -> Result<&Host, ContextError> {
        if let Some(master) = self.master.get() {
            return Ok(master);
        }
        self.hosts()
            .first()
            .ok_or(ContextError::NotConstructed("cluster"))
    }

    /// The session of this host to the rendezvous coordinator, connecting on first use.
    pub fn session(&self) -> Result<&Session, ContextError> {
        self.session.get_or_try_init(|| {
            let host = self
                .this_host
                .get()
                .ok_or(ContextError::NotConstructed("this host"))?;
            let remote = self.rendezvous_host()?;
            let address = self.address_of(remote)?;
            let session = self.block_on(Session::connect(
                host.clone(),
                remote.clone(),
                &address,
                self.connect_attempts,
            ))??;
            Ok(session)
        })
    }

    /// Asks the server of `host` to shut down, which makes its `join` return.
    pub fn shutdown_host(&self, host: &Host) -> Result<(), ContextError> {
        if self.is_me(host) {
            if let Some(server) = self.server.get() {
                server.shutdown()?;
            }
            return Ok(());
        }
        let me = self
            .this_host
            .get()
            .ok_or(ContextError::NotConstructed("this host"))?;
        let address = self.address_of(host)?;
        let attempts = self.connect_attempts;
        self.block_on(async move {
            let session = Session::connect(me.clone(), host.clone(), &address, attempts).await?;
            session.shutdown_server().await
        })??;
        Ok(())
    }

    /// Runs `future` to completion on the client runtime of this context.
    ///
    /// Must not be called from within an asynchronous context.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, ContextError> {
        Ok(self.client_runtime()?.block_on(future))
    }

    fn client_runtime(&self) -> Result<&Runtime, ContextError> {
        let runtime = self.client_runtime.get_or_try_init(|| {
            Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("rendezvous-client")
                .enable_all()
                .build()
        })?;
        Ok(runtime)
    }

    /// The address of `host`, falling back to the one the topology lists.
    fn address_of(&self, host: &Host) -> Result<Address, ContextError> {
        host.address()
            .or_else(|| {
                self.host(host.role(), host.task_index())
                    .and_then(|h| h.address())
            })
            .cloned()
            .ok_or_else(|| {
                ContextError::LookupFailure(format!("No address known for host {}", host))
            })
    }
}

impl Default for ClusterContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Bootstraps this process: sets the cluster, this host and its server, and
/// designates the master if a master role or task is given.
///
/// Returns this host.
pub fn make_distribute_host<'a>(
    ctx: &'a ClusterContext,
    cluster_config: impl Into<ClusterConfig>,
    role: &str,
    task_index: usize,
    server_config: Option<ServerConfig>,
    master_role: Option<&str>,
    master_task: Option<usize>,
) -> Result<&'a Host, ContextError> {
    ctx.set_cluster(cluster_config)?;
    let address = ctx.host(role, task_index).and_then(|h| h.address()).cloned();
    let host = ctx.set_host(role, task_index, address)?;
    ctx.set_server(server_config.unwrap_or_default())?;
    if master_role.is_some() || master_task.is_some() {
        ctx.set_master(master_role, master_task)?;
    }
    tracing::info!("Bootstrapped {} (master: {:?}).", host, ctx.master());
    Ok(host)
}
