use std::{fs, time::Duration};

use clap::{value_t, ErrorKind};
use tracing::Level;

use crate::node::ServerConfig;

/// The configuration parameters of one host of a cluster.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// The role of this host in the cluster topology.
    pub role: String,
    /// The task index of this host within its role.
    pub task_index: usize,
    /// The cluster topology as JSON, e.g.
    /// `{"master": ["10.0.0.1:2222"], "worker": ["10.0.0.2:3333"]}`.
    pub cluster: String,
    /// The role and task index of the master, if one is designated.
    pub master: Option<(String, usize)>,
    /// Settings of the endpoint this host serves.
    pub server: ServerConfig,
    /// Bounds barrier runs that do not carry a timeout of their own.
    /// `None` waits indefinitely.
    pub barrier_timeout: Option<Duration>,
    /// The logging level of the logger initialized by the
    /// [`ClusterContext`](crate::context::ClusterContext).
    /// If `None`, no logger is initialized.
    /// Defaults to [`Level::DEBUG`] when compiling in debug mode,
    /// [`Level::INFO`] when compiling in release mode.
    pub logging_level: Option<Level>,
}

impl Configuration {
    /// Creates the configuration of host `role:task_index` in the cluster
    /// described by the JSON topology `cluster`.
    pub fn new(role: &str, task_index: usize, cluster: &str) -> Self {
        let log_level = if cfg!(debug_assertions) {
            Some(Level::DEBUG)
        } else {
            Some(Level::INFO)
        };
        Self {
            role: role.to_string(),
            task_index,
            cluster: cluster.to_string(),
            master: None,
            server: ServerConfig::default(),
            barrier_timeout: None,
            logging_level: log_level,
        }
    }

    /// Creates a configuration from the command line arguments defined by
    /// [`new_app`](crate::new_app).
    ///
    /// A cluster argument starting with `@` names a file holding the topology.
    pub fn from_args(args: &clap::ArgMatches) -> Result<Self, clap::Error> {
        let role = args.value_of("role").unwrap_or("worker").to_string();
        let task_index = value_t!(args, "task", usize)?;
        let num_threads = value_t!(args, "threads", usize)?;

        let cluster_arg = args.value_of("cluster").unwrap_or("{}");
        let cluster = match cluster_arg.strip_prefix('@') {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                clap::Error::with_description(
                    &format!("Unable to read the cluster topology from {}: {}", path, e),
                    ErrorKind::Io,
                )
            })?,
            None => cluster_arg.to_string(),
        };

        let master = match args.value_of("master-role") {
            Some(master_role) => {
                let master_task = value_t!(args, "master-task", usize)?;
                Some((master_role.to_string(), master_task))
            }
            None => None,
        };
        let barrier_timeout = if args.is_present("barrier-timeout-ms") {
            Some(Duration::from_millis(value_t!(
                args,
                "barrier-timeout-ms",
                u64
            )?))
        } else {
            None
        };
        let log_level = match args.occurrences_of("verbose") {
            0 => None,
            1 => Some(Level::WARN),
            2 => Some(Level::INFO),
            3 => Some(Level::DEBUG),
            _ => Some(Level::TRACE),
        };

        Ok(Self {
            role,
            task_index,
            cluster,
            master,
            server: ServerConfig {
                num_threads,
                bind_address: args.value_of("bind").map(str::to_string),
            },
            barrier_timeout,
            logging_level: log_level,
        })
    }

    /// Designates `role:task_index` as the master.
    pub fn with_master(mut self, role: &str, task_index: usize) -> Self {
        self.master = Some((role.to_string(), task_index));
        self
    }

    pub fn with_server_config(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }

    pub fn with_barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = Some(timeout);
        self
    }

    /// Sets the logging level.
    pub fn with_logging_level(mut self, level: Level) -> Self {
        self.logging_level = Some(level);
        self
    }

    /// No logger is initialized if this method is called.
    pub fn disable_logger(mut self) -> Self {
        self.logging_level = None;
        self
    }
}
