//! Rendezvous is the coordination layer of a distributed training run.
//!
//! Every participating process is a [`Host`](crate::cluster::Host) of a
//! [`Cluster`](crate::cluster::Cluster): a role and a task index, reachable
//! at the address the cluster topology lists for it. A process bootstraps its
//! [`ClusterContext`](crate::context::ClusterContext) once, starting the
//! [`Server`](crate::node::Server) of its host, and then synchronizes with
//! the other processes through named [barriers](crate::barrier).
//!
//! ## Example
//! Every process of the cluster runs the same program with its own role and
//! task index. The workers signal a barrier, the master waits on it.
//!
//! ```ignore
//! let args = rendezvous::new_app("Trainer").get_matches();
//! let config = Configuration::from_args(&args)?;
//! let ctx = ClusterContext::from_configuration(&config)?;
//!
//! let workers: Vec<Host> = ctx.hosts().iter().filter(|h| h.role() == "worker").cloned().collect();
//! let master = ctx.master().cloned().into_iter().collect();
//! Barrier::new("epoch_0", workers, master).run(&ctx)?;
//! ```
//!
//! ## Distributing graphs
//! A [`DistributeTask`](crate::distribute::DistributeTask) keeps one
//! placement record per host, so that graph-construction code knows which
//! host a subgraph belongs to, and resolves the subgraph of this process.
//!
//! ## Barriers
//! Each join host of a [`Barrier`](crate::barrier::Barrier) owns a bounded
//! token queue with one slot per signal host. The queues are hosted by the
//! coordinator of the rendezvous host: the master if designated, otherwise
//! the first host of the topology. Processes reach it through their
//! [`Session`](crate::node::Session).

use clap::{self, App, Arg};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;

// Private submodules
mod configuration;

// Public submodules
pub mod barrier;
pub mod cluster;
pub mod communication;
pub mod context;
pub mod distribute;
pub mod node;

// Public exports
pub use configuration::Configuration;

/// Initializes a logger writing to stdout if `logging_level` is set.
///
/// The returned guard flushes buffered logs when dropped. Only the first
/// logger of a process is installed.
pub(crate) fn init_logger(logging_level: Option<Level>) -> Option<WorkerGuard> {
    let logging_level = logging_level?;
    let display_thread_ids = logging_level >= Level::TRACE;
    let display_target = logging_level >= Level::TRACE;

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
    let subscriber = tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_thread_ids(display_thread_ids)
        .with_span_events(FmtSpan::FULL)
        .with_target(display_target)
        .with_max_level(logging_level);
    if subscriber.try_init().is_err() {
        tracing::debug!("A logger is already installed.");
    }
    Some(guard)
}

/// Defines the command line arguments of a host of a cluster.
///
/// See [`Configuration::from_args`].
pub fn new_app(name: &str) -> clap::App {
    App::new(name)
        .arg(
            Arg::with_name("cluster")
                .short("c")
                .long("cluster")
                .default_value("{}")
                .help("Cluster topology as JSON, or @path to a file holding it"),
        )
        .arg(
            Arg::with_name("role")
                .short("r")
                .long("role")
                .default_value("worker")
                .help("Role of this host in the cluster"),
        )
        .arg(
            Arg::with_name("task")
                .short("i")
                .long("task")
                .default_value("0")
                .help("Task index of this host within its role"),
        )
        .arg(
            Arg::with_name("master-role")
                .long("master-role")
                .takes_value(true)
                .help("Role of the master host; no master is designated if omitted"),
        )
        .arg(
            Arg::with_name("master-task")
                .long("master-task")
                .default_value("0")
                .help("Task index of the master host"),
        )
        .arg(
            Arg::with_name("threads")
                .short("t")
                .long("threads")
                .default_value("1")
                .help("Number of threads serving the endpoint of this host"),
        )
        .arg(
            Arg::with_name("bind")
                .long("bind")
                .takes_value(true)
                .help("Address to bind instead of the one listed in the topology"),
        )
        .arg(
            Arg::with_name("barrier")
                .short("b")
                .long("barrier")
                .takes_value(true)
                .help("Name of a barrier between the workers and the master to run"),
        )
        .arg(
            Arg::with_name("barrier-timeout-ms")
                .long("barrier-timeout-ms")
                .takes_value(true)
                .help("Fails barriers that do not complete within this many milliseconds"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .takes_value(false)
                .help("Sets the level of verbosity"),
        )
}
