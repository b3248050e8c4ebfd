//! Mapping per-host subgraphs of a distributed run to their hosts.
//!
//! A [`DistributeTask`] is built once per process. It bootstraps the
//! [`ClusterContext`], keeps one [`GraphInfo`] placement record for the master
//! and each worker, and resolves which registered subgraph belongs to this
//! process.
use crate::{
    cluster::{ClusterConfig, Host},
    context::{make_distribute_host, ClusterContext, ContextError, MASTER_ROLE, WORKER_ROLE},
};

mod graph_info;

pub use graph_info::{GraphInfo, Placed};

pub struct DistributeTask<G> {
    cfg: ClusterConfig,
    master_graph: Option<G>,
    worker_graphs: Vec<G>,
    master_host: Option<Host>,
    hosts: Vec<Host>,
    master_graph_info: Option<GraphInfo>,
    worker_graph_infos: Vec<GraphInfo>,
}

impl<G: Placed> DistributeTask<G> {
    pub fn new(cfg: impl Into<ClusterConfig>) -> Self {
        Self {
            cfg: cfg.into(),
            master_graph: None,
            worker_graphs: Vec::new(),
            master_host: None,
            hosts: Vec::new(),
            master_graph_info: None,
            worker_graph_infos: Vec::new(),
        }
    }

    /// Bootstraps this process as `role:task_index`, with `master:0` as the
    /// master, and creates the placement records of the master and of every
    /// worker in the cluster.
    pub fn cluster_init(
        &mut self,
        ctx: &ClusterContext,
        role: &str,
        task_index: usize,
    ) -> Result<(), ContextError> {
        make_distribute_host(
            ctx,
            self.cfg.clone(),
            role,
            task_index,
            None,
            Some(MASTER_ROLE),
            Some(0),
        )?;
        let master_host = ctx
            .master()
            .cloned()
            .ok_or(ContextError::NotConstructed("master"))?;
        self.hosts = ctx
            .cluster()
            .ok_or(ContextError::NotConstructed("cluster"))?
            .hosts_with_role(WORKER_ROLE)
            .cloned()
            .collect();
        self.master_graph_info = Some(GraphInfo::on_host(master_host.clone()));
        self.worker_graph_infos = self.hosts.iter().cloned().map(GraphInfo::on_host).collect();
        self.master_host = Some(master_host);
        tracing::debug!(
            "Initialized the distribute task of {} with {} workers.",
            role,
            self.hosts.len()
        );
        Ok(())
    }

    pub fn nb_workers(&self) -> usize {
        self.hosts.len()
    }

    pub fn master_host(&self) -> Option<&Host> {
        self.master_host.as_ref()
    }

    /// The worker hosts, ordered by task index.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn add_master_graph(&mut self, g: G) {
        self.master_graph = Some(g);
    }

    pub fn add_worker_graph(&mut self, g: G) {
        self.worker_graphs.push(g);
    }

    /// Adds a worker host along with its placement record.
    pub fn add_host(&mut self, host: Host) {
        self.worker_graph_infos.push(GraphInfo::on_host(host.clone()));
        self.hosts.push(host);
    }

    pub fn master_graph(&self) -> Option<&G> {
        self.master_graph.as_ref()
    }

    /// The worker graph registered at the task index of `host`.
    pub fn worker_graph_on(&self, host: &Host) -> Option<&G> {
        self.worker_graphs.get(host.task_index())
    }

    /// The subgraph this process runs: the master graph on the master,
    /// otherwise the worker graph placed on this host.
    ///
    /// Fails if no such graph was registered, which means graphs were
    /// registered after they were looked up.
    pub fn graph_on_this_host(&self, ctx: &ClusterContext) -> Result<&G, ContextError> {
        let host = ctx
            .this_host()
            .ok_or(ContextError::NotConstructed("this host"))?;
        if ctx.is_master() {
            return self.master_graph.as_ref().ok_or_else(|| {
                ContextError::LookupFailure(format!("No master graph for {} found", host))
            });
        }
        self.worker_graphs
            .iter()
            .find(|g| g.graph_info().host() == Some(host))
            .ok_or_else(|| {
                ContextError::LookupFailure(format!(
                    "No local graph for {}.{} found",
                    host.role(),
                    host.task_index()
                ))
            })
    }

    pub fn ginfo_master(&self) -> Option<&GraphInfo> {
        self.master_graph_info.as_ref()
    }

    pub fn ginfo_worker(&self, task_index: usize) -> Option<&GraphInfo> {
        self.worker_graph_infos.get(task_index)
    }

    /// A placement record for this process.
    pub fn ginfo_this(&self, ctx: &ClusterContext) -> Option<GraphInfo> {
        ctx.this_host().cloned().map(GraphInfo::on_host)
    }
}
