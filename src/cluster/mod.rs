//! Process identity and cluster membership.
//!
//! A [`Cluster`] is parsed once from a [`ClusterSpec`] and derives the
//! immutable set of [`Host`]s taking part in a run.

// Private submodules
mod errors;
mod host;
mod topology;

// Public exports
pub use errors::TopologyError;
pub use host::{Address, Host};
pub use topology::{parse_config, ClusterConfig, ClusterSpec, JobSpec};

/// The parsed topology of a run together with the hosts derived from it.
#[derive(Debug, Clone)]
pub struct Cluster {
    spec: ClusterSpec,
    hosts: Vec<Host>,
}

impl Cluster {
    /// Parses `config` into the host set.
    pub fn new(config: impl Into<ClusterConfig>) -> Result<Self, TopologyError> {
        let spec = parse_config(config)?;
        let hosts = spec.hosts()?;
        Ok(Self { spec, hosts })
    }

    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    /// All hosts, ordered by role name and then by task index.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Looks up the host with the given role and task index.
    pub fn host(&self, role: &str, task_index: usize) -> Option<&Host> {
        let wanted = Host::any_address(role, task_index);
        self.hosts.iter().find(|host| **host == wanted)
    }

    /// The hosts of one role, ordered by task index.
    pub fn hosts_with_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a Host> + 'a {
        self.hosts.iter().filter(move |host| host.role() == role)
    }

    /// See [`ClusterSpec::dumps`].
    pub fn dumps(&self) -> String {
        self.spec.dumps()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_host_lookup() {
        let cluster = Cluster::new(
            r#"{"master": {"0": "10.0.0.1:2222"},
                "worker": {"0": "10.0.0.2:3333", "1": "10.0.0.3:3333"}}"#,
        )
        .unwrap();
        assert_eq!(cluster.hosts().len(), 3);
        let worker = cluster.host("worker", 1).unwrap();
        assert_eq!(worker.address(), Some(&Address::new("10.0.0.3", 3333)));
        assert!(std::ptr::eq(worker, &cluster.hosts()[2]));
        assert!(cluster.host("worker", 2).is_none());
        assert!(cluster.host("ps", 0).is_none());
        assert_eq!(cluster.hosts_with_role("worker").count(), 2);
    }
}
