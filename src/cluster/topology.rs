//! The serialized form of a cluster topology.
//!
//! A topology maps each role to either an indexed mapping
//! (`{"0": "10.0.0.2:3333"}`) or a sequence of addresses indexed by
//! position (`["10.0.0.2:3333", "10.0.0.3:3333"]`).
use std::collections::{btree_map::Entry, BTreeMap};

use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};

use super::{Address, Host, TopologyError};

/// The addresses of all the tasks of one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobSpec {
    Indexed(BTreeMap<String, String>),
    Sequence(Vec<String>),
}

impl JobSpec {
    /// Resolves the task indices and addresses of the role, ordered by task index.
    fn tasks(&self, role: &str) -> Result<BTreeMap<usize, Address>, TopologyError> {
        let mut tasks: BTreeMap<usize, Address> = BTreeMap::new();
        match self {
            JobSpec::Indexed(entries) => {
                for (key, address) in entries {
                    let task_index: usize =
                        key.trim()
                            .parse()
                            .map_err(|_| TopologyError::InvalidTaskIndex {
                                role: role.to_string(),
                                key: key.clone(),
                            })?;
                    match tasks.entry(task_index) {
                        Entry::Vacant(entry) => {
                            entry.insert(address.parse()?);
                        }
                        Entry::Occupied(_) => {
                            return Err(TopologyError::DuplicateTask {
                                role: role.to_string(),
                                task_index,
                            })
                        }
                    }
                }
            }
            JobSpec::Sequence(addresses) => {
                for (task_index, address) in addresses.iter().enumerate() {
                    tasks.insert(task_index, address.parse()?);
                }
            }
        }
        Ok(tasks)
    }
}

/// A cluster topology: a mapping from role name to the addresses of its tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterSpec {
    jobs: BTreeMap<String, JobSpec>,
}

impl ClusterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a role whose tasks are indexed by their position in `addresses`.
    pub fn with_job<S: Into<String>>(mut self, role: &str, addresses: Vec<S>) -> Self {
        self.jobs.insert(
            role.to_string(),
            JobSpec::Sequence(addresses.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Adds a role whose tasks are given as explicit `(task_index, address)` pairs.
    pub fn with_indexed_job<S: Into<String>>(
        mut self,
        role: &str,
        tasks: Vec<(usize, S)>,
    ) -> Self {
        self.jobs.insert(
            role.to_string(),
            JobSpec::Indexed(
                tasks
                    .into_iter()
                    .map(|(i, address)| (i.to_string(), address.into()))
                    .collect(),
            ),
        );
        self
    }

    pub fn from_json(json: &str) -> Result<Self, TopologyError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the topology as JSON with sorted keys and 4-space indentation.
    pub fn dumps(&self) -> String {
        let mut buffer = Vec::new();
        let mut serializer =
            Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
        match self.serialize(&mut serializer) {
            Ok(()) => String::from_utf8_lossy(&buffer).into_owned(),
            Err(e) => {
                tracing::warn!("Unable to serialize the cluster topology: {}", e);
                String::new()
            }
        }
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Builds one [`Host`] per task, ordered by role name and then by task index.
    pub fn hosts(&self) -> Result<Vec<Host>, TopologyError> {
        let mut hosts = Vec::new();
        for (role, job) in &self.jobs {
            for (task_index, address) in job.tasks(role)? {
                hosts.push(Host::new(role.clone(), task_index, Some(address)));
            }
        }
        Ok(hosts)
    }
}

/// A topology that is either already structured or still serialized as JSON.
#[derive(Debug, Clone)]
pub enum ClusterConfig {
    Spec(ClusterSpec),
    Json(String),
}

impl From<ClusterSpec> for ClusterConfig {
    fn from(spec: ClusterSpec) -> Self {
        ClusterConfig::Spec(spec)
    }
}

impl From<String> for ClusterConfig {
    fn from(json: String) -> Self {
        ClusterConfig::Json(json)
    }
}

impl From<&str> for ClusterConfig {
    fn from(json: &str) -> Self {
        ClusterConfig::Json(json.to_string())
    }
}

/// Returns the structured topology, deserializing it first if needed.
pub fn parse_config(config: impl Into<ClusterConfig>) -> Result<ClusterSpec, TopologyError> {
    match config.into() {
        ClusterConfig::Spec(spec) => Ok(spec),
        ClusterConfig::Json(json) => ClusterSpec::from_json(&json),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const TOPOLOGY: &str = r#"{
        "worker": {"1": "10.0.0.3:3333", "0": "10.0.0.2:3333"},
        "master": {"0": "10.0.0.1:2222"}
    }"#;

    #[test]
    fn test_indexed_topology_ordering() {
        let hosts = ClusterSpec::from_json(TOPOLOGY).unwrap().hosts().unwrap();
        let names: Vec<_> = hosts.iter().map(Host::device_prefix).collect();
        assert_eq!(names, vec!["master:0", "worker:0", "worker:1"]);
        assert_eq!(
            hosts[2].address(),
            Some(&Address::new("10.0.0.3", 3333)),
            "Addresses should follow their task index."
        );
    }

    /// Task indices are sorted numerically even though JSON keys sort as strings.
    #[test]
    fn test_numeric_task_order() {
        let tasks: Vec<_> = (0..12).map(|i| (i, format!("10.0.1.{}:80", i))).collect();
        let hosts = ClusterSpec::new()
            .with_indexed_job("worker", tasks)
            .hosts()
            .unwrap();
        let indices: Vec<_> = hosts.iter().map(Host::task_index).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequence_topology() {
        let spec = ClusterSpec::from_json(r#"{"ps": ["a:1", "b:2"]}"#).unwrap();
        assert_eq!(spec, ClusterSpec::new().with_job("ps", vec!["a:1", "b:2"]));
        let hosts = spec.hosts().unwrap();
        assert_eq!(hosts[1], Host::new("ps", 1, Some(Address::new("b", 2))));
    }

    #[test]
    fn test_malformed_topologies() {
        let bad_index = ClusterSpec::from_json(r#"{"worker": {"x": "a:1"}}"#).unwrap();
        assert!(matches!(
            bad_index.hosts(),
            Err(TopologyError::InvalidTaskIndex { .. })
        ));
        let duplicate = ClusterSpec::from_json(r#"{"worker": {"0": "a:1", "00": "a:2"}}"#)
            .unwrap();
        assert!(matches!(
            duplicate.hosts(),
            Err(TopologyError::DuplicateTask { task_index: 0, .. })
        ));
        let bad_address = ClusterSpec::new().with_job("worker", vec!["nowhere"]);
        assert!(matches!(
            bad_address.hosts(),
            Err(TopologyError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_config("[1, 2]"),
            Err(TopologyError::JsonError(_))
        ));
    }

    /// A dumped topology parses back into the same topology.
    #[test]
    fn test_dumps_is_reparseable() {
        let spec = ClusterSpec::from_json(TOPOLOGY).unwrap();
        let dumped = spec.dumps();
        assert!(dumped.starts_with("{\n    \"master\""), "Keys should be sorted: {}", dumped);
        assert_eq!(parse_config(dumped).unwrap(), spec);
        assert_eq!(parse_config(spec.clone()).unwrap(), spec);
    }
}
