use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cluster::Host;

/// Identifies where the nodes of a subgraph live.
///
/// Graph-construction code reads the [`host`](GraphInfo::host) or the
/// [`device_prefix`](GraphInfo::device_prefix) to decide where operations are
/// placed. A record without a host is not bound to one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphInfo {
    name: Option<String>,
    scope: Option<String>,
    host: Option<Host>,
}

impl GraphInfo {
    pub fn new(name: Option<&str>, scope: Option<&str>, host: Option<Host>) -> Self {
        Self {
            name: name.map(str::to_string),
            scope: scope.map(str::to_string),
            host,
        }
    }

    /// A nameless record placing a subgraph on `host`.
    pub fn on_host(host: Host) -> Self {
        Self::new(None, None, Some(host))
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn host(&self) -> Option<&Host> {
        self.host.as_ref()
    }

    /// `role:task_index` of the host, if the record is bound to one.
    pub fn device_prefix(&self) -> Option<String> {
        self.host.as_ref().map(Host::device_prefix)
    }

    /// Derives the record of a child, placed on the same host and in the
    /// same scope.
    pub fn update(&self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            scope: self.scope.clone(),
            host: self.host.clone(),
        }
    }

    /// Derives a record placed on the same host in another scope.
    pub fn with_scope(&self, scope: &str) -> Self {
        Self {
            name: self.name.clone(),
            scope: Some(scope.to_string()),
            host: self.host.clone(),
        }
    }
}

impl fmt::Display for GraphInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GraphInfo(name={}, scope={}, host={})",
            self.name.as_deref().unwrap_or("-"),
            self.scope.as_deref().unwrap_or("-"),
            self.device_prefix().unwrap_or_else(|| "-".to_string())
        )
    }
}

/// Something placed on a host through a [`GraphInfo`].
pub trait Placed {
    fn graph_info(&self) -> &GraphInfo;
}

impl Placed for GraphInfo {
    fn graph_info(&self) -> &GraphInfo {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_update_keeps_placement() {
        let info = GraphInfo::new(Some("model"), Some("train"), Some(Host::any_address("worker", 2)));
        let child = info.update("loss");
        assert_eq!(child.name(), Some("loss"));
        assert_eq!(child.scope(), Some("train"));
        assert_eq!(child.device_prefix(), Some("worker:2".to_string()));
        assert_eq!(GraphInfo::default().device_prefix(), None);
    }
}
