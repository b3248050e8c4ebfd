use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::TopologyError;

/// The network address of a [`Host`], written as `ip:port` in a topology.
///
/// The `ip` part may also be a host name; it is resolved when a connection
/// is made.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    ip: String,
    port: u16,
}

impl Address {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Address {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TopologyError::InvalidAddress(s.to_string()))?;
        if ip.is_empty() {
            return Err(TopologyError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| TopologyError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(ip, port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Identity of one participating process: a role (e.g. `"master"`,
/// `"worker"`), a task index within that role, and an optional address.
///
/// Two hosts are equal iff their roles and task indices match and, when
/// *both* carry an address, the addresses match as well. A missing address
/// matches any address. Since this relation is not transitive, [`Host`]
/// implements neither `Eq` nor `Hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    role: String,
    task_index: usize,
    address: Option<Address>,
}

impl Host {
    pub fn new(role: impl Into<String>, task_index: usize, address: Option<Address>) -> Self {
        Self {
            role: role.into(),
            task_index,
            address,
        }
    }

    /// A host without an address, which matches the same role and task at any address.
    pub fn any_address(role: impl Into<String>, task_index: usize) -> Self {
        Self::new(role, task_index, None)
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Alias of [`Host::role`].
    pub fn job_name(&self) -> &str {
        &self.role
    }

    pub fn task_index(&self) -> usize {
        self.task_index
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    /// The canonical `role:task_index` string used to tag where operations are placed.
    pub fn device_prefix(&self) -> String {
        format!("{}:{}", self.role, self.task_index)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Host) -> bool {
        if self.role != other.role || self.task_index != other.task_index {
            return false;
        }
        match (&self.address, &other.address) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.device_prefix())
    }
}
