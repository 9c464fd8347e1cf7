use serde::{Deserialize, Serialize};

/// Cluster identity and secrets, written once by the cluster leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub fsid: String,
    pub monitor_secret: String,
    pub admin_secret: String,
    pub name: String,
}

/// A monitor placement as published in the desired state of its node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorEndpoint {
    /// Monitor name (e.g. `mon1`)
    pub id: String,
    pub address: String,
    pub port: u16,
}

impl MonitorEndpoint {
    /// `address:port` form used in connection configs.
    pub fn host(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
