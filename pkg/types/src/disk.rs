use serde::{Deserialize, Serialize};

/// Kind of block device reported by discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    #[default]
    Disk,
    Part,
}

impl std::fmt::Display for DiskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskType::Disk => write!(f, "disk"),
            DiskType::Part => write!(f, "part"),
        }
    }
}

impl std::str::FromStr for DiskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disk" => Ok(DiskType::Disk),
            "part" => Ok(DiskType::Part),
            other => Err(anyhow::anyhow!("unknown disk type: {}", other)),
        }
    }
}

/// Inventory record for a single disk, keyed by its stable serial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub serial: String,
    /// Current kernel device name (e.g. `sda`). May change across reboots.
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub rotational: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub filesystem: String,
    #[serde(default)]
    pub mount_point: String,
    #[serde(default)]
    pub disk_type: DiskType,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub has_children: bool,
}

/// A desired device resolved against the inventory for one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Name as written in the desired state.
    pub configured: String,
    /// Kernel device name resolved from the inventory.
    pub name: String,
    pub serial: String,
}

impl Device {
    /// Block device path (`/dev/<name>`).
    pub fn dev_path(&self) -> String {
        format!("/dev/{}", self.name)
    }
}

/// Strip whitespace and a leading `/dev/` from a configured device name.
pub fn normalize_device_name(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix("/dev/").unwrap_or(name)
}

/// Split a comma-separated device list, dropping empty and repeated entries.
/// Order of first appearance is kept.
pub fn parse_device_list(devices: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in devices.split(',').map(normalize_device_name) {
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}
