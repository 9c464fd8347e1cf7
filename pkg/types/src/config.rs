use serde::{Deserialize, Serialize};

/// Agent configuration file (YAML).
///
/// Example `agent-config.yaml`:
/// ```yaml
/// node-id: node-1
/// cluster-name: mycluster
/// devices: sdb,sdc
/// force-format: false
/// location: root=default host=node-1
/// data-dir: /var/lib/castle/state
/// mon-endpoint: http://10.0.0.1:8003
/// token: my-secret-token
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfigFile {
    #[serde(default, alias = "node-id")]
    pub node_id: Option<String>,
    #[serde(default, alias = "cluster-name")]
    pub cluster_name: Option<String>,
    /// Comma-separated device names used when the store has no desired devices.
    #[serde(default)]
    pub devices: Option<String>,
    #[serde(default, alias = "force-format")]
    pub force_format: Option<bool>,
    /// CRUSH location of the OSDs on this node.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub filesystem: Option<String>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default, alias = "osd-root")]
    pub osd_root: Option<String>,
    #[serde(default, alias = "config-root")]
    pub config_root: Option<String>,
    #[serde(default, alias = "daemon-binary")]
    pub daemon_binary: Option<String>,
    #[serde(default, alias = "mon-endpoint")]
    pub mon_endpoint: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// `user:group` that owns OSD mount directories.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default, alias = "mon-command-attempts")]
    pub mon_command_attempts: Option<u32>,
    #[serde(default, alias = "continue-on-error")]
    pub continue_on_error: Option<bool>,
    #[serde(default, alias = "reconcile-interval-secs")]
    pub reconcile_interval_secs: Option<u64>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
