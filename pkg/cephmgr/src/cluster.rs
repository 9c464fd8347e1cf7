//! Cluster records in the state store and the connection config derived from them.

use anyhow::{Context as _, Result};
use pkg_constants::state::{CEPH_KEY, CLUSTERS_KEY, DESIRED_KEY, MONITOR_KEY};
use pkg_state::{KeyValueStore, join_key};
use pkg_types::cluster::{ClusterInfo, MonitorEndpoint};
use std::path::Path;
use tracing::warn;

const FSID_KEY: &str = "fsid";
const NAME_KEY: &str = "name";
const MONITOR_SECRET_KEY: &str = "monitorsecret";
const ADMIN_SECRET_KEY: &str = "adminsecret";

pub fn cluster_key(name: &str) -> String {
    join_key(&[CLUSTERS_KEY, name])
}

/// Desired monitor placements, one directory per node.
pub fn monitors_desired_key() -> String {
    join_key(&[CEPH_KEY, MONITOR_KEY, DESIRED_KEY])
}

pub async fn save_cluster_info(store: &dyn KeyValueStore, info: &ClusterInfo) -> Result<()> {
    let key = cluster_key(&info.name);
    store.set_value(&join_key(&[&key, FSID_KEY]), &info.fsid).await?;
    store.set_value(&join_key(&[&key, NAME_KEY]), &info.name).await?;
    store
        .set_value(&join_key(&[&key, MONITOR_SECRET_KEY]), &info.monitor_secret)
        .await?;
    store
        .set_value(&join_key(&[&key, ADMIN_SECRET_KEY]), &info.admin_secret)
        .await?;
    Ok(())
}

pub async fn load_cluster_info(store: &dyn KeyValueStore, name: &str) -> Result<ClusterInfo> {
    let key = cluster_key(name);
    let field = |f: &'static str| {
        let key = join_key(&[&key, f]);
        async move {
            store
                .get_value(&key)
                .await?
                .ok_or_else(|| anyhow::anyhow!("cluster {} has no {} at {}", name, f, key))
        }
    };
    Ok(ClusterInfo {
        fsid: field(FSID_KEY).await?,
        monitor_secret: field(MONITOR_SECRET_KEY).await?,
        admin_secret: field(ADMIN_SECRET_KEY).await?,
        name: field(NAME_KEY).await?,
    })
}

/// Monitors from every node's desired placement, sorted by id.
/// Nodes with incomplete placement info are skipped.
pub async fn load_monitors(store: &dyn KeyValueStore) -> Result<Vec<MonitorEndpoint>> {
    let root = monitors_desired_key();
    let mut monitors = Vec::new();
    for node in store.get_children(&root).await? {
        let key = join_key(&[&root, &node]);
        let id = store.get_value(&join_key(&[&key, "id"])).await?;
        let address = store.get_value(&join_key(&[&key, "ipaddress"])).await?;
        let port = store.get_value(&join_key(&[&key, "port"])).await?;
        let (Some(id), Some(address), Some(port)) = (id, address, port) else {
            warn!("Skipping incomplete monitor placement on node {}", node);
            continue;
        };
        let port: u16 = port
            .trim()
            .parse()
            .with_context(|| format!("invalid monitor port {:?} on node {}", port, node))?;
        monitors.push(MonitorEndpoint { id, address, port });
    }
    monitors.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(monitors)
}

/// Connection config handed to the daemon with `--conf`.
pub fn render_cluster_config(cluster: &ClusterInfo, monitors: &[MonitorEndpoint]) -> String {
    let members: Vec<&str> = monitors.iter().map(|m| m.id.as_str()).collect();
    let hosts: Vec<String> = monitors.iter().map(MonitorEndpoint::host).collect();

    let mut out = String::new();
    out.push_str("[global]\n");
    out.push_str(&format!("fsid = {}\n", cluster.fsid));
    out.push_str(&format!("mon initial members = {}\n", members.join(" ")));
    out.push_str(&format!("mon host = {}\n", hosts.join(",")));
    out.push_str("auth cluster required = cephx\n");
    out.push_str("auth service required = cephx\n");
    out.push_str("auth client required = cephx\n");
    for mon in monitors {
        out.push_str(&format!("\n[mon.{}]\n", mon.id));
        out.push_str(&format!("mon addr = {}\n", mon.host()));
    }
    out
}

pub async fn write_cluster_config(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write cluster config {}", path.display()))
}
