//! Disk inventory as published by node discovery.
//!
//! Layout: `/castle/nodes/config/<node>/disks/<serial>/<field>`.

use anyhow::{Context as _, Result};
use pkg_constants::state::{DISKS_KEY, NODES_CONFIG_KEY};
use pkg_state::{KeyValueStore, join_key};
use pkg_types::disk::{Device, DiskInfo, normalize_device_name};
use tracing::{debug, warn};

pub fn node_config_key(node_id: &str) -> String {
    join_key(&[NODES_CONFIG_KEY, node_id])
}

pub fn disks_key(node_id: &str) -> String {
    join_key(&[&node_config_key(node_id), DISKS_KEY])
}

/// Write a disk record. Discovery normally does this; tests and tooling reuse it.
pub async fn set_disk_info(store: &dyn KeyValueStore, node_id: &str, disk: &DiskInfo) -> Result<()> {
    let key = join_key(&[&disks_key(node_id), &disk.serial]);
    let fields = [
        ("name", disk.name.clone()),
        ("uuid", disk.uuid.clone()),
        ("size", disk.size.to_string()),
        ("rotational", disk.rotational.to_string()),
        ("readonly", disk.readonly.to_string()),
        ("filesystem", disk.filesystem.clone()),
        ("mountpoint", disk.mount_point.clone()),
        ("type", disk.disk_type.to_string()),
        ("parent", disk.parent.clone()),
        ("haschildren", disk.has_children.to_string()),
    ];
    for (field, value) in fields {
        store.set_value(&join_key(&[&key, field]), &value).await?;
    }
    Ok(())
}

/// Every disk known for the node. Records without a device name are skipped.
pub async fn load_disks(store: &dyn KeyValueStore, node_id: &str) -> Result<Vec<DiskInfo>> {
    let root = disks_key(node_id);
    let mut disks = Vec::new();
    for serial in store.get_children(&root).await? {
        let key = join_key(&[&root, &serial]);
        let get = |field: &'static str| {
            let key = join_key(&[&key, field]);
            async move { store.get_value(&key).await }
        };

        let Some(name) = get("name").await? else {
            warn!("Disk {} on node {} has no device name, skipping", serial, node_id);
            continue;
        };
        let mut disk = DiskInfo {
            serial: serial.clone(),
            name,
            ..Default::default()
        };
        disk.uuid = get("uuid").await?.unwrap_or_default();
        disk.filesystem = get("filesystem").await?.unwrap_or_default();
        disk.mount_point = get("mountpoint").await?.unwrap_or_default();
        disk.parent = get("parent").await?.unwrap_or_default();
        if let Some(size) = get("size").await? {
            disk.size = size
                .parse()
                .with_context(|| format!("invalid size {:?} for disk {}", size, serial))?;
        }
        if let Some(v) = get("rotational").await? {
            disk.rotational = parse_bool(&v, "rotational", &serial)?;
        }
        if let Some(v) = get("readonly").await? {
            disk.readonly = parse_bool(&v, "readonly", &serial)?;
        }
        if let Some(v) = get("haschildren").await? {
            disk.has_children = parse_bool(&v, "haschildren", &serial)?;
        }
        if let Some(v) = get("type").await? {
            disk.disk_type = v.parse()?;
        }
        disks.push(disk);
    }
    Ok(disks)
}

fn parse_bool(value: &str, field: &str, serial: &str) -> Result<bool> {
    match value.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => anyhow::bail!("invalid {} {:?} for disk {}", field, other, serial),
    }
}

/// Resolve configured device names to disks, preserving the given order.
pub async fn resolve_devices(
    store: &dyn KeyValueStore,
    node_id: &str,
    names: &[String],
) -> Result<Vec<Device>> {
    let disks = load_disks(store, node_id).await?;
    names
        .iter()
        .map(|configured| {
            let name = normalize_device_name(configured);
            let disk = disks.iter().find(|d| d.name == name).ok_or_else(|| {
                anyhow::anyhow!("device {} not found in inventory of node {}", name, node_id)
            })?;
            debug!("Resolved {} to disk {}", configured, disk.serial);
            Ok(Device {
                configured: configured.clone(),
                name: disk.name.clone(),
                serial: disk.serial.clone(),
            })
        })
        .collect()
}
