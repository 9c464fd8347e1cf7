//! Applied-device records: which disks this node has already turned into OSDs.
//!
//! Layout: `/castle/services/ceph/osd/applied/<node>/devices/<device>/{serial,osdid}`.
//! Teardown never removes these; they are what makes a pass idempotent.

use anyhow::Result;
use pkg_constants::state::{
    APPLIED_KEY, CEPH_KEY, DEVICES_KEY, OSD_AGENT_NAME, OSD_ID_KEY, SERIAL_KEY,
};
use pkg_state::{KeyValueStore, join_key};
use std::collections::HashMap;
use tracing::warn;

pub fn applied_devices_key(node_id: &str) -> String {
    join_key(&[CEPH_KEY, OSD_AGENT_NAME, APPLIED_KEY, node_id, DEVICES_KEY])
}

/// Record that `device` (with the given disk serial) is provisioned. Idempotent.
pub async fn record_applied(
    store: &dyn KeyValueStore,
    node_id: &str,
    device: &str,
    serial: &str,
) -> Result<()> {
    let key = join_key(&[&applied_devices_key(node_id), device, SERIAL_KEY]);
    store.set_value(&key, serial).await
}

/// Remember which OSD id runs on an applied device.
pub async fn record_applied_osd_id(
    store: &dyn KeyValueStore,
    node_id: &str,
    device: &str,
    id: u32,
) -> Result<()> {
    let key = join_key(&[&applied_devices_key(node_id), device, OSD_ID_KEY]);
    store.set_value(&key, &id.to_string()).await
}

/// OSD id recorded for an applied device, if any.
pub async fn get_applied_osd_id(
    store: &dyn KeyValueStore,
    node_id: &str,
    device: &str,
) -> Result<Option<u32>> {
    let key = join_key(&[&applied_devices_key(node_id), device, OSD_ID_KEY]);
    match store.get_value(&key).await? {
        Some(v) => match v.trim().parse() {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                warn!("Ignoring invalid osd id {:?} recorded for {}", v, device);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Applied devices of a node as `device name → disk serial`.
/// Empty (not an error) when nothing has been applied.
pub async fn get_applied_osds(
    store: &dyn KeyValueStore,
    node_id: &str,
) -> Result<HashMap<String, String>> {
    let root = applied_devices_key(node_id);
    let mut applied = HashMap::new();
    for device in store.get_children(&root).await? {
        match store.get_value(&join_key(&[&root, &device, SERIAL_KEY])).await? {
            Some(serial) => {
                applied.insert(device, serial);
            }
            None => warn!("Applied device {} on node {} has no serial", device, node_id),
        }
    }
    Ok(applied)
}
