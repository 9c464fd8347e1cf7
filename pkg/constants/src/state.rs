//! State store key layout constants.
//!
//! Keys are etcd-style paths joined with `/`.

/// Root of all ceph service keys.
pub const CEPH_KEY: &str = "/castle/services/ceph";

/// Component name of the OSD agent.
pub const OSD_AGENT_NAME: &str = "osd";

/// Component name of the monitor service.
pub const MONITOR_KEY: &str = "monitor";

/// Sub-key holding desired (orchestrator-written) configuration.
pub const DESIRED_KEY: &str = "desired";

/// Sub-key holding applied (agent-written) state.
pub const APPLIED_KEY: &str = "applied";

/// Directory of devices under a node's desired or applied key.
pub const DEVICES_KEY: &str = "devices";

/// Readiness marker set once the agent has initialized.
pub const READY_KEY: &str = "ready";

/// Serial value under an applied device.
pub const SERIAL_KEY: &str = "serial";

/// OSD id value under an applied device.
pub const OSD_ID_KEY: &str = "osdid";

/// Directory of cluster records, keyed by cluster name.
pub const CLUSTERS_KEY: &str = "/castle/services/ceph/clusters";

/// Root of per-node configuration written by discovery.
pub const NODES_CONFIG_KEY: &str = "/castle/nodes/config";

/// Directory of disks under a node's configuration key.
pub const DISKS_KEY: &str = "disks";

/// Number of recent watch events retained for late subscribers.
pub const WATCH_EVENT_CAPACITY: usize = 1024;
