//! OSD provisioning and daemon constants.

/// Default daemon binary. Invoked as `<binary> daemon --type=osd -- <flags>`.
pub const DEFAULT_DAEMON_BINARY: &str = "/usr/bin/castled";

/// Default filesystem for OSD devices.
pub const DEFAULT_FILESYSTEM: &str = "btrfs";

/// Default cluster name.
pub const DEFAULT_CLUSTER_NAME: &str = "castlecluster";

/// Entity used to bootstrap new OSDs.
pub const BOOTSTRAP_OSD_ENTITY: &str = "client.bootstrap-osd";

/// Monitor capability granted to the bootstrap-osd entity.
pub const BOOTSTRAP_OSD_MON_CAPS: &str = "allow profile bootstrap-osd";

/// Monitor command attempts before giving up.
pub const DEFAULT_MON_COMMAND_ATTEMPTS: u32 = 3;

/// Delay between monitor command attempts, in milliseconds.
pub const MON_RETRY_DELAY_MS: u64 = 500;

/// Seconds to wait after SIGTERM before a daemon is killed.
pub const STOP_GRACE_SECS: u64 = 5;

/// Default interval between reconciliation passes, in seconds.
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30;
