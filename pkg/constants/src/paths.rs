//! Filesystem path constants.

// ─── Agent ────────────────────────────────────────────────────────────────

/// Default config file path for the agent.
pub const DEFAULT_AGENT_CONFIG: &str = "/etc/castle/agent-config.yaml";

/// Default data directory for the agent's local state store.
pub const DEFAULT_AGENT_DATA_DIR: &str = "/var/lib/castle/state";

// ─── OSD ──────────────────────────────────────────────────────────────────

/// Root under which per-OSD mount directories are created.
/// Full path = `DEFAULT_OSD_ROOT/osd<id>`.
pub const DEFAULT_OSD_ROOT: &str = "/tmp";

/// Root for cluster config files and bootstrap keyrings.
/// Full path = `DEFAULT_CONFIG_ROOT/<cluster>/...`.
pub const DEFAULT_CONFIG_ROOT: &str = "/tmp";

/// Directory holding the `mkfs.<fs>` utilities.
pub const MKFS_DIR: &str = "/usr/sbin";

/// File name of the per-OSD keyring inside the OSD data directory.
pub const KEYRING_FILENAME: &str = "keyring";

/// File name of the per-OSD journal inside the OSD data directory.
pub const JOURNAL_FILENAME: &str = "journal";
