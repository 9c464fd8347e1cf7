//! Per-node OSD agent.
//!
//! `initialize` prepares the node once, `configure_local_service` converges
//! desired devices into running OSD daemons, `destroy_local_service` stops
//! every daemon this agent launched.

use anyhow::Result;
use pkg_constants::osd::{
    BOOTSTRAP_OSD_ENTITY, BOOTSTRAP_OSD_MON_CAPS, DEFAULT_CLUSTER_NAME, DEFAULT_DAEMON_BINARY,
    DEFAULT_FILESYSTEM, DEFAULT_MON_COMMAND_ATTEMPTS, MON_RETRY_DELAY_MS,
};
use pkg_constants::paths::{DEFAULT_CONFIG_ROOT, DEFAULT_OSD_ROOT};
use pkg_constants::state::{CEPH_KEY, DESIRED_KEY, DEVICES_KEY, OSD_AGENT_NAME, READY_KEY};
use pkg_proc::ProcessHandle;
use pkg_state::join_key;
use pkg_types::cluster::ClusterInfo;
use pkg_types::disk::{Device, parse_device_list};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::applied::{get_applied_osd_id, get_applied_osds, record_applied, record_applied_osd_id};
use crate::bootstrap::DaemonBootstrapper;
use crate::cluster::{load_cluster_info, load_monitors, render_cluster_config, write_cluster_config};
use crate::context::Context;
use crate::inventory::resolve_devices;
use crate::keyring::{
    OsdPaths, bootstrap_osd_keyring_path, cluster_config_path, keyring_present, write_keyring,
};
use crate::mon::{auth_get_or_create_key, decode_admin_response, mon_command_with_retry};
use crate::provision::{Provisioner, default_owner};

/// `/castle/services/ceph/osd/desired/<node>`
pub fn desired_node_key(node_id: &str) -> String {
    join_key(&[CEPH_KEY, OSD_AGENT_NAME, DESIRED_KEY, node_id])
}

/// `/castle/services/ceph/osd/desired/<node>/devices`
pub fn desired_devices_key(node_id: &str) -> String {
    join_key(&[&desired_node_key(node_id), DEVICES_KEY])
}

#[derive(Debug, Clone)]
pub struct OsdAgentConfig {
    pub cluster_name: String,
    /// Fallback device list when the store has no desired devices for the node.
    pub devices: Vec<String>,
    pub force_format: bool,
    /// CRUSH location passed to every daemon; omitted when empty.
    pub location: String,
    pub filesystem: String,
    pub osd_root: PathBuf,
    pub config_root: PathBuf,
    pub daemon_binary: String,
    /// `user:group` for OSD mount dirs. Defaults to the agent's uid:gid.
    pub owner: Option<String>,
    pub mon_command_attempts: u32,
    pub mon_retry_delay: Duration,
    /// Keep going after a device fails; the first error is still returned.
    pub continue_on_error: bool,
}

impl OsdAgentConfig {
    pub fn new(cluster_name: &str, devices: &str, force_format: bool, location: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            devices: parse_device_list(devices),
            force_format,
            location: location.to_string(),
            ..Default::default()
        }
    }
}

impl Default for OsdAgentConfig {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            devices: Vec::new(),
            force_format: false,
            location: String::new(),
            filesystem: DEFAULT_FILESYSTEM.to_string(),
            osd_root: PathBuf::from(DEFAULT_OSD_ROOT),
            config_root: PathBuf::from(DEFAULT_CONFIG_ROOT),
            daemon_binary: DEFAULT_DAEMON_BINARY.to_string(),
            owner: None,
            mon_command_attempts: DEFAULT_MON_COMMAND_ATTEMPTS,
            mon_retry_delay: Duration::from_millis(MON_RETRY_DELAY_MS),
            continue_on_error: false,
        }
    }
}

pub struct OsdAgent {
    config: OsdAgentConfig,
    /// Running daemons keyed by OSD id.
    osd_procs: HashMap<u32, ProcessHandle>,
}

impl OsdAgent {
    pub fn new(config: OsdAgentConfig) -> Self {
        Self {
            config,
            osd_procs: HashMap::new(),
        }
    }

    pub fn config(&self) -> &OsdAgentConfig {
        &self.config
    }

    pub fn osd_procs(&self) -> &HashMap<u32, ProcessHandle> {
        &self.osd_procs
    }

    /// Fetch the bootstrap-osd keyring if this node doesn't have one yet,
    /// then mark the node ready.
    pub async fn initialize(&self, ctx: &Context) -> Result<()> {
        let keyring =
            bootstrap_osd_keyring_path(&self.config.config_root, &self.config.cluster_name);
        if keyring_present(&keyring).await? {
            info!("Bootstrap keyring {} already present", keyring.display());
        } else {
            info!("Requesting {} key from the monitors", BOOTSTRAP_OSD_ENTITY);
            let body = mon_command_with_retry(
                ctx.mon.as_ref(),
                &auth_get_or_create_key(BOOTSTRAP_OSD_ENTITY, &[("mon", BOOTSTRAP_OSD_MON_CAPS)]),
                self.config.mon_command_attempts,
                self.config.mon_retry_delay,
            )
            .await?;
            let resp = decode_admin_response(&body)?;
            let key = resp.require_key()?;
            write_keyring(&keyring, BOOTSTRAP_OSD_ENTITY, key).await?;
            info!("Wrote bootstrap keyring {}", keyring.display());
        }

        let node_key = desired_node_key(&ctx.node_id);
        ctx.store.create_dir(&node_key).await?;
        ctx.store
            .set_value(&join_key(&[&node_key, READY_KEY]), "1")
            .await?;
        info!("Node {} is ready for OSDs", ctx.node_id);
        Ok(())
    }

    /// Desired device names for this node, falling back to the configured list.
    pub async fn desired_devices(&self, ctx: &Context) -> Result<Vec<String>> {
        let desired = ctx
            .store
            .get_children(&desired_devices_key(&ctx.node_id))
            .await?;
        if desired.is_empty() {
            return Ok(self.config.devices.clone());
        }
        Ok(desired)
    }

    /// One reconciliation pass over the node's desired devices.
    ///
    /// `force_format` holds only until a pass succeeds.
    pub async fn configure_local_service(&mut self, ctx: &Context) -> Result<()> {
        let store = ctx.store.as_ref();
        let cluster = load_cluster_info(store, &self.config.cluster_name).await?;
        let monitors = load_monitors(store).await?;
        let config_path = cluster_config_path(&self.config.config_root, &cluster.name);
        write_cluster_config(&config_path, &render_cluster_config(&cluster, &monitors)).await?;

        let names = self.desired_devices(ctx).await?;
        if names.is_empty() {
            info!("No OSD devices desired on node {}", ctx.node_id);
            return Ok(());
        }
        let devices = resolve_devices(store, &ctx.node_id, &names).await?;
        let applied = get_applied_osds(store, &ctx.node_id).await?;

        let mut first_err = None;
        for device in &devices {
            let already_applied = applied.get(&device.name) == Some(&device.serial);
            let result = if already_applied && !self.config.force_format {
                self.resume_device(ctx, &cluster, &config_path, device).await
            } else {
                self.configure_device(ctx, &cluster, &config_path, device).await
            };

            if let Err(e) = result {
                let e = e.context(format!("failed to configure device {}", device.name));
                if !self.config.continue_on_error {
                    return Err(e);
                }
                error!("{:#}", e);
                first_err.get_or_insert(e);
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        if self.config.force_format {
            info!("Forced format pass complete, later passes keep applied devices");
            self.config.force_format = false;
        }
        Ok(())
    }

    /// Stop every daemon this agent launched. Applied records and mounts stay.
    pub async fn destroy_local_service(&mut self, ctx: &Context) -> Result<()> {
        let mut procs: Vec<(u32, ProcessHandle)> = self.osd_procs.drain().collect();
        procs.sort_by_key(|(id, _)| *id);

        let mut failed = Vec::new();
        for (id, handle) in procs {
            info!("Stopping osd.{} (started {})", id, handle.started_at.to_rfc3339());
            if let Err(e) = ctx.proc_man.stop(&handle).await {
                error!("Failed to stop osd.{}: {}", id, e);
                failed.push(format!("osd.{}", id));
            }
        }

        if !failed.is_empty() {
            anyhow::bail!("failed to stop {}", failed.join(", "));
        }
        Ok(())
    }

    async fn configure_device(
        &mut self,
        ctx: &Context,
        cluster: &ClusterInfo,
        config_path: &Path,
        device: &Device,
    ) -> Result<()> {
        info!("Configuring OSD on {} (serial {})", device.dev_path(), device.serial);
        let owner = self.config.owner.clone().unwrap_or_else(default_owner);
        let boot = bootstrapper(&self.config, ctx, cluster, config_path);

        let identity = boot.allocate_identity(device).await?;
        let paths = OsdPaths::new(&self.config.osd_root, &cluster.name, identity.id);

        Provisioner::new(
            ctx.executor.as_ref(),
            &self.config.filesystem,
            &owner,
            self.config.force_format,
        )
        .provision(device, &paths.mount_dir)
        .await?;

        let handle = boot.bootstrap(&identity, &paths).await?;
        self.track(ctx, identity.id, handle).await;

        let store = ctx.store.as_ref();
        record_applied(store, &ctx.node_id, &device.name, &device.serial).await?;
        record_applied_osd_id(store, &ctx.node_id, &device.name, identity.id).await?;
        info!("Device {} applied as osd.{}", device.name, identity.id);
        Ok(())
    }

    /// Applied device: restart its daemon if it isn't running, touch nothing else.
    async fn resume_device(
        &mut self,
        ctx: &Context,
        cluster: &ClusterInfo,
        config_path: &Path,
        device: &Device,
    ) -> Result<()> {
        let Some(id) = get_applied_osd_id(ctx.store.as_ref(), &ctx.node_id, &device.name).await?
        else {
            debug!("Device {} already applied", device.name);
            return Ok(());
        };
        if self.osd_procs.contains_key(&id) {
            debug!("Device {} already running as osd.{}", device.name, id);
            return Ok(());
        }

        let paths = OsdPaths::new(&self.config.osd_root, &cluster.name, id);
        if !keyring_present(&paths.keyring).await? {
            warn!(
                "Device {} is applied as osd.{} but {} is missing; force format re-provisions it",
                device.name,
                id,
                paths.keyring.display()
            );
            return Ok(());
        }

        info!("Restarting osd.{} on {}", id, device.name);
        let handle = bootstrapper(&self.config, ctx, cluster, config_path)
            .start(id, &paths)
            .await?;
        self.track(ctx, id, handle).await;
        Ok(())
    }

    /// Record a running daemon; an older handle for the same id is stopped.
    async fn track(&mut self, ctx: &Context, id: u32, handle: ProcessHandle) {
        if let Some(previous) = self.osd_procs.insert(id, handle) {
            debug!("Replacing running osd.{} (handle {})", id, previous.id);
            if let Err(e) = ctx.proc_man.stop(&previous).await {
                warn!("Failed to stop previous osd.{}: {}", id, e);
            }
        }
    }
}

fn bootstrapper<'a>(
    config: &'a OsdAgentConfig,
    ctx: &'a Context,
    cluster: &'a ClusterInfo,
    config_path: &'a Path,
) -> DaemonBootstrapper<'a> {
    DaemonBootstrapper::new(
        ctx.mon.as_ref(),
        ctx.proc_man.as_ref(),
        cluster,
        &config.daemon_binary,
        config_path,
        &config.location,
        config.mon_command_attempts,
        config.mon_retry_delay,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::save_cluster_info;
    use crate::inventory::disks_key;
    use crate::mon::MonClient;
    use async_trait::async_trait;
    use pkg_proc::{ExecCall, MockExecutor, ProcManager, TrapAction};
    use pkg_state::{KeyValueStore, MemoryStore};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct MockMon {
        response: &'static str,
        calls: AtomicUsize,
    }

    impl MockMon {
        fn new(response: &'static str) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MonClient for MockMon {
        async fn mon_command(&self, _command: &Value) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.as_bytes().to_vec())
        }
    }

    type Launches = Arc<Mutex<Vec<(TrapAction, Vec<String>)>>>;

    struct Harness {
        _dir: tempfile::TempDir,
        root: PathBuf,
        store: Arc<MemoryStore>,
        exec: Arc<MockExecutor>,
        mon: Arc<MockMon>,
        launches: Launches,
        ctx: Context,
    }

    impl Harness {
        async fn new(exec: MockExecutor, mon_response: &'static str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            let store = Arc::new(MemoryStore::new());
            let exec = Arc::new(exec);
            let mon = MockMon::new(mon_response);

            let launches: Launches = Arc::new(Mutex::new(Vec::new()));
            let recorded = launches.clone();
            let trap_root = root.clone();
            let proc_man = ProcManager::with_trap(move |action, argv| {
                assert_eq!(argv[1], "daemon");
                assert_eq!(argv[2], "--type=osd");
                assert_eq!(argv[3], "--");
                let mut recorded = recorded.lock().unwrap();
                if recorded.is_empty() {
                    // The daemon writes its own keyring on --mkkey
                    std::fs::write(trap_root.join("osd3/mycluster-3/keyring"), "mykeyring")
                        .unwrap();
                }
                recorded.push((action, argv.to_vec()));
                Ok(())
            });

            save_cluster_info(
                store.as_ref(),
                &ClusterInfo {
                    fsid: "id".to_string(),
                    monitor_secret: "monsecret".to_string(),
                    admin_secret: "adminsecret".to_string(),
                    name: "mycluster".to_string(),
                },
            )
            .await
            .unwrap();
            for name in ["sdx", "sdy"] {
                store
                    .set_value(&format!("{}/{}serial/name", disks_key("abc"), name), name)
                    .await
                    .unwrap();
            }

            let ctx = Context {
                store: store.clone(),
                executor: exec.clone(),
                proc_man: Arc::new(proc_man),
                mon: mon.clone(),
                node_id: "abc".to_string(),
            };
            Self {
                _dir: dir,
                root,
                store,
                exec,
                mon,
                launches,
                ctx,
            }
        }

        fn config(&self, force_format: bool) -> OsdAgentConfig {
            OsdAgentConfig {
                osd_root: self.root.clone(),
                config_root: self.root.clone(),
                owner: Some("1000:1000".to_string()),
                mon_retry_delay: Duration::ZERO,
                ..OsdAgentConfig::new("mycluster", "sdx,sdy", force_format, "root=here")
            }
        }

        fn launches(&self) -> Vec<(TrapAction, Vec<String>)> {
            self.launches.lock().unwrap().clone()
        }
    }

    fn probe_skip_verification() -> MockExecutor {
        MockExecutor::new().on_output(|_, call: &ExecCall| {
            assert_eq!(call.label, format!("lsblk {}", call.label_suffix()));
            assert_eq!(call.command, "lsblk");
            assert_eq!(call.args[0], format!("/dev/{}", call.label_suffix()));
            Ok("skip-UUID-verification".to_string())
        })
    }

    fn format_count(calls: &[ExecCall]) -> usize {
        calls.iter().filter(|c| c.label.starts_with("format")).count()
    }

    const OSD_RESPONSE: &str = r#"{"key":"mysecurekey","osdid":3.0}"#;

    #[tokio::test]
    async fn test_configure_and_destroy() {
        let h = Harness::new(probe_skip_verification(), OSD_RESPONSE).await;
        let mut agent = OsdAgent::new(h.config(false));

        agent.configure_local_service(&h.ctx).await.unwrap();

        let mount_dir = h.root.join("osd3").to_string_lossy().to_string();
        let calls = h.exec.calls().await;
        assert_eq!(calls.len(), 6);
        for (i, dev) in ["sdx", "sdy"].iter().enumerate() {
            let format = &calls[i * 3];
            assert_eq!(format.label, format!("format {}", dev));
            assert_eq!(format.command, "sudo");
            assert_eq!(format.args[0], "/usr/sbin/mkfs.btrfs");
            assert_eq!(format.args[6], format!("/dev/{}", dev));

            let mount = &calls[i * 3 + 1];
            assert_eq!(mount.label, format!("mount {}", dev));
            assert_eq!(mount.command, "sudo");
            assert_eq!(mount.args[0], "mount");
            assert_eq!(mount.args[2], "user_subvol_rm_allowed");
            assert_eq!(mount.args[4], mount_dir);

            let chown = &calls[i * 3 + 2];
            assert_eq!(chown.label, format!("chown {}", mount_dir));
            assert_eq!(chown.command, "sudo");
            assert_eq!(chown.args[0], "chown");
            assert_eq!(chown.args[3], mount_dir);
        }
        assert_eq!(h.exec.output_calls().await.len(), 2);

        // mkfs+mkkey, foreground, mkfs, foreground; the second foreground
        // replaces the first since both devices resolved to osd.3
        let launches = h.launches();
        let started: Vec<&(TrapAction, Vec<String>)> = launches
            .iter()
            .filter(|(action, _)| *action != TrapAction::Stop)
            .collect();
        assert_eq!(started.len(), 4);
        assert_eq!(started[0].1[4], "--mkfs");
        assert_eq!(started[0].1[5], "--mkkey");
        assert_eq!(started[1].1[4], "--foreground");
        assert_eq!(started[2].1[4], "--mkfs");
        assert_ne!(started[2].1[5], "--mkkey");
        assert_eq!(started[3].1[4], "--foreground");
        assert!(started[3].1.contains(&"--crush-location=root=here".to_string()));
        assert_eq!(launches.len(), 5);

        assert_eq!(agent.osd_procs().len(), 1);
        assert!(agent.osd_procs().contains_key(&3));
        assert_eq!(h.mon.calls(), 2);

        let conf = std::fs::read_to_string(h.root.join("mycluster/mycluster.config")).unwrap();
        assert!(conf.contains("fsid = id"));

        let applied = get_applied_osds(h.store.as_ref(), "abc").await.unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied["sdx"], "sdxserial");

        agent.destroy_local_service(&h.ctx).await.unwrap();
        assert!(agent.osd_procs().is_empty());
        assert_eq!(h.launches().last().unwrap().0, TrapAction::Stop);

        // History survives teardown
        let applied = get_applied_osds(h.store.as_ref(), "abc").await.unwrap();
        assert_eq!(applied.len(), 2);
    }

    #[tokio::test]
    async fn test_applied_devices_are_skipped() {
        let h = Harness::new(probe_skip_verification(), OSD_RESPONSE).await;
        record_applied(h.store.as_ref(), "abc", "sdx", "sdxserial").await.unwrap();
        record_applied(h.store.as_ref(), "abc", "sdy", "sdyserial").await.unwrap();

        let mut agent = OsdAgent::new(h.config(false));
        agent.configure_local_service(&h.ctx).await.unwrap();

        assert!(h.exec.calls().await.is_empty());
        assert!(h.exec.output_calls().await.is_empty());
        assert!(h.launches().is_empty());
        assert_eq!(h.mon.calls(), 0);
        assert!(agent.osd_procs().is_empty());
    }

    #[tokio::test]
    async fn test_swapped_disk_is_reprovisioned() {
        let h = Harness::new(probe_skip_verification(), OSD_RESPONSE).await;
        record_applied(h.store.as_ref(), "abc", "sdx", "oldserial").await.unwrap();
        record_applied(h.store.as_ref(), "abc", "sdy", "sdyserial").await.unwrap();

        let mut agent = OsdAgent::new(h.config(false));
        agent.configure_local_service(&h.ctx).await.unwrap();

        let calls = h.exec.calls().await;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].label, "format sdx");
        let applied = get_applied_osds(h.store.as_ref(), "abc").await.unwrap();
        assert_eq!(applied["sdx"], "sdxserial");
    }

    #[tokio::test]
    async fn test_force_format_reprovisions_applied_devices() {
        let h = Harness::new(probe_skip_verification(), OSD_RESPONSE).await;
        record_applied(h.store.as_ref(), "abc", "sdx", "sdxserial").await.unwrap();
        record_applied(h.store.as_ref(), "abc", "sdy", "sdyserial").await.unwrap();

        let mut agent = OsdAgent::new(h.config(true));
        agent.configure_local_service(&h.ctx).await.unwrap();

        assert_eq!(h.exec.calls().await.len(), 6);
        assert_eq!(agent.osd_procs().len(), 1);
    }

    #[tokio::test]
    async fn test_force_format_applies_to_one_pass() {
        let h = Harness::new(probe_skip_verification(), OSD_RESPONSE).await;
        record_applied(h.store.as_ref(), "abc", "sdx", "sdxserial").await.unwrap();
        record_applied(h.store.as_ref(), "abc", "sdy", "sdyserial").await.unwrap();

        let mut agent = OsdAgent::new(h.config(true));
        agent.configure_local_service(&h.ctx).await.unwrap();
        assert!(!agent.config().force_format);
        assert_eq!(format_count(&h.exec.calls().await), 2);

        agent.configure_local_service(&h.ctx).await.unwrap();
        agent.configure_local_service(&h.ctx).await.unwrap();
        assert_eq!(format_count(&h.exec.calls().await), 2);
    }

    #[tokio::test]
    async fn test_failed_force_pass_keeps_force_format() {
        let exec = probe_skip_verification().on_execute(|_, call| {
            if call.label == "mount sdx" {
                anyhow::bail!("mount failed");
            }
            Ok(())
        });
        let h = Harness::new(exec, OSD_RESPONSE).await;
        let mut agent = OsdAgent::new(h.config(true));
        assert!(agent.configure_local_service(&h.ctx).await.is_err());
        assert!(agent.config().force_format);
    }

    #[tokio::test]
    async fn test_failed_first_init_retries_mkkey() {
        let h = Harness::new(probe_skip_verification(), OSD_RESPONSE).await;
        let runs: Launches = Arc::new(Mutex::new(Vec::new()));
        let recorded = runs.clone();
        let proc_man = ProcManager::with_trap(move |action, argv| {
            let mut recorded = recorded.lock().unwrap();
            let first_run = action == TrapAction::Run && recorded.is_empty();
            recorded.push((action, argv.to_vec()));
            if first_run {
                anyhow::bail!("mkfs crashed");
            }
            Ok(())
        });
        let ctx = Context {
            proc_man: Arc::new(proc_man),
            ..h.ctx.clone()
        };
        let config = OsdAgentConfig {
            devices: vec!["sdx".to_string()],
            ..h.config(false)
        };
        let mut agent = OsdAgent::new(config);

        let err = agent.configure_local_service(&ctx).await.unwrap_err();
        assert!(format!("{:#}", err).contains("--mkfs --mkkey failed"));
        assert!(!h.root.join("osd3/mycluster-3/keyring").exists());
        assert!(get_applied_osds(h.store.as_ref(), "abc").await.unwrap().is_empty());

        agent.configure_local_service(&ctx).await.unwrap();
        let runs = runs.lock().unwrap();
        let inits: Vec<&[String]> = runs
            .iter()
            .filter(|(action, _)| *action == TrapAction::Run)
            .map(|(_, argv)| &argv[4..6])
            .collect();
        assert_eq!(inits.len(), 2);
        assert_eq!(inits[0], ["--mkfs", "--mkkey"]);
        assert_eq!(inits[1], ["--mkfs", "--mkkey"]);
        assert_eq!(runs.last().unwrap().1[4], "--foreground");
        assert!(agent.osd_procs().contains_key(&3));
        assert_eq!(
            std::fs::read_to_string(h.root.join("osd3/mycluster-3/keyring")).unwrap(),
            "[osd.3]\n\tkey = mysecurekey\n"
        );
    }

    #[tokio::test]
    async fn test_applied_osd_is_restarted_after_destroy() {
        let h = Harness::new(probe_skip_verification(), OSD_RESPONSE).await;
        let mut agent = OsdAgent::new(h.config(false));
        agent.configure_local_service(&h.ctx).await.unwrap();
        agent.destroy_local_service(&h.ctx).await.unwrap();
        let before = h.launches().len();

        agent.configure_local_service(&h.ctx).await.unwrap();

        // No further disk work, one foreground start for osd.3
        assert_eq!(h.exec.calls().await.len(), 6);
        let launches = h.launches();
        let new: Vec<_> = launches[before..]
            .iter()
            .filter(|(action, _)| *action == TrapAction::Start)
            .collect();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].1[4], "--foreground");
        assert!(agent.osd_procs().contains_key(&3));

        // A second pass with the daemon running is a no-op
        let count = h.launches().len();
        agent.configure_local_service(&h.ctx).await.unwrap();
        assert_eq!(h.launches().len(), count);
    }

    #[tokio::test]
    async fn test_desired_devices_from_store() {
        let h = Harness::new(probe_skip_verification(), OSD_RESPONSE).await;
        h.store
            .create_dir(&format!("{}/sdy", desired_devices_key("abc")))
            .await
            .unwrap();

        let agent = OsdAgent::new(h.config(false));
        assert_eq!(agent.desired_devices(&h.ctx).await.unwrap(), vec!["sdy"]);

        let mut agent = agent;
        agent.configure_local_service(&h.ctx).await.unwrap();
        let calls = h.exec.calls().await;
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| !c.label.contains("sdx")));
    }

    #[tokio::test]
    async fn test_unknown_device_fails() {
        let h = Harness::new(probe_skip_verification(), OSD_RESPONSE).await;
        let config = OsdAgentConfig {
            devices: vec!["sdz".to_string()],
            ..h.config(false)
        };
        let mut agent = OsdAgent::new(config);
        let err = agent.configure_local_service(&h.ctx).await.unwrap_err();
        assert!(err.to_string().contains("device sdz not found"));
        assert!(h.exec.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_cluster_info_fails() {
        let h = Harness::new(probe_skip_verification(), OSD_RESPONSE).await;
        let config = OsdAgentConfig {
            cluster_name: "other".to_string(),
            ..h.config(false)
        };
        let mut agent = OsdAgent::new(config);
        assert!(agent.configure_local_service(&h.ctx).await.is_err());
        assert_eq!(h.mon.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_identity_aborts() {
        let h = Harness::new(probe_skip_verification(), r#"{"key":"mysecurekey"}"#).await;
        let mut agent = OsdAgent::new(h.config(false));
        let err = agent.configure_local_service(&h.ctx).await.unwrap_err();
        assert!(err.to_string().contains("failed to configure device sdx"));
        assert!(h.exec.calls().await.is_empty());
        assert!(get_applied_osds(h.store.as_ref(), "abc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_error_aborts_pass() {
        let exec = probe_skip_verification().on_execute(|_, call| {
            if call.label == "mount sdx" {
                anyhow::bail!("mount failed");
            }
            Ok(())
        });
        let h = Harness::new(exec, OSD_RESPONSE).await;
        let mut agent = OsdAgent::new(h.config(false));

        let err = agent.configure_local_service(&h.ctx).await.unwrap_err();
        assert!(err.to_string().contains("device sdx"));
        assert_eq!(h.exec.calls().await.len(), 2);
        assert!(h.launches().is_empty());
        assert!(get_applied_osds(h.store.as_ref(), "abc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_continue_on_error() {
        let exec = probe_skip_verification().on_execute(|_, call| {
            if call.label == "mount sdx" {
                anyhow::bail!("mount failed");
            }
            Ok(())
        });
        let h = Harness::new(exec, OSD_RESPONSE).await;
        let config = OsdAgentConfig {
            continue_on_error: true,
            ..h.config(false)
        };
        let mut agent = OsdAgent::new(config);

        let err = agent.configure_local_service(&h.ctx).await.unwrap_err();
        assert!(err.to_string().contains("device sdx"));
        // sdx: format, mount; sdy: format, mount, chown
        assert_eq!(h.exec.calls().await.len(), 5);
        let applied = get_applied_osds(h.store.as_ref(), "abc").await.unwrap();
        assert_eq!(applied.len(), 1);
        assert!(applied.contains_key("sdy"));
        assert_eq!(agent.osd_procs().len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_writes_bootstrap_keyring() {
        let h = Harness::new(MockExecutor::new(), r#"{"key":"bootstrapkey"}"#).await;
        let agent = OsdAgent::new(h.config(false));

        agent.initialize(&h.ctx).await.unwrap();

        let path = bootstrap_osd_keyring_path(&h.root, "mycluster");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "[client.bootstrap-osd]\n\tkey = bootstrapkey\n");
        assert_eq!(
            h.store
                .get_value("/castle/services/ceph/osd/desired/abc/ready")
                .await
                .unwrap()
                .as_deref(),
            Some("1")
        );
        assert_eq!(h.mon.calls(), 1);

        // Keyring present: the monitor is not asked again
        agent.initialize(&h.ctx).await.unwrap();
        assert_eq!(h.mon.calls(), 1);
    }

    #[tokio::test]
    async fn test_initialize_requires_key() {
        let h = Harness::new(MockExecutor::new(), r#"{"osdid":1}"#).await;
        let agent = OsdAgent::new(h.config(false));
        assert!(agent.initialize(&h.ctx).await.is_err());
        assert!(!bootstrap_osd_keyring_path(&h.root, "mycluster").exists());
        assert_eq!(
            h.store
                .get_value("/castle/services/ceph/osd/desired/abc/ready")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_destroy_reports_failures() {
        let h = Harness::new(MockExecutor::new(), OSD_RESPONSE).await;
        let proc_man = ProcManager::with_trap(|action, _| match action {
            TrapAction::Stop => Err(anyhow::anyhow!("no such process")),
            _ => Ok(()),
        });
        let ctx = Context {
            proc_man: Arc::new(proc_man),
            ..h.ctx.clone()
        };
        let mut agent = OsdAgent::new(h.config(false));
        for id in [2, 1] {
            let handle = ctx.proc_man.launch(&["x".to_string(), "--foreground".to_string()]).await.unwrap();
            agent.track(&ctx, id, handle).await;
        }

        let err = agent.destroy_local_service(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to stop osd.1, osd.2");
        assert!(agent.osd_procs().is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let config = OsdAgentConfig::new("mycluster", "sdx, /dev/sdy", false, "");
        assert_eq!(config.devices, vec!["sdx", "sdy"]);
        assert_eq!(config.filesystem, "btrfs");
        assert_eq!(config.mon_command_attempts, 3);
        assert!(!config.continue_on_error);
    }
}
