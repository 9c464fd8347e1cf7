//! OSD daemon bootstrap: identity, keyring, data-dir initialization, launch.

use anyhow::Result;
use pkg_proc::{ProcessHandle, ProcessSupervisor};
use pkg_types::cluster::ClusterInfo;
use pkg_types::disk::Device;
use pkg_types::osd::OsdIdentity;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::keyring::{OsdPaths, keyring_present, write_keyring};
use crate::mon::{self, MonClient};

/// Stable OSD uuid for a disk, so re-running `osd create` yields the same id.
pub fn osd_uuid(fsid: &str, serial: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{}/{}", fsid, serial).as_bytes())
}

pub struct DaemonBootstrapper<'a> {
    mon: &'a dyn MonClient,
    proc_man: &'a dyn ProcessSupervisor,
    cluster: &'a ClusterInfo,
    daemon_binary: &'a str,
    config_path: &'a Path,
    location: &'a str,
    mon_attempts: u32,
    mon_retry_delay: Duration,
}

impl<'a> DaemonBootstrapper<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mon: &'a dyn MonClient,
        proc_man: &'a dyn ProcessSupervisor,
        cluster: &'a ClusterInfo,
        daemon_binary: &'a str,
        config_path: &'a Path,
        location: &'a str,
        mon_attempts: u32,
        mon_retry_delay: Duration,
    ) -> Self {
        Self {
            mon,
            proc_man,
            cluster,
            daemon_binary,
            config_path,
            location,
            mon_attempts,
            mon_retry_delay,
        }
    }

    /// Ask the monitors for the OSD id and secret of `device`'s disk.
    pub async fn allocate_identity(&self, device: &Device) -> Result<OsdIdentity> {
        let uuid = osd_uuid(&self.cluster.fsid, &device.serial);
        let body = mon::mon_command_with_retry(
            self.mon,
            &mon::osd_create(&uuid),
            self.mon_attempts,
            self.mon_retry_delay,
        )
        .await?;
        let identity = mon::decode_osd_identity(&body).map_err(|e| {
            e.context(format!("osd create for {} returned an invalid identity", device.name))
        })?;
        info!("Device {} is osd.{} (uuid {})", device.name, identity.id, uuid);
        Ok(identity)
    }

    /// Initialize the data dir and start the daemon.
    ///
    /// Without a local keyring the slot is new: the allocated secret is
    /// written and the daemon runs `--mkfs --mkkey`. With one, only `--mkfs`.
    /// A failed first init removes the keyring it wrote.
    pub async fn bootstrap(&self, identity: &OsdIdentity, paths: &OsdPaths) -> Result<ProcessHandle> {
        if keyring_present(&paths.keyring).await? {
            info!("osd.{} keyring exists, initializing data dir", identity.id);
            self.launch(identity.id, paths, &["--mkfs"]).await?;
        } else {
            info!("osd.{} has no keyring, creating one", identity.id);
            write_keyring(&paths.keyring, &identity.entity(), &identity.key).await?;
            if let Err(e) = self.launch(identity.id, paths, &["--mkfs", "--mkkey"]).await {
                // Keep the next pass on the first-init path
                if let Err(rm) = tokio::fs::remove_file(&paths.keyring).await {
                    warn!("Failed to remove {}: {}", paths.keyring.display(), rm);
                }
                return Err(e);
            }
        }
        self.start(identity.id, paths).await
    }

    /// Start the long-running daemon for an already initialized OSD.
    pub async fn start(&self, id: u32, paths: &OsdPaths) -> Result<ProcessHandle> {
        let handle = self.launch(id, paths, &["--foreground"]).await?;
        info!("osd.{} started (handle {})", id, handle.id);
        Ok(handle)
    }

    async fn launch(&self, id: u32, paths: &OsdPaths, flags: &[&str]) -> Result<ProcessHandle> {
        let argv = self.daemon_args(id, paths, flags);
        self.proc_man
            .launch(&argv)
            .await
            .map_err(|e| e.context(format!("osd.{} {} failed", id, flags.join(" "))))
    }

    /// `<binary> daemon --type=osd -- <flags> <common flags>`
    pub fn daemon_args(&self, id: u32, paths: &OsdPaths, flags: &[&str]) -> Vec<String> {
        let mut argv = vec![
            self.daemon_binary.to_string(),
            "daemon".to_string(),
            "--type=osd".to_string(),
            "--".to_string(),
        ];
        argv.extend(flags.iter().map(|f| f.to_string()));
        argv.push(format!("--cluster={}", self.cluster.name));
        argv.push(format!("--id={}", id));
        argv.push(format!("--osd-data={}", display(&paths.data_dir)));
        argv.push(format!("--osd-journal={}", display(&paths.journal)));
        argv.push(format!("--conf={}", self.config_path.display()));
        argv.push(format!("--keyring={}", display(&paths.keyring)));
        if !self.location.is_empty() {
            argv.push(format!("--crush-location={}", self.location));
        }
        argv
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
