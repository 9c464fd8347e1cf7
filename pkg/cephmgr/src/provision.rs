//! Device provisioning: probe → format → mount → own.
//!
//! Every step runs through the [`Executor`] so it can be intercepted; the
//! first failing step aborts the device.

use anyhow::{Context as _, Result};
use pkg_constants::paths::MKFS_DIR;
use pkg_proc::Executor;
use pkg_types::disk::Device;
use std::path::Path;
use tracing::info;

/// Owner of OSD mount directories when none is configured: the agent's own uid:gid.
pub fn default_owner() -> String {
    format!("{}:{}", nix::unistd::getuid(), nix::unistd::getgid())
}

/// Options passed to `mkfs.<fs>` ahead of the device path.
pub fn mkfs_options(filesystem: &str) -> Vec<&'static str> {
    match filesystem {
        "btrfs" => vec!["-f", "-m", "single", "-n", "32768"],
        "xfs" => vec!["-f", "-i", "size=2048"],
        "ext4" => vec!["-F"],
        _ => vec![],
    }
}

/// Mount options; btrfs allows the unprivileged owner to remove subvolumes.
pub fn mount_options(filesystem: &str) -> &'static str {
    match filesystem {
        "btrfs" => "user_subvol_rm_allowed",
        "xfs" => "rw,noatime,inode64",
        _ => "defaults",
    }
}

pub struct Provisioner<'a> {
    executor: &'a dyn Executor,
    filesystem: &'a str,
    owner: &'a str,
    force_format: bool,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        executor: &'a dyn Executor,
        filesystem: &'a str,
        owner: &'a str,
        force_format: bool,
    ) -> Self {
        Self {
            executor,
            filesystem,
            owner,
            force_format,
        }
    }

    /// Make `device` carry the configured filesystem, mounted at `mount_dir`
    /// and owned by the daemon user.
    pub async fn provision(&self, device: &Device, mount_dir: &Path) -> Result<()> {
        self.format(device).await?;
        self.mount(device, mount_dir).await?;
        self.own(mount_dir).await
    }

    /// Filesystem signature currently on the device (empty if none).
    pub async fn probe(&self, device: &Device) -> Result<String> {
        let dev_path = device.dev_path();
        let out = self
            .executor
            .execute_with_output(
                &format!("lsblk {}", device.name),
                "lsblk",
                &[&dev_path, "--nodeps", "--noheadings", "--output", "FSTYPE"],
            )
            .await?;
        Ok(out.trim().to_string())
    }

    /// Format unless the device already carries the configured filesystem.
    /// Force-format always formats. Returns whether mkfs ran.
    pub async fn format(&self, device: &Device) -> Result<bool> {
        let signature = self.probe(device).await?;
        if !self.force_format && signature == self.filesystem {
            info!(
                "Device {} already has a {} filesystem, not formatting",
                device.name, self.filesystem
            );
            return Ok(false);
        }

        info!(
            "Formatting {} as {} (force={}, found {:?})",
            device.dev_path(),
            self.filesystem,
            self.force_format,
            signature
        );
        let mkfs = format!("{}/mkfs.{}", MKFS_DIR, self.filesystem);
        let dev_path = device.dev_path();
        let mut args = vec![mkfs.as_str()];
        args.extend(mkfs_options(self.filesystem));
        args.push(&dev_path);
        self.executor
            .execute(&format!("format {}", device.name), "sudo", &args)
            .await?;
        Ok(true)
    }

    pub async fn mount(&self, device: &Device, mount_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(mount_dir)
            .await
            .with_context(|| format!("failed to create mount dir {}", mount_dir.display()))?;
        let dev_path = device.dev_path();
        let target = mount_dir.to_string_lossy();
        info!("Mounting {} at {}", dev_path, target);
        self.executor
            .execute(
                &format!("mount {}", device.name),
                "sudo",
                &["mount", "-o", mount_options(self.filesystem), &dev_path, &target],
            )
            .await
    }

    pub async fn own(&self, path: &Path) -> Result<()> {
        let target = path.to_string_lossy();
        self.executor
            .execute(
                &format!("chown {}", target),
                "sudo",
                &["chown", "-R", self.owner, &target],
            )
            .await
    }
}
