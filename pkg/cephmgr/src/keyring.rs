//! Keyring files and the deterministic paths derived from cluster name and OSD id.

use anyhow::{Context as _, Result};
use pkg_constants::paths::{JOURNAL_FILENAME, KEYRING_FILENAME};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// `<config_root>/<cluster>/bootstrap-osd/<cluster>.keyring`
pub fn bootstrap_osd_keyring_path(config_root: &Path, cluster: &str) -> PathBuf {
    config_root
        .join(cluster)
        .join("bootstrap-osd")
        .join(format!("{}.keyring", cluster))
}

/// `<config_root>/<cluster>/<cluster>.config`
pub fn cluster_config_path(config_root: &Path, cluster: &str) -> PathBuf {
    config_root.join(cluster).join(format!("{}.config", cluster))
}

/// Mount point of an OSD's device: `<osd_root>/osd<id>`.
pub fn osd_mount_dir(osd_root: &Path, id: u32) -> PathBuf {
    osd_root.join(format!("osd{}", id))
}

/// Daemon data directory inside the mount: `<osd_root>/osd<id>/<cluster>-<id>`.
pub fn osd_data_dir(osd_root: &Path, cluster: &str, id: u32) -> PathBuf {
    osd_mount_dir(osd_root, id).join(format!("{}-{}", cluster, id))
}

/// `<data dir>/keyring`; its presence marks the OSD slot as initialized.
pub fn osd_keyring_path(osd_root: &Path, cluster: &str, id: u32) -> PathBuf {
    osd_data_dir(osd_root, cluster, id).join(KEYRING_FILENAME)
}

/// Every on-disk location belonging to one OSD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsdPaths {
    pub mount_dir: PathBuf,
    pub data_dir: PathBuf,
    pub keyring: PathBuf,
    pub journal: PathBuf,
}

impl OsdPaths {
    pub fn new(osd_root: &Path, cluster: &str, id: u32) -> Self {
        let data_dir = osd_data_dir(osd_root, cluster, id);
        Self {
            mount_dir: osd_mount_dir(osd_root, id),
            keyring: osd_keyring_path(osd_root, cluster, id),
            journal: data_dir.join(JOURNAL_FILENAME),
            data_dir,
        }
    }
}

/// Keyring file body for a single entity.
pub fn render_keyring(entity: &str, key: &str) -> String {
    format!("[{}]\n\tkey = {}\n", entity, key)
}

/// Extract the first `key = ...` value from a keyring body.
pub fn parse_keyring_key(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let (name, value) = line.split_once('=')?;
        if name.trim() != "key" {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// A keyring counts as present only if the file exists and is non-empty.
/// Errors other than not-found are returned, not read as absence.
pub async fn keyring_present(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file() && meta.len() > 0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("failed to stat keyring {}", path.display())),
    }
}

/// Write a keyring readable only by its owner, creating parent directories.
pub async fn write_keyring(path: &Path, entity: &str, key: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, render_keyring(entity, key))
        .await
        .with_context(|| format!("failed to write keyring {}", path.display()))?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .with_context(|| format!("failed to restrict keyring {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let root = Path::new("/tmp");
        assert_eq!(
            bootstrap_osd_keyring_path(root, "mycluster"),
            PathBuf::from("/tmp/mycluster/bootstrap-osd/mycluster.keyring")
        );
        assert_eq!(
            cluster_config_path(root, "mycluster"),
            PathBuf::from("/tmp/mycluster/mycluster.config")
        );

        let paths = OsdPaths::new(root, "mycluster", 3);
        assert_eq!(paths.mount_dir, PathBuf::from("/tmp/osd3"));
        assert_eq!(paths.data_dir, PathBuf::from("/tmp/osd3/mycluster-3"));
        assert_eq!(paths.keyring, PathBuf::from("/tmp/osd3/mycluster-3/keyring"));
        assert_eq!(paths.journal, PathBuf::from("/tmp/osd3/mycluster-3/journal"));
    }

    #[test]
    fn test_keyring_text() {
        let text = render_keyring("osd.3", "mysecurekey");
        assert_eq!(text, "[osd.3]\n\tkey = mysecurekey\n");
        assert_eq!(parse_keyring_key(&text).as_deref(), Some("mysecurekey"));
        assert_eq!(parse_keyring_key("[osd.3]\n\tcaps mon = \"allow *\"\n"), None);
        assert_eq!(parse_keyring_key("mykeyring"), None);
    }

    #[tokio::test]
    async fn test_write_keyring_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = bootstrap_osd_keyring_path(dir.path(), "mycluster");
        assert!(!keyring_present(&path).await.unwrap());

        write_keyring(&path, "client.bootstrap-osd", "abc").await.unwrap();
        assert!(keyring_present(&path).await.unwrap());

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(parse_keyring_key(&text).as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_empty_keyring_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.keyring");
        std::fs::write(&path, "").unwrap();
        assert!(!keyring_present(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_keyring_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        let err = keyring_present(&file.join("osd.keyring")).await.unwrap_err();
        assert!(err.to_string().contains("failed to stat keyring"));
    }
}
