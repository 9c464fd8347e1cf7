use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::watch::EventLog;

/// Hierarchical key-value store with etcd-style directory semantics.
///
/// Keys are `/`-separated paths. A directory exists once it has been created
/// explicitly or once any key beneath it has been set.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Create an (empty) directory. Succeeds if it already exists.
    async fn create_dir(&self, key: &str) -> anyhow::Result<()>;

    /// Set a leaf value, creating parent directories implicitly.
    async fn set_value(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Get a leaf value, or `None` if the key does not exist.
    async fn get_value(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Delete a key and everything beneath it.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Names of the immediate children of a directory, sorted.
    /// A missing directory has no children.
    async fn get_children(&self, key: &str) -> anyhow::Result<Vec<String>>;

    /// Event log that records every mutation made through this store.
    fn events(&self) -> &EventLog;
}

/// Shared trait-object form of a store.
pub type BoxedStore = Arc<dyn KeyValueStore>;

/// Join path segments into a normalized key.
pub fn join_key(parts: &[&str]) -> String {
    normalize_key(&parts.join("/"))
}

/// Leading slash, no trailing slash, no empty segments.
pub(crate) fn normalize_key(key: &str) -> String {
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Marker key that records an explicitly created directory.
/// Also the scan prefix for everything beneath the directory.
pub(crate) fn dir_prefix(key: &str) -> String {
    let key = normalize_key(key);
    if key == "/" { key } else { format!("{}/", key) }
}

/// Extract the immediate child names of `dir` from a set of keys.
pub(crate) fn child_names<'a>(dir: &str, keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    let prefix = dir_prefix(dir);
    let names: BTreeSet<String> = keys
        .filter_map(|k| k.strip_prefix(prefix.as_str()))
        .filter_map(|rest| rest.split('/').next())
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect();
    names.into_iter().collect()
}
