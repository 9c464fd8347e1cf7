use async_trait::async_trait;
use pkg_constants::state::WATCH_EVENT_CAPACITY;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::store::{KeyValueStore, child_names, dir_prefix, normalize_key};
use crate::watch::{EventLog, EventType};

/// In-memory store used by tests and local tooling.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
    events: EventLog,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            events: EventLog::new(WATCH_EVENT_CAPACITY),
        }
    }

    /// Number of stored entries, including directory markers.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn create_dir(&self, key: &str) -> anyhow::Result<()> {
        let marker = dir_prefix(key);
        self.entries
            .write()
            .await
            .entry(marker.clone())
            .or_default();
        self.events.emit(EventType::CreateDir, &marker, None).await;
        Ok(())
    }

    async fn set_value(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let key = normalize_key(key);
        self.entries
            .write()
            .await
            .insert(key.clone(), value.to_string());
        self.events.emit(EventType::Set, &key, Some(value)).await;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> anyhow::Result<Option<String>> {
        let key = normalize_key(key);
        Ok(self.entries.read().await.get(&key).cloned())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let key = normalize_key(key);
        let prefix = dir_prefix(&key);
        {
            let mut entries = self.entries.write().await;
            entries.retain(|k, _| *k != key && !k.starts_with(&prefix));
        }
        self.events.emit(EventType::Delete, &key, None).await;
        Ok(())
    }

    async fn get_children(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(child_names(key, entries.keys().map(String::as_str)))
    }

    fn events(&self) -> &EventLog {
        &self.events
    }
}
