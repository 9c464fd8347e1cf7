use async_trait::async_trait;
use pkg_constants::state::WATCH_EVENT_CAPACITY;
use slatedb::config::DbReaderOptions;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::path::Path;
use slatedb::{Db, DbIterator, DbReader};
use std::sync::Arc;
use tracing::{debug, info};

use crate::store::{KeyValueStore, child_names, dir_prefix, normalize_key};
use crate::watch::{EventLog, EventType};

/// Persistent state store backed by SlateDB on a local filesystem.
/// In production this would use S3/R2/MinIO via the `object_store` crate,
/// so every node agent sees the same desired state.
#[derive(Clone)]
pub struct SlateStore {
    db: Db,
    events: EventLog,
}

impl SlateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        info!("Opening SlateDB state store at {}", path);

        // Ensure the data directory exists before opening the object store
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?;
        Ok(Self {
            db,
            events: EventLog::new(WATCH_EVENT_CAPACITY),
        })
    }

    async fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB put failed for {}: {}", key, e))?;
        Ok(())
    }

    /// All keys starting with `prefix`.
    async fn scan_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB scan_prefix failed: {}", e))?;
        collect_keys(iter).await
    }

    /// Open the store at `path` without taking the writer role.
    ///
    /// A second `SlateStore::new` on the same path fences the running
    /// agent's writer, so inspection tools must use this instead.
    pub async fn open_reader(path: &str) -> anyhow::Result<SlateReader> {
        info!("Opening SlateDB state store at {} (read-only)", path);
        if !std::path::Path::new(path).is_dir() {
            anyhow::bail!("State store {} does not exist", path);
        }
        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        let reader = DbReader::open(Path::from("/"), object_store, None, DbReaderOptions::default())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB reader: {}", e))?;
        Ok(SlateReader {
            reader,
            events: EventLog::new(WATCH_EVENT_CAPACITY),
        })
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> anyhow::Result<()> {
        info!("Closing SlateDB state store");
        self.db
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e))
    }
}

#[async_trait]
impl KeyValueStore for SlateStore {
    async fn create_dir(&self, key: &str) -> anyhow::Result<()> {
        let marker = dir_prefix(key);
        if self.get_value(&marker).await?.is_none() {
            self.put(&marker, b"").await?;
        }
        self.events.emit(EventType::CreateDir, &marker, None).await;
        Ok(())
    }

    async fn set_value(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let key = normalize_key(key);
        debug!("set {} = {}", key, value);
        self.put(&key, value.as_bytes()).await?;
        self.events.emit(EventType::Set, &key, Some(value)).await;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> anyhow::Result<Option<String>> {
        // Directory markers keep their trailing slash
        let key = if key.ends_with('/') {
            key.to_string()
        } else {
            normalize_key(key)
        };
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("SlateDB get failed for {}: {}", key, e)),
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let key = normalize_key(key);
        let mut doomed = self.scan_keys(&dir_prefix(&key)).await?;
        doomed.push(key.clone());
        for k in doomed {
            self.db
                .delete(k.as_bytes())
                .await
                .map_err(|e| anyhow::anyhow!("SlateDB delete failed for {}: {}", k, e))?;
        }
        self.events.emit(EventType::Delete, &key, None).await;
        Ok(())
    }

    async fn get_children(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let keys = self.scan_keys(&dir_prefix(key)).await?;
        Ok(child_names(key, keys.iter().map(String::as_str)))
    }

    fn events(&self) -> &EventLog {
        &self.events
    }
}

async fn collect_keys(mut iter: DbIterator) -> anyhow::Result<Vec<String>> {
    let mut keys = Vec::new();
    while let Some(kv) = iter
        .next()
        .await
        .map_err(|e| anyhow::anyhow!("SlateDB scan failed: {}", e))?
    {
        keys.push(String::from_utf8_lossy(&kv.key).to_string());
    }
    Ok(keys)
}

/// Read-only view of a [`SlateStore`] directory, safe to open while the
/// agent holds the writer.
pub struct SlateReader {
    reader: DbReader,
    events: EventLog,
}

impl SlateReader {
    pub async fn close(self) -> anyhow::Result<()> {
        self.reader
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB reader close failed: {}", e))
    }
}

#[async_trait]
impl KeyValueStore for SlateReader {
    async fn create_dir(&self, key: &str) -> anyhow::Result<()> {
        anyhow::bail!("cannot create {}: state store opened read-only", key)
    }

    async fn set_value(&self, key: &str, _value: &str) -> anyhow::Result<()> {
        anyhow::bail!("cannot set {}: state store opened read-only", key)
    }

    async fn get_value(&self, key: &str) -> anyhow::Result<Option<String>> {
        let key = if key.ends_with('/') {
            key.to_string()
        } else {
            normalize_key(key)
        };
        match self.reader.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("SlateDB get failed for {}: {}", key, e)),
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        anyhow::bail!("cannot delete {}: state store opened read-only", key)
    }

    async fn get_children(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let iter = self
            .reader
            .scan_prefix(dir_prefix(key).as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB scan_prefix failed: {}", e))?;
        let keys = collect_keys(iter).await?;
        Ok(child_names(key, keys.iter().map(String::as_str)))
    }

    fn events(&self) -> &EventLog {
        &self.events
    }
}
