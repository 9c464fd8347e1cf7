use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::store::{dir_prefix, normalize_key};

/// Type of mutation in the watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    CreateDir,
    Set,
    Delete,
}

/// A single watch event representing a state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// In-memory event log that tracks store mutations with monotonic sequence numbers.
/// Subscribers can watch a key prefix, e.g. a node's desired-state directory.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<EventLogInner>>,
    sender: broadcast::Sender<WatchEvent>,
}

struct EventLogInner {
    seq: u64,
    /// Ring buffer of recent events (capped)
    events: Vec<WatchEvent>,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        let (sender, _) = broadcast::channel(max_events.max(1));
        Self {
            inner: Arc::new(RwLock::new(EventLogInner {
                seq: 0,
                events: Vec::with_capacity(max_events),
                max_events,
            })),
            sender,
        }
    }

    /// Record a new event. Called by the stores after each mutation.
    pub async fn emit(&self, event_type: EventType, key: &str, value: Option<&str>) {
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let event = WatchEvent {
            seq: inner.seq,
            event_type,
            key: key.to_string(),
            value: value.map(String::from),
        };
        if inner.events.len() >= inner.max_events {
            inner.events.remove(0);
        }
        inner.events.push(event.clone());
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub async fn current_seq(&self) -> u64 {
        self.inner.read().await.seq
    }

    /// Events since the given sequence number that are still in the ring buffer.
    pub async fn events_since(&self, from_seq: u64) -> Vec<WatchEvent> {
        let inner = self.inner.read().await;
        inner
            .events
            .iter()
            .filter(|e| e.seq > from_seq)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }

    /// Stream of new events for `prefix` or any key below it.
    /// Events dropped because the subscriber lagged are skipped.
    pub fn watch_prefix(&self, prefix: &str) -> impl Stream<Item = WatchEvent> + Send + 'static {
        let key = normalize_key(prefix);
        let dir = dir_prefix(prefix);
        BroadcastStream::new(self.sender.subscribe()).filter_map(move |res| match res {
            Ok(event) if event.key == key || event.key.starts_with(&dir) => Some(event),
            _ => None,
        })
    }
}
