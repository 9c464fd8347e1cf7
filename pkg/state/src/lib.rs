pub mod client;
pub mod memory;
pub mod store;
pub mod watch;

pub use client::{SlateReader, SlateStore};
pub use memory::MemoryStore;
pub use store::{BoxedStore, KeyValueStore, join_key};
pub use watch::{EventLog, EventType, WatchEvent};
