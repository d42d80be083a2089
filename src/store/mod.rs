//! Local durable key-value surface.
//!
//! Holds everything that must survive a restart before it reaches the remote
//! store: the outbox, the id translation table, the last known session and
//! cached snapshots. Values are JSON strings.

mod memory;
mod migrations;
mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::Database;

pub const QUEUE_KEY: &str = "outbox.queue";
pub const CORRUPT_QUEUE_KEY: &str = "outbox.queue.corrupt";
pub const ID_MAPPINGS_KEY: &str = "outbox.id_mappings";
pub const ACTIVE_SESSION_KEY: &str = "session.active";
pub const ACTIVE_FAST_KEY: &str = "fasting.active";
pub const CACHE_PREFIX: &str = "cache.";

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<String>>;

    async fn write(&self, key: &str, value: String) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}
