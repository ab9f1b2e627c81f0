//! Shared cache/notification bus
//!
//! One out-of-process store shared by every backend process, offering three
//! primitives: hash-table semantics per logical table, publish/subscribe by
//! channel name, and TTL-keyed markers whose expiry is broadcast to all
//! processes. The TTL markers are used exclusively by the notification
//! scheduler; the create-if-absent write is the only cross-process mutual
//! exclusion in the subsystem.

mod memory;

pub use memory::InMemoryBus;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast;

/// Contract for the shared cache/notification bus
#[async_trait]
pub trait SharedBus: Send + Sync {
    /// Read one value from a logical table
    async fn table_get(&self, table: &str, key: &str) -> Result<Option<String>>;

    /// Write one value into a logical table
    async fn table_set(&self, table: &str, key: &str, value: String) -> Result<()>;

    /// Delete one entry from a logical table; absent keys are a no-op
    async fn table_delete(&self, table: &str, key: &str) -> Result<()>;

    /// Read every entry of a logical table
    async fn table_get_all(&self, table: &str) -> Result<Vec<(String, String)>>;

    /// Fan a payload out to every process subscribed to `channel`
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;

    /// Subscribe to a channel; the receiver sees payloads published after
    /// this call
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>>;

    /// Create a TTL marker for `key` only if none exists.
    ///
    /// Returns `true` when the marker was created, `false` when an earlier
    /// marker already holds the key (the earlier one wins).
    async fn set_expiring_marker(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Proactively delete a marker; always safe to call
    async fn delete_marker(&self, key: &str) -> Result<()>;

    /// Whether a marker for `key` is currently pending
    async fn marker_exists(&self, key: &str) -> Result<bool>;

    /// Stream of expired marker keys, delivered to every process
    async fn expiry_notifications(&self) -> broadcast::Receiver<String>;
}
