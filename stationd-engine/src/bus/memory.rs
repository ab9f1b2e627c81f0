//! In-memory bus implementation
//!
//! Single-process rendering of the [`SharedBus`] contract, used by tests and
//! embedded deployments. Tables live in a guarded map, channels are tokio
//! broadcast senders, and TTL markers are sleep tasks that remove themselves
//! and push the key onto the expiry stream.

use super::SharedBus;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

struct BusInner {
    tables: RwLock<HashMap<String, HashMap<String, String>>>,
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,
    markers: RwLock<HashMap<String, JoinHandle<()>>>,
    expiry_tx: broadcast::Sender<String>,
}

/// In-memory [`SharedBus`]
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (expiry_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                tables: RwLock::new(HashMap::new()),
                channels: RwLock::new(HashMap::new()),
                markers: RwLock::new(HashMap::new()),
                expiry_tx,
            }),
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedBus for InMemoryBus {
    async fn table_get(&self, table: &str, key: &str) -> Result<Option<String>> {
        let tables = self.inner.tables.read().await;
        Ok(tables.get(table).and_then(|t| t.get(key).cloned()))
    }

    async fn table_set(&self, table: &str, key: &str, value: String) -> Result<()> {
        let mut tables = self.inner.tables.write().await;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn table_delete(&self, table: &str, key: &str) -> Result<()> {
        let mut tables = self.inner.tables.write().await;
        if let Some(t) = tables.get_mut(table) {
            t.remove(key);
        }
        Ok(())
    }

    async fn table_get_all(&self, table: &str) -> Result<Vec<(String, String)>> {
        let tables = self.inner.tables.read().await;
        Ok(tables
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let channels = self.inner.channels.read().await;
        if let Some(tx) = channels.get(channel) {
            // No receivers is fine
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>> {
        let mut channels = self.inner.channels.write().await;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(tx.subscribe())
    }

    async fn set_expiring_marker(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut markers = self.inner.markers.write().await;
        if markers.contains_key(key) {
            return Ok(false);
        }

        let inner = Arc::clone(&self.inner);
        let marker_key = key.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            inner.markers.write().await.remove(&marker_key);
            debug!(key = %marker_key, "marker expired");
            let _ = inner.expiry_tx.send(marker_key);
        });
        markers.insert(key.to_string(), handle);
        Ok(true)
    }

    async fn delete_marker(&self, key: &str) -> Result<()> {
        let mut markers = self.inner.markers.write().await;
        if let Some(handle) = markers.remove(key) {
            handle.abort();
        }
        Ok(())
    }

    async fn marker_exists(&self, key: &str) -> Result<bool> {
        Ok(self.inner.markers.read().await.contains_key(key))
    }

    async fn expiry_notifications(&self) -> broadcast::Receiver<String> {
        self.inner.expiry_tx.subscribe()
    }
}
