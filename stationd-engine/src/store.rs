//! Station store
//!
//! Cache-aside repository for the Station aggregate. Reads prefer the shared
//! bus's `stations` table; a miss (or an undecodable cache value) falls back
//! to durable storage and repopulates the mirror. Every durable write is
//! followed by a cache refresh. There is no locking around the
//! read-modify-write; mutations always start from a fresh durable read and
//! interleaved writers degrade to idempotent retries.

use crate::bus::SharedBus;
use crate::db::stations;
use crate::error::Result;
use sqlx::{Pool, Sqlite};
use stationd_common::models::Station;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Logical bus table holding the cache mirror
pub const STATIONS_TABLE: &str = "stations";

/// Cache-aside repository over the stations table
pub struct StationStore {
    pool: Pool<Sqlite>,
    bus: Arc<dyn SharedBus>,
}

impl StationStore {
    pub fn new(pool: Pool<Sqlite>, bus: Arc<dyn SharedBus>) -> Self {
        Self { pool, bus }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Read a station, cache first
    pub async fn get(&self, id: Uuid) -> Result<Option<Station>> {
        match self.bus.table_get(STATIONS_TABLE, &id.to_string()).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(station) => return Ok(Some(station)),
                Err(e) => {
                    warn!(station_id = %id, error = %e, "undecodable cache entry, falling back to durable");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(station_id = %id, error = %e, "cache read failed, falling back to durable");
            }
        }
        self.refresh_from_durable(id).await
    }

    /// Drop the cache entry, re-read durable storage, repopulate on hit
    pub async fn refresh_from_durable(&self, id: Uuid) -> Result<Option<Station>> {
        if let Err(e) = self.bus.table_delete(STATIONS_TABLE, &id.to_string()).await {
            warn!(station_id = %id, error = %e, "failed to drop stale cache entry");
        }

        let station = stations::find_one(&self.pool, id).await?;
        if let Some(station) = &station {
            self.mirror(station).await;
        }
        Ok(station)
    }

    /// Read-modify-write against durable storage, then refresh the cache.
    ///
    /// The mutator runs on a row read inside this call, never on a caller's
    /// snapshot. Returns `None` when the station does not exist.
    pub async fn update<F>(&self, id: Uuid, mutate: F) -> Result<Option<Station>>
    where
        F: FnOnce(&mut Station),
    {
        let Some(mut station) = stations::find_one(&self.pool, id).await? else {
            return Ok(None);
        };
        mutate(&mut station);
        stations::upsert(&self.pool, &station).await?;
        self.mirror(&station).await;
        Ok(Some(station))
    }

    /// Every station currently in the cache mirror (reconciliation sweep
    /// scan); undecodable entries are logged and skipped
    pub async fn cached_stations(&self) -> Result<Vec<Station>> {
        let entries = self.bus.table_get_all(STATIONS_TABLE).await?;
        let mut stations = Vec::with_capacity(entries.len());
        for (key, json) in entries {
            match serde_json::from_str(&json) {
                Ok(station) => stations.push(station),
                Err(e) => warn!(key = %key, error = %e, "skipping undecodable cached station"),
            }
        }
        Ok(stations)
    }

    async fn mirror(&self, station: &Station) {
        let json = match serde_json::to_string(station) {
            Ok(json) => json,
            Err(e) => {
                warn!(station_id = %station.id, error = %e, "cannot serialize station for cache");
                return;
            }
        };
        if let Err(e) = self
            .bus
            .table_set(STATIONS_TABLE, &station.id.to_string(), json)
            .await
        {
            warn!(station_id = %station.id, error = %e, "cache refresh failed");
        }
    }
}
