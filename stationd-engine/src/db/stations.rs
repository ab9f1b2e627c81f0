//! Station row access
//!
//! Read/write access to the stations table. Nested collections
//! (queue, current song, autofill, blacklist, requests, DJs) are JSON TEXT
//! columns; timestamps are epoch milliseconds.

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use stationd_common::models::{Privacy, Station};
use std::str::FromStr;
use uuid::Uuid;

fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Internal(format!("timestamp out of range: {}", ms)))
}

fn row_to_station(row: &SqliteRow) -> Result<Station> {
    let guid: String = row.try_get("guid")?;
    let id = Uuid::parse_str(&guid)
        .map_err(|e| Error::Internal(format!("invalid station guid {}: {}", guid, e)))?;

    let owner: String = row.try_get("owner")?;
    let owner = Uuid::parse_str(&owner)
        .map_err(|e| Error::Internal(format!("invalid owner guid: {}", e)))?;

    let backing: String = row.try_get("backing_playlist_guid")?;
    let backing_playlist_id = Uuid::parse_str(&backing)
        .map_err(|e| Error::Internal(format!("invalid backing playlist guid: {}", e)))?;

    let privacy: String = row.try_get("privacy")?;
    let privacy = Privacy::from_str(&privacy)
        .map_err(|e| Error::Internal(format!("invalid privacy column: {}", e)))?;

    let paused_at: Option<i64> = row.try_get("paused_at")?;
    let paused_at = paused_at.map(ms_to_datetime).transpose()?;

    let current_song: Option<String> = row.try_get("current_song")?;
    let current_song = current_song
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    let queue: String = row.try_get("queue")?;
    let autofill: String = row.try_get("autofill")?;
    let blacklist: String = row.try_get("blacklist")?;
    let requests: String = row.try_get("requests")?;
    let djs: String = row.try_get("djs")?;

    let current_song_index: i64 = row.try_get("current_song_index")?;
    let skip_vote_threshold: i64 = row.try_get("skip_vote_threshold")?;

    Ok(Station {
        id,
        display_name: row.try_get("display_name")?,
        privacy,
        paused: row.try_get("paused")?,
        paused_at,
        time_paused_ms: row.try_get("time_paused_ms")?,
        current_song,
        started_at: ms_to_datetime(row.try_get("started_at")?)?,
        queue: serde_json::from_str(&queue)?,
        current_song_index: current_song_index.max(0) as usize,
        autofill: serde_json::from_str(&autofill)?,
        blacklist: serde_json::from_str(&blacklist)?,
        requests: serde_json::from_str(&requests)?,
        skip_vote_threshold: skip_vote_threshold.clamp(0, 100) as u8,
        djs: serde_json::from_str(&djs)?,
        owner,
        backing_playlist_id,
    })
}

/// Fetch one station by id
pub async fn find_one(pool: &Pool<Sqlite>, id: Uuid) -> Result<Option<Station>> {
    let row = sqlx::query("SELECT * FROM stations WHERE guid = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_station).transpose()
}

/// Fetch every station (startup initialization)
pub async fn find_all(pool: &Pool<Sqlite>) -> Result<Vec<Station>> {
    let rows = sqlx::query("SELECT * FROM stations")
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_station).collect()
}

/// Insert or fully replace a station row
pub async fn upsert(pool: &Pool<Sqlite>, station: &Station) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO stations (
            guid, display_name, privacy, paused, paused_at, time_paused_ms,
            current_song, started_at, queue, current_song_index,
            autofill, blacklist, requests, skip_vote_threshold,
            djs, owner, backing_playlist_guid
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(station.id.to_string())
    .bind(&station.display_name)
    .bind(station.privacy.as_str())
    .bind(station.paused)
    .bind(station.paused_at.map(|t| t.timestamp_millis()))
    .bind(station.time_paused_ms)
    .bind(
        station
            .current_song
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
    )
    .bind(station.started_at.timestamp_millis())
    .bind(serde_json::to_string(&station.queue)?)
    .bind(station.current_song_index as i64)
    .bind(serde_json::to_string(&station.autofill)?)
    .bind(serde_json::to_string(&station.blacklist)?)
    .bind(serde_json::to_string(&station.requests)?)
    .bind(station.skip_vote_threshold as i64)
    .bind(serde_json::to_string(&station.djs)?)
    .bind(station.owner.to_string())
    .bind(station.backing_playlist_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init;
    use sqlx::sqlite::SqlitePoolOptions;
    use stationd_common::models::{
        AutofillSettings, CurrentSong, QueueEntry, RequestOrigin, RequestSettings,
    };

    async fn test_pool() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init::create_tables(&pool).await.unwrap();
        pool
    }

    fn sample_station() -> Station {
        Station {
            id: Uuid::new_v4(),
            display_name: "lofi beats".to_string(),
            privacy: Privacy::Unlisted,
            paused: false,
            paused_at: None,
            time_paused_ms: 0,
            current_song: Some(CurrentSong::from_entry(QueueEntry {
                media_source: "youtube:abc".to_string(),
                title: "Track".to_string(),
                artists: vec!["Artist".to_string()],
                thumbnail: None,
                duration_secs: 241,
                skip_duration_secs: 3,
                requested_by: None,
                requested_at: Utc::now(),
                origin: RequestOrigin::Autofill,
                verified: true,
            })),
            started_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            queue: vec![],
            current_song_index: 7,
            autofill: AutofillSettings::default(),
            blacklist: vec![Uuid::new_v4()],
            requests: RequestSettings::default(),
            skip_vote_threshold: 75,
            djs: vec![Uuid::new_v4()],
            owner: Uuid::new_v4(),
            backing_playlist_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_find_one_missing() {
        let pool = test_pool().await;
        assert!(find_one(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_and_find_round_trip() {
        let pool = test_pool().await;
        let station = sample_station();
        upsert(&pool, &station).await.unwrap();

        let loaded = find_one(&pool, station.id).await.unwrap().unwrap();
        assert_eq!(loaded.display_name, "lofi beats");
        assert_eq!(loaded.privacy, Privacy::Unlisted);
        assert_eq!(loaded.current_song_index, 7);
        assert_eq!(loaded.skip_vote_threshold, 75);
        assert_eq!(loaded.started_at, station.started_at);
        assert_eq!(
            loaded.current_song.unwrap().entry.media_source,
            "youtube:abc"
        );
        assert_eq!(loaded.blacklist, station.blacklist);
        assert_eq!(loaded.djs, station.djs);
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let pool = test_pool().await;
        let mut station = sample_station();
        upsert(&pool, &station).await.unwrap();

        station.paused = true;
        station.paused_at = Some(Utc.timestamp_millis_opt(1_700_000_100_000).unwrap());
        station.current_song = None;
        upsert(&pool, &station).await.unwrap();

        let loaded = find_one(&pool, station.id).await.unwrap().unwrap();
        assert!(loaded.paused);
        assert!(loaded.current_song.is_none());
        assert_eq!(loaded.paused_at, station.paused_at);

        assert_eq!(find_all(&pool).await.unwrap().len(), 1);
    }
}
