//! Station skip history
//!
//! Feature-flagged append-only log: one row per skip, never mutated, pruned
//! by age from the reconciliation sweep.

use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};
use stationd_common::models::{CurrentSong, SkipReason};
use uuid::Uuid;

/// One recorded skip
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub id: Uuid,
    pub station_id: Uuid,
    pub media_source: String,
    pub title: String,
    pub skip_reason: SkipReason,
    pub skipped_at: DateTime<Utc>,
}

/// Append a skip record
pub async fn append(
    pool: &Pool<Sqlite>,
    station_id: Uuid,
    song: &CurrentSong,
    reason: SkipReason,
    skipped_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO station_history (guid, station_guid, media_source, title, skip_reason, skipped_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(station_id.to_string())
    .bind(&song.entry.media_source)
    .bind(&song.entry.title)
    .bind(reason.as_str())
    .bind(skipped_at.timestamp_millis())
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete rows older than `cutoff`; returns how many were removed
pub async fn prune_older_than(pool: &Pool<Sqlite>, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM station_history WHERE skipped_at < ?")
        .bind(cutoff.timestamp_millis())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Most recent skips for one station, newest first
pub async fn find_for_station(
    pool: &Pool<Sqlite>,
    station_id: Uuid,
    limit: i64,
) -> Result<Vec<HistoryRow>> {
    use chrono::TimeZone;
    use std::str::FromStr;

    let rows = sqlx::query(
        "SELECT * FROM station_history WHERE station_guid = ?
         ORDER BY skipped_at DESC LIMIT ?",
    )
    .bind(station_id.to_string())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let guid: String = row.try_get("guid")?;
            let station_guid: String = row.try_get("station_guid")?;
            let reason: String = row.try_get("skip_reason")?;
            let skipped_at: i64 = row.try_get("skipped_at")?;
            Ok(HistoryRow {
                id: Uuid::parse_str(&guid).map_err(|e| {
                    crate::error::Error::Internal(format!("invalid history guid: {}", e))
                })?,
                station_id: Uuid::parse_str(&station_guid).map_err(|e| {
                    crate::error::Error::Internal(format!("invalid history station guid: {}", e))
                })?,
                media_source: row.try_get("media_source")?,
                title: row.try_get("title")?,
                skip_reason: SkipReason::from_str(&reason).map_err(|e| {
                    crate::error::Error::Internal(format!("invalid history reason: {}", e))
                })?,
                skipped_at: Utc
                    .timestamp_millis_opt(skipped_at)
                    .single()
                    .ok_or_else(|| {
                        crate::error::Error::Internal("history timestamp out of range".to_string())
                    })?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;
    use stationd_common::models::{QueueEntry, RequestOrigin};

    async fn test_pool() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init::create_tables(&pool).await.unwrap();
        pool
    }

    fn song(media_source: &str) -> CurrentSong {
        CurrentSong::from_entry(QueueEntry {
            media_source: media_source.to_string(),
            title: "t".to_string(),
            artists: vec![],
            thumbnail: None,
            duration_secs: 100,
            skip_duration_secs: 0,
            requested_by: None,
            requested_at: Utc::now(),
            origin: RequestOrigin::Autofill,
            verified: false,
        })
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let pool = test_pool().await;
        let station = Uuid::new_v4();
        let now = Utc::now();

        append(&pool, station, &song("youtube:a"), SkipReason::Natural, now)
            .await
            .unwrap();
        append(
            &pool,
            station,
            &song("youtube:b"),
            SkipReason::VoteSkip,
            now + Duration::seconds(10),
        )
        .await
        .unwrap();

        let rows = find_for_station(&pool, station, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        // Newest first
        assert_eq!(rows[0].media_source, "youtube:b");
        assert_eq!(rows[0].skip_reason, SkipReason::VoteSkip);
        assert_eq!(rows[1].skip_reason, SkipReason::Natural);
    }

    #[tokio::test]
    async fn test_prune_removes_only_aged_rows() {
        let pool = test_pool().await;
        let station = Uuid::new_v4();
        let now = Utc::now();

        append(
            &pool,
            station,
            &song("youtube:old"),
            SkipReason::Other,
            now - Duration::days(60),
        )
        .await
        .unwrap();
        append(&pool, station, &song("youtube:new"), SkipReason::Other, now)
            .await
            .unwrap();

        let removed = prune_older_than(&pool, now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let rows = find_for_station(&pool, station, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].media_source, "youtube:new");
    }
}
