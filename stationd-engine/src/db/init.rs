//! Database initialization

use crate::error::Result;
use sqlx::{Pool, Sqlite};
use tracing::info;

/// Create the engine's tables if they do not exist
pub async fn create_tables(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Initializing station tables");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stations (
            guid TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            privacy TEXT NOT NULL,
            paused INTEGER NOT NULL DEFAULT 0,
            paused_at INTEGER,
            time_paused_ms INTEGER NOT NULL DEFAULT 0,
            current_song TEXT,
            started_at INTEGER NOT NULL,
            queue TEXT NOT NULL,
            current_song_index INTEGER NOT NULL DEFAULT 0,
            autofill TEXT NOT NULL,
            blacklist TEXT NOT NULL,
            requests TEXT NOT NULL,
            skip_vote_threshold INTEGER NOT NULL DEFAULT 50,
            djs TEXT NOT NULL,
            owner TEXT NOT NULL,
            backing_playlist_guid TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS station_history (
            guid TEXT PRIMARY KEY,
            station_guid TEXT NOT NULL,
            media_source TEXT NOT NULL,
            title TEXT NOT NULL,
            skip_reason TEXT NOT NULL,
            skipped_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_station_history_station
         ON station_history (station_guid)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
