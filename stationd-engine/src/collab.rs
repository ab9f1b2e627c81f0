//! External collaborator contracts
//!
//! The engine never talks to third-party providers, playlist storage, the
//! realtime transport, or the permission system directly; hosts inject
//! implementations of these traits at startup.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stationd_common::events::StationEvent;
use uuid::Uuid;

/// Permission key gating visibility of private/unlisted stations
pub const PERMISSION_VIEW_STATION: &str = "stations.view";

/// Full metadata for a playable item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedMedia {
    pub title: String,
    pub artists: Vec<String>,
    pub thumbnail: Option<String>,
    pub duration_secs: i64,
    pub skip_duration_secs: i64,
    pub verified: bool,
}

/// A source-playlist song, as returned by the playlist store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistSong {
    pub media_source: String,
    pub title: String,
    pub duration_secs: i64,
    /// Free-form annotations; weighted autofill reads `<tag>:<weight>`
    pub tags: Vec<String>,
}

/// A playlist with its songs in source order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: Uuid,
    pub songs: Vec<PlaylistSong>,
}

/// Resolves a media source to full metadata, possibly creating the media
/// record out of band on first resolution
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, media_source: &str) -> Result<ResolvedMedia>;
}

/// Read access to playlists, plus the reverse lookup used when a playlist
/// changes
#[async_trait]
pub trait PlaylistStore: Send + Sync {
    async fn playlist(&self, id: Uuid) -> Result<Option<Playlist>>;

    /// Stations whose autofill sources or blacklist reference this playlist
    async fn stations_referencing(&self, playlist_id: Uuid) -> Result<Vec<Uuid>>;
}

/// Room-scoped event emission and room membership for the realtime
/// transport.
///
/// Emission is best-effort by contract; implementations log their own
/// delivery failures.
#[async_trait]
pub trait RealtimeGateway: Send + Sync {
    async fn emit_to_room(&self, room: &str, event: &StationEvent);
    async fn emit_to_rooms(&self, rooms: &[String], event: &StationEvent);
    async fn emit_to_socket(&self, socket_id: Uuid, event: &StationEvent);
    async fn join_room(&self, socket_id: Uuid, room: &str);
    async fn leave_room(&self, socket_id: Uuid, room: &str);
}

/// Boolean permission check contract
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn has_permission(&self, permission: &str, user_id: Uuid, resource_id: Uuid)
        -> Result<bool>;
}
