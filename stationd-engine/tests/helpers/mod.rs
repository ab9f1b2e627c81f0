//! Shared fixtures and collaborator doubles for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use stationd_common::events::StationEvent;
use stationd_common::models::{
    AutofillMode, AutofillSettings, CurrentSong, Privacy, QueueEntry, RequestOrigin,
    RequestSettings, Station,
};
use stationd_engine::bus::{InMemoryBus, SharedBus};
use stationd_engine::collab::{
    MediaResolver, PermissionGate, Playlist, PlaylistSong, PlaylistStore, RealtimeGateway,
    ResolvedMedia,
};
use stationd_engine::config::EngineConfig;
use stationd_engine::coordinator::PlaybackCoordinator;
use stationd_engine::db::{init, stations};
use stationd_engine::error::Result;
use stationd_engine::events::EventBus;
use stationd_engine::listeners::ListenerRegistry;
use stationd_engine::sched::NotificationScheduler;
use stationd_engine::store::StationStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Resolver double: every media source resolves to fixed metadata, with
/// optional per-source duration overrides and a fail-list
pub struct StubResolver {
    durations: Mutex<HashMap<String, i64>>,
    failing: Mutex<Vec<String>>,
}

impl StubResolver {
    pub fn new() -> Self {
        Self {
            durations: Mutex::new(HashMap::new()),
            failing: Mutex::new(Vec::new()),
        }
    }

    pub async fn set_duration(&self, media_source: &str, duration_secs: i64) {
        self.durations
            .lock()
            .await
            .insert(media_source.to_string(), duration_secs);
    }

    pub async fn fail_for(&self, media_source: &str) {
        self.failing.lock().await.push(media_source.to_string());
    }
}

#[async_trait]
impl MediaResolver for StubResolver {
    async fn resolve(&self, media_source: &str) -> Result<ResolvedMedia> {
        if self
            .failing
            .lock()
            .await
            .iter()
            .any(|m| m == media_source)
        {
            return Err(stationd_engine::Error::Resolver(format!(
                "unresolvable: {}",
                media_source
            )));
        }
        let duration_secs = self
            .durations
            .lock()
            .await
            .get(media_source)
            .copied()
            .unwrap_or(180);
        Ok(ResolvedMedia {
            title: format!("title of {}", media_source),
            artists: vec!["Test Artist".to_string()],
            thumbnail: None,
            duration_secs,
            skip_duration_secs: 0,
            verified: true,
        })
    }
}

/// Playlist store double backed by in-memory maps
pub struct StubPlaylists {
    playlists: Mutex<HashMap<Uuid, Playlist>>,
    referencing: Mutex<HashMap<Uuid, Vec<Uuid>>>,
}

impl StubPlaylists {
    pub fn new() -> Self {
        Self {
            playlists: Mutex::new(HashMap::new()),
            referencing: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, playlist: Playlist) {
        self.playlists.lock().await.insert(playlist.id, playlist);
    }

    pub async fn set_referencing(&self, playlist_id: Uuid, station_ids: Vec<Uuid>) {
        self.referencing
            .lock()
            .await
            .insert(playlist_id, station_ids);
    }
}

#[async_trait]
impl PlaylistStore for StubPlaylists {
    async fn playlist(&self, id: Uuid) -> Result<Option<Playlist>> {
        Ok(self.playlists.lock().await.get(&id).cloned())
    }

    async fn stations_referencing(&self, playlist_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .referencing
            .lock()
            .await
            .get(&playlist_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Gateway double recording every emission and room change
#[derive(Default)]
pub struct RecordingGateway {
    pub emissions: Mutex<Vec<(String, StationEvent)>>,
    pub socket_rooms: Mutex<HashMap<Uuid, Vec<String>>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn emissions_to(&self, target: &str) -> Vec<StationEvent> {
        self.emissions
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

#[async_trait]
impl RealtimeGateway for RecordingGateway {
    async fn emit_to_room(&self, room: &str, event: &StationEvent) {
        self.emissions
            .lock()
            .await
            .push((room.to_string(), event.clone()));
    }

    async fn emit_to_rooms(&self, rooms: &[String], event: &StationEvent) {
        let mut emissions = self.emissions.lock().await;
        for room in rooms {
            emissions.push((room.clone(), event.clone()));
        }
    }

    async fn emit_to_socket(&self, socket_id: Uuid, event: &StationEvent) {
        self.emissions
            .lock()
            .await
            .push((format!("socket.{}", socket_id), event.clone()));
    }

    async fn join_room(&self, socket_id: Uuid, room: &str) {
        let mut rooms = self.socket_rooms.lock().await;
        let entry = rooms.entry(socket_id).or_default();
        if !entry.iter().any(|r| r == room) {
            entry.push(room.to_string());
        }
    }

    async fn leave_room(&self, socket_id: Uuid, room: &str) {
        if let Some(entry) = self.socket_rooms.lock().await.get_mut(&socket_id) {
            entry.retain(|r| r != room);
        }
    }
}

/// Permission double granting everything
pub struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn has_permission(&self, _permission: &str, _user: Uuid, _resource: Uuid) -> Result<bool> {
        Ok(true)
    }
}

/// Permission double denying everything
pub struct DenyAll;

#[async_trait]
impl PermissionGate for DenyAll {
    async fn has_permission(&self, _permission: &str, _user: Uuid, _resource: Uuid) -> Result<bool> {
        Ok(false)
    }
}

/// A fully wired coordinator with every double exposed
pub struct Harness {
    pub bus: Arc<InMemoryBus>,
    pub store: Arc<StationStore>,
    pub scheduler: Arc<NotificationScheduler>,
    pub registry: Arc<ListenerRegistry>,
    pub coordinator: Arc<PlaybackCoordinator>,
    pub resolver: Arc<StubResolver>,
    pub playlists: Arc<StubPlaylists>,
    pub events: EventBus,
}

/// Install a test-writer tracing subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a coordinator harness around an in-memory database and bus.
///
/// The scheduler pump is started so timer-driven skips work under paused
/// tokio time.
pub async fn harness(config: EngineConfig) -> Harness {
    init_tracing();
    let pool: Pool<Sqlite> = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init::create_tables(&pool).await.unwrap();

    let bus = Arc::new(InMemoryBus::new());
    let shared_bus: Arc<dyn SharedBus> = bus.clone();
    let store = Arc::new(StationStore::new(pool, shared_bus.clone()));
    let scheduler = Arc::new(NotificationScheduler::new(shared_bus.clone()));
    let registry = Arc::new(ListenerRegistry::new());
    let events = EventBus::new(shared_bus.clone());
    let resolver = Arc::new(StubResolver::new());
    let playlists = Arc::new(StubPlaylists::new());

    let coordinator = PlaybackCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&scheduler),
        shared_bus,
        events.clone(),
        resolver.clone(),
        playlists.clone(),
        Arc::clone(&registry),
        Arc::new(config),
    );
    Arc::clone(&scheduler).start();

    Harness {
        bus,
        store,
        scheduler,
        registry,
        coordinator,
        resolver,
        playlists,
        events,
    }
}

/// A bare station with sensible defaults: public, unpaused, empty queue,
/// autofill disabled
pub fn base_station() -> Station {
    Station {
        id: Uuid::new_v4(),
        display_name: "integration test station".to_string(),
        privacy: Privacy::Public,
        paused: false,
        paused_at: None,
        time_paused_ms: 0,
        current_song: None,
        started_at: Utc::now(),
        queue: vec![],
        current_song_index: 0,
        autofill: AutofillSettings {
            enabled: false,
            mode: AutofillMode::Random,
            playlists: vec![],
            limit: 3,
        },
        blacklist: vec![],
        requests: RequestSettings {
            enabled: true,
            limit: 3,
        },
        skip_vote_threshold: 50,
        djs: vec![],
        owner: Uuid::new_v4(),
        backing_playlist_id: Uuid::new_v4(),
    }
}

/// Queue entry with a fixed duration
pub fn entry(media_source: &str, duration_secs: i64, origin: RequestOrigin) -> QueueEntry {
    QueueEntry {
        media_source: media_source.to_string(),
        title: media_source.to_string(),
        artists: vec![],
        thumbnail: None,
        duration_secs,
        skip_duration_secs: 0,
        requested_by: None,
        requested_at: Utc::now(),
        origin,
        verified: true,
    }
}

/// Promote an entry to a current song with no votes
pub fn playing(media_source: &str, duration_secs: i64) -> CurrentSong {
    CurrentSong::from_entry(entry(media_source, duration_secs, RequestOrigin::Autofill))
}

/// Persist a station and warm the cache mirror
pub async fn seed(harness: &Harness, station: &Station) {
    stations::upsert(harness.store.pool(), station).await.unwrap();
    harness.store.refresh_from_durable(station.id).await.unwrap();
}

/// A playlist of bare songs
pub fn playlist_of(songs: &[&str]) -> Playlist {
    Playlist {
        id: Uuid::new_v4(),
        songs: songs
            .iter()
            .map(|media_source| PlaylistSong {
                media_source: media_source.to_string(),
                title: media_source.to_string(),
                duration_secs: 180,
                tags: vec![],
            })
            .collect(),
    }
}

/// Let background tasks (scheduler pump, marker expiries, spawned
/// callbacks) settle under paused tokio time
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
}
