//! Listener registry
//!
//! Tracks which realtime sockets are listening to which station and whether
//! each one is actively participating. Owned by the engine and injected into
//! whatever needs it; vote-quorum evaluation counts the sockets this process
//! serves.

use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Station-level room name
pub fn station_room(station_id: Uuid) -> String {
    format!("station.{}", station_id)
}

/// Per-song room name; occupied only while a song is playing
pub fn song_room(station_id: Uuid) -> String {
    format!("station.{}.playing", station_id)
}

/// Global room receiving next-song events for public stations
pub const DISCOVERY_ROOM: &str = "station.discovery";

/// Name of a station's next-song notification
pub fn next_song_notification(station_id: Uuid) -> String {
    format!("station.{}.next_song", station_id)
}

/// One connected socket
#[derive(Debug, Clone)]
pub struct Listener {
    pub socket_id: Uuid,
    /// Anonymous listeners carry no user id
    pub user_id: Option<Uuid>,
    pub station_id: Uuid,
    /// Actively listening, as opposed to idling in the room
    pub participating: bool,
}

/// Who listens where, for the sockets this process serves
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<Uuid, Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Record a socket joining a station's room; a socket listens to at most
    /// one station, so a second join moves it
    pub async fn join(&self, socket_id: Uuid, user_id: Option<Uuid>, station_id: Uuid) {
        self.listeners.write().await.insert(
            socket_id,
            Listener {
                socket_id,
                user_id,
                station_id,
                participating: true,
            },
        );
    }

    /// Remove a socket; returns what it was listening to
    pub async fn leave(&self, socket_id: Uuid) -> Option<Listener> {
        self.listeners.write().await.remove(&socket_id)
    }

    /// Flip a socket between participating and passive
    pub async fn set_participating(&self, socket_id: Uuid, participating: bool) {
        if let Some(listener) = self.listeners.write().await.get_mut(&socket_id) {
            listener.participating = participating;
        }
    }

    /// Look up one socket
    pub async fn get(&self, socket_id: Uuid) -> Option<Listener> {
        self.listeners.read().await.get(&socket_id).cloned()
    }

    /// Sockets currently in a station's room
    pub async fn listeners_for(&self, station_id: Uuid) -> Vec<Listener> {
        self.listeners
            .read()
            .await
            .values()
            .filter(|l| l.station_id == station_id)
            .cloned()
            .collect()
    }

    /// How many sockets are in a station's room
    pub async fn count_for(&self, station_id: Uuid) -> usize {
        self.listeners
            .read()
            .await
            .values()
            .filter(|l| l.station_id == station_id)
            .count()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
