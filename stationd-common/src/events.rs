//! Event types for the station event system
//!
//! Every cross-process state change is a `StationEvent` published on the
//! shared bus; each backend process consumes the stream and drives its local
//! realtime rooms and timers from it.

use crate::models::CurrentSong;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Station event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StationEvent {
    /// A station was created and should be brought under timer management
    StationCreated {
        station_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The current song changed (None when playback drained)
    NextSong {
        station_id: Uuid,
        song: Option<CurrentSong>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Queue contents changed (request, autofill top-up, skip, removal)
    QueueUpdated {
        station_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback clock stopped
    StationPaused {
        station_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback clock restarted
    StationResumed {
        station_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A listener voted to skip the current song
    SkipVoteCast {
        station_id: Uuid,
        user_id: Uuid,
        votes: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A DJ was granted control of the station
    DjAdded {
        station_id: Uuid,
        user_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A DJ lost control of the station
    DjRemoved {
        station_id: Uuid,
        user_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl StationEvent {
    /// The station this event belongs to
    pub fn station_id(&self) -> Uuid {
        match self {
            StationEvent::StationCreated { station_id, .. }
            | StationEvent::NextSong { station_id, .. }
            | StationEvent::QueueUpdated { station_id, .. }
            | StationEvent::StationPaused { station_id, .. }
            | StationEvent::StationResumed { station_id, .. }
            | StationEvent::SkipVoteCast { station_id, .. }
            | StationEvent::DjAdded { station_id, .. }
            | StationEvent::DjRemoved { station_id, .. } => *station_id,
        }
    }
}
