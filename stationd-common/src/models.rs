//! Domain models for the station playback synchronization engine
//!
//! The `Station` aggregate is persisted as one durable row and mirrored into
//! the shared cache; all nested collections serialize through serde_json.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Station visibility level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    Public,
    Unlisted,
    Private,
}

impl Privacy {
    /// Stable string form used in durable rows
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Unlisted => "unlisted",
            Privacy::Private => "private",
        }
    }
}

impl std::str::FromStr for Privacy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "public" => Ok(Privacy::Public),
            "unlisted" => Ok(Privacy::Unlisted),
            "private" => Ok(Privacy::Private),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown privacy level: {}",
                other
            ))),
        }
    }
}

/// How autofill orders its candidate songs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutofillMode {
    Random,
    Sequential,
    /// Experimental: candidates are expanded by a per-song weight tag before
    /// shuffling
    Weighted,
}

/// Who put a song in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOrigin {
    User,
    Autofill,
}

/// Why a skip happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The current song's clock ran out
    Natural,
    /// An operator or DJ forced the skip
    Forced,
    /// The skip-vote quorum was reached
    VoteSkip,
    /// Recovery, validation, or any other internal cause
    Other,
}

impl SkipReason {
    /// Stable string form used in durable history rows
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Natural => "natural",
            SkipReason::Forced => "forced",
            SkipReason::VoteSkip => "vote_skip",
            SkipReason::Other => "other",
        }
    }
}

impl std::str::FromStr for SkipReason {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "natural" => Ok(SkipReason::Natural),
            "forced" => Ok(SkipReason::Forced),
            "vote_skip" => Ok(SkipReason::VoteSkip),
            "other" => Ok(SkipReason::Other),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown skip reason: {}",
                other
            ))),
        }
    }
}

/// Autofill configuration for a station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutofillSettings {
    pub enabled: bool,
    pub mode: AutofillMode,
    /// Source playlists autofill may draw from
    pub playlists: Vec<Uuid>,
    /// Target number of autofill-origin entries in the queue
    pub limit: usize,
}

impl Default for AutofillSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AutofillMode::Random,
            playlists: Vec::new(),
            limit: 3,
        }
    }
}

/// Song-request configuration for a station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSettings {
    pub enabled: bool,
    /// Maximum non-owned queue slots per requester
    pub limit: usize,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 3,
        }
    }
}

/// A song awaiting playback in a station's queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Opaque provider-qualified id, e.g. `youtube:dQw4w9WgXcQ`
    pub media_source: String,
    pub title: String,
    pub artists: Vec<String>,
    pub thumbnail: Option<String>,
    /// Total playing time in seconds
    pub duration_secs: i64,
    /// Intro offset in seconds the player may jump over
    pub skip_duration_secs: i64,
    pub requested_by: Option<Uuid>,
    pub requested_at: DateTime<Utc>,
    pub origin: RequestOrigin,
    pub verified: bool,
}

impl QueueEntry {
    /// The provider half of the media source (`youtube` in `youtube:abc`)
    pub fn provider(&self) -> &str {
        provider_of(&self.media_source)
    }
}

/// Provider half of a provider-qualified media source
pub fn provider_of(media_source: &str) -> &str {
    media_source.split(':').next().unwrap_or(media_source)
}

/// The currently playing song: queue-entry fields plus the skip-vote set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentSong {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub skip_votes: HashSet<Uuid>,
}

impl CurrentSong {
    /// Promote a queue entry to the current song with an empty vote set
    pub fn from_entry(entry: QueueEntry) -> Self {
        Self {
            entry,
            skip_votes: HashSet::new(),
        }
    }
}

/// A persistent shared playback session: one active song plus a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub id: Uuid,
    pub display_name: String,
    pub privacy: Privacy,

    pub paused: bool,
    /// When the station was paused (set while `paused`)
    pub paused_at: Option<DateTime<Utc>>,
    /// Milliseconds accumulated while the current song's clock was stopped
    pub time_paused_ms: i64,

    pub current_song: Option<CurrentSong>,
    /// When the current song's clock started
    pub started_at: DateTime<Utc>,

    pub queue: Vec<QueueEntry>,
    /// Pointer used by sequential autofill; indexes into the source playlist,
    /// not the queue
    pub current_song_index: usize,

    pub autofill: AutofillSettings,
    /// Playlists whose songs must never be autofilled into this station
    pub blacklist: Vec<Uuid>,
    pub requests: RequestSettings,

    /// Percentage of counted listeners required to vote-skip (0-100)
    pub skip_vote_threshold: u8,

    pub djs: Vec<Uuid>,
    pub owner: Uuid,
    /// The station's own playlist; never autofillable or blacklistable
    /// against itself
    pub backing_playlist_id: Uuid,
}

impl Station {
    /// Milliseconds of the current song left to play at `now`.
    ///
    /// Negative when the song's clock has already run out; `None` when no
    /// song is playing.
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        let song = self.current_song.as_ref()?;
        let elapsed = (now - self.started_at).num_milliseconds() - self.time_paused_ms;
        Some(song.entry.duration_secs * 1000 - elapsed)
    }

    /// Number of autofill-origin entries currently queued
    pub fn autofill_slots_used(&self) -> usize {
        self.queue
            .iter()
            .filter(|e| e.origin == RequestOrigin::Autofill)
            .count()
    }

    /// Media sources present in the queue and the current song
    pub fn queued_media_sources(&self) -> HashSet<String> {
        let mut sources: HashSet<String> = self
            .queue
            .iter()
            .map(|e| e.media_source.clone())
            .collect();
        if let Some(song) = &self.current_song {
            sources.insert(song.entry.media_source.clone());
        }
        sources
    }

    /// Whether `user` owns or DJs this station
    pub fn is_dj_or_owner(&self, user: Uuid) -> bool {
        self.owner == user || self.djs.contains(&user)
    }

    /// Non-autofill queue slots currently held by `user`
    pub fn request_slots_used(&self, user: Uuid) -> usize {
        self.queue
            .iter()
            .filter(|e| e.origin == RequestOrigin::User && e.requested_by == Some(user))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(media_source: &str, origin: RequestOrigin, requested_by: Option<Uuid>) -> QueueEntry {
        QueueEntry {
            media_source: media_source.to_string(),
            title: media_source.to_string(),
            artists: vec![],
            thumbnail: None,
            duration_secs: 180,
            skip_duration_secs: 0,
            requested_by,
            requested_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            origin,
            verified: true,
        }
    }

    fn station() -> Station {
        Station {
            id: Uuid::new_v4(),
            display_name: "test".to_string(),
            privacy: Privacy::Public,
            paused: false,
            paused_at: None,
            time_paused_ms: 0,
            current_song: None,
            started_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            queue: vec![],
            current_song_index: 0,
            autofill: AutofillSettings::default(),
            blacklist: vec![],
            requests: RequestSettings::default(),
            skip_vote_threshold: 50,
            djs: vec![],
            owner: Uuid::new_v4(),
            backing_playlist_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_remaining_ms_counts_down_from_full_duration() {
        let mut s = station();
        s.current_song = Some(CurrentSong::from_entry(entry(
            "youtube:a",
            RequestOrigin::Autofill,
            None,
        )));
        s.started_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let now = Utc.timestamp_opt(1_700_000_010, 0).unwrap();
        assert_eq!(s.remaining_ms(now), Some(170_000));
    }

    #[test]
    fn test_remaining_ms_credits_paused_time() {
        let mut s = station();
        s.current_song = Some(CurrentSong::from_entry(entry(
            "youtube:a",
            RequestOrigin::Autofill,
            None,
        )));
        s.started_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        s.time_paused_ms = 5_000;

        let now = Utc.timestamp_opt(1_700_000_010, 0).unwrap();
        assert_eq!(s.remaining_ms(now), Some(175_000));
    }

    #[test]
    fn test_remaining_ms_negative_after_expiry() {
        let mut s = station();
        s.current_song = Some(CurrentSong::from_entry(entry(
            "youtube:a",
            RequestOrigin::Autofill,
            None,
        )));
        s.started_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let now = Utc.timestamp_opt(1_700_000_500, 0).unwrap();
        assert_eq!(s.remaining_ms(now), Some(-320_000));
    }

    #[test]
    fn test_remaining_ms_none_without_song() {
        let s = station();
        assert_eq!(s.remaining_ms(Utc::now()), None);
    }

    #[test]
    fn test_autofill_slots_used_ignores_user_entries() {
        let user = Uuid::new_v4();
        let mut s = station();
        s.queue = vec![
            entry("youtube:a", RequestOrigin::Autofill, None),
            entry("youtube:b", RequestOrigin::User, Some(user)),
            entry("youtube:c", RequestOrigin::Autofill, None),
        ];
        assert_eq!(s.autofill_slots_used(), 2);
        assert_eq!(s.request_slots_used(user), 1);
    }

    #[test]
    fn test_queued_media_sources_includes_current_song() {
        let mut s = station();
        s.queue = vec![entry("youtube:a", RequestOrigin::Autofill, None)];
        s.current_song = Some(CurrentSong::from_entry(entry(
            "youtube:b",
            RequestOrigin::User,
            None,
        )));
        let sources = s.queued_media_sources();
        assert!(sources.contains("youtube:a"));
        assert!(sources.contains("youtube:b"));
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn test_provider_of() {
        assert_eq!(provider_of("youtube:abc"), "youtube");
        assert_eq!(provider_of("no-provider"), "no-provider");
    }

    #[test]
    fn test_current_song_serializes_flat() {
        let song = CurrentSong::from_entry(entry("youtube:a", RequestOrigin::User, None));
        let value = serde_json::to_value(&song).unwrap();
        // Queue-entry fields sit at the top level next to skip_votes
        assert_eq!(value["media_source"], "youtube:a");
        assert!(value["skip_votes"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_station_round_trips_through_json() {
        let mut s = station();
        s.queue = vec![entry("youtube:a", RequestOrigin::Autofill, None)];
        s.current_song = Some(CurrentSong::from_entry(entry(
            "youtube:b",
            RequestOrigin::User,
            None,
        )));
        let json = serde_json::to_string(&s).unwrap();
        let back: Station = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, s.id);
        assert_eq!(back.queue.len(), 1);
        assert_eq!(
            back.current_song.unwrap().entry.media_source,
            "youtube:b"
        );
    }
}
