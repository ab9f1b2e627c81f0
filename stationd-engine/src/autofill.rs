//! Queue autofill engine
//!
//! Pure selection over the station's configured source playlists: build the
//! eligible candidate set, order it by the station's autofill mode, then take
//! enough entries to top the queue back up to the autofill limit. Metadata
//! resolution for the selected candidates is a separate async step so one
//! failed resolution never aborts the rest.

use crate::collab::{MediaResolver, Playlist, PlaylistSong};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::thread_rng;
use stationd_common::models::{provider_of, AutofillMode, QueueEntry, RequestOrigin, Station};
use std::collections::HashSet;
use tracing::{debug, warn};

const WEIGHT_MIN: i64 = 1;
const WEIGHT_MAX: i64 = 10_000;

/// Result of a selection pass
#[derive(Debug, Clone)]
pub struct Selection {
    /// Candidates to append, in play order
    pub picks: Vec<PlaylistSong>,
    /// Updated sequential pointer; `None` when unchanged
    pub new_current_song_index: Option<usize>,
}

/// Pick songs to top the station's queue up to its autofill limit.
///
/// Recognized conditions: [`Error::AutofillDisabled`] when autofill is off,
/// [`Error::AutofillLimitReached`] when the queue already holds enough
/// autofill-origin entries. Callers swallow both.
pub fn select(
    station: &Station,
    source_playlists: &[Playlist],
    blacklists: &[Playlist],
    ignore_existing_queue: bool,
    recently_played: &[String],
    config: &EngineConfig,
) -> Result<Selection> {
    if !station.autofill.enabled {
        return Err(Error::AutofillDisabled);
    }

    let slots_used = if ignore_existing_queue {
        0
    } else {
        station.autofill_slots_used()
    };
    let slots_needed = station.autofill.limit.saturating_sub(slots_used);
    if slots_needed == 0 {
        return Err(Error::AutofillLimitReached);
    }

    // Everything the station is already playing or about to play, plus the
    // bounded recently-played ring when one is configured
    let mut excluded: HashSet<String> = if ignore_existing_queue {
        station
            .current_song
            .as_ref()
            .map(|s| s.entry.media_source.clone())
            .into_iter()
            .collect()
    } else {
        station.queued_media_sources()
    };
    excluded.extend(recently_played.iter().cloned());

    let blacklisted: HashSet<&str> = blacklists
        .iter()
        .flat_map(|p| p.songs.iter())
        .map(|s| s.media_source.as_str())
        .collect();

    // Union of all source playlists, de-duplicated by media source, in
    // source order
    let mut seen: HashSet<&str> = HashSet::new();
    let candidates: Vec<&PlaylistSong> = source_playlists
        .iter()
        .flat_map(|p| p.songs.iter())
        .filter(|song| {
            if !seen.insert(song.media_source.as_str()) {
                return false;
            }
            if blacklisted.contains(song.media_source.as_str()) {
                return false;
            }
            if !config.provider_enabled(provider_of(&song.media_source)) {
                return false;
            }
            !excluded.contains(&song.media_source)
        })
        .collect();

    if candidates.is_empty() {
        debug!(station_id = %station.id, "no eligible autofill candidates");
        return Ok(Selection {
            picks: Vec::new(),
            new_current_song_index: None,
        });
    }

    // Ordered walk list as (original candidate index, song)
    let indexed: Vec<(usize, &PlaylistSong)> = candidates.iter().copied().enumerate().collect();
    let ordered: Vec<(usize, &PlaylistSong)> = match station.autofill.mode {
        AutofillMode::Random => {
            let mut shuffled = indexed;
            shuffled.shuffle(&mut thread_rng());
            shuffled
        }
        AutofillMode::Sequential => {
            let start = station.current_song_index % candidates.len();
            let mut rotated = indexed;
            rotated.rotate_left(start);
            rotated
        }
        AutofillMode::Weighted => {
            let mut expanded: Vec<(usize, &PlaylistSong)> = Vec::new();
            for &(idx, song) in &indexed {
                let weight = config
                    .experimental
                    .weight_tag
                    .as_deref()
                    .map(|tag| weight_of(song, tag))
                    .unwrap_or(1);
                for _ in 0..weight {
                    expanded.push((idx, song));
                }
            }
            expanded.shuffle(&mut thread_rng());
            expanded
        }
    };

    // Take up to slots_needed distinct picks
    let mut picked: HashSet<&str> = HashSet::new();
    let mut picks: Vec<PlaylistSong> = Vec::with_capacity(slots_needed);
    let mut last_original_index = None;
    for (idx, song) in ordered {
        if picks.len() >= slots_needed {
            break;
        }
        if !picked.insert(song.media_source.as_str()) {
            continue;
        }
        picks.push(song.clone());
        last_original_index = Some(idx);
    }

    let new_current_song_index = match station.autofill.mode {
        AutofillMode::Sequential => {
            // Next run resumes after the last pick; rotation wraps the
            // pointer back into range
            last_original_index.map(|idx| idx + 1)
        }
        _ => None,
    };

    Ok(Selection {
        picks,
        new_current_song_index,
    })
}

/// Weight annotation parsed from a `<tag>:<weight>` tag, default 1,
/// clamped to [1, 10000]
fn weight_of(song: &PlaylistSong, tag_name: &str) -> i64 {
    let prefix = format!("{}:", tag_name);
    song.tags
        .iter()
        .find_map(|tag| tag.strip_prefix(&prefix))
        .and_then(|value| value.parse::<i64>().ok())
        .map(|weight| weight.clamp(WEIGHT_MIN, WEIGHT_MAX))
        .unwrap_or(1)
}

/// Resolve selected candidates to full queue entries.
///
/// Resolution failures for one candidate are logged and do not abort the
/// others; partial success is acceptable.
pub async fn resolve_selected(
    resolver: &dyn MediaResolver,
    picks: &[PlaylistSong],
    requested_at: DateTime<Utc>,
) -> Vec<QueueEntry> {
    let mut entries = Vec::with_capacity(picks.len());
    for pick in picks {
        match resolver.resolve(&pick.media_source).await {
            Ok(media) => entries.push(QueueEntry {
                media_source: pick.media_source.clone(),
                title: media.title,
                artists: media.artists,
                thumbnail: media.thumbnail,
                duration_secs: media.duration_secs,
                skip_duration_secs: media.skip_duration_secs,
                requested_by: None,
                requested_at,
                origin: RequestOrigin::Autofill,
                verified: media.verified,
            }),
            Err(e) => {
                warn!(media_source = %pick.media_source, error = %e, "autofill candidate failed to resolve");
            }
        }
    }
    entries
}
