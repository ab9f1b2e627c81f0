//! Playback coordinator
//!
//! The per-station state machine: initialize, skip (natural/forced/vote),
//! pause/resume bookkeeping, vote-quorum evaluation, song requests, and
//! autofill/blacklist/DJ management. Every mutation goes through the station
//! store's fresh read-modify-write and every cross-process effect is a typed
//! event on the bus; timer-driven skips arrive through the notification
//! scheduler's expiry pump.
//!
//! All entry points tolerate acting on stale state: they re-read the station
//! before mutating and treat pop-from-empty, not-found-during-side-steps and
//! nothing-to-skip as benign no-ops, so duplicate or interleaved invocations
//! degrade to idempotent retries.

use crate::autofill;
use crate::bus::SharedBus;
use crate::collab::{MediaResolver, PlaylistStore};
use crate::config::EngineConfig;
use crate::db::history;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::listeners::{next_song_notification, ListenerRegistry};
use crate::sched::{NotificationCallback, NotificationScheduler};
use crate::store::StationStore;
use futures::future::BoxFuture;
use stationd_common::events::StationEvent;
use stationd_common::models::{CurrentSong, QueueEntry, RequestOrigin, SkipReason, Station};
use stationd_common::time;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Logical bus table holding each station's recently-played ring
pub const RECENTLY_PLAYED_TABLE: &str = "station_recent";

/// The station playback state machine
pub struct PlaybackCoordinator {
    store: Arc<StationStore>,
    scheduler: Arc<NotificationScheduler>,
    bus: Arc<dyn SharedBus>,
    events: EventBus,
    resolver: Arc<dyn MediaResolver>,
    playlists: Arc<dyn PlaylistStore>,
    registry: Arc<ListenerRegistry>,
    config: Arc<EngineConfig>,
    self_ref: OnceLock<Weak<PlaybackCoordinator>>,
}

impl PlaybackCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StationStore>,
        scheduler: Arc<NotificationScheduler>,
        bus: Arc<dyn SharedBus>,
        events: EventBus,
        resolver: Arc<dyn MediaResolver>,
        playlists: Arc<dyn PlaylistStore>,
        registry: Arc<ListenerRegistry>,
        config: Arc<EngineConfig>,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            store,
            scheduler,
            bus,
            events,
            resolver,
            playlists,
            registry,
            config,
            self_ref: OnceLock::new(),
        });
        let _ = coordinator.self_ref.set(Arc::downgrade(&coordinator));
        coordinator
    }

    pub fn store(&self) -> &Arc<StationStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<NotificationScheduler> {
        &self.scheduler
    }

    /// Bring a station under timer management.
    ///
    /// Called at process startup for every station, on resume, and whenever
    /// the queue transitions empty to non-empty. Clears any stale timer,
    /// (re)registers the in-process next-song subscription, then either arms
    /// a fresh timer for the remaining play time or forces a skip when the
    /// current song is invalid, missing, or already over.
    pub async fn initialize(&self, station_id: Uuid) -> Result<Station> {
        let name = next_song_notification(station_id);
        if let Err(e) = self.scheduler.unschedule(&name).await {
            warn!(station_id = %station_id, error = %e, "failed to clear stale next-song timer");
        }
        self.scheduler
            .subscribe(&name, self.next_song_callback(station_id), true)
            .await;

        let station = self
            .store
            .get(station_id)
            .await?
            .ok_or(Error::StationNotFound(station_id))?;

        let song_invalid = station
            .current_song
            .as_ref()
            .map(|song| !self.config.provider_enabled(song.entry.provider()))
            .unwrap_or(false);
        if song_invalid || (!station.paused && station.current_song.is_none()) {
            return self.skip(station_id, SkipReason::Other).await;
        }

        if station.paused {
            debug!(station_id = %station_id, "station is paused; no timer armed");
            return Ok(station);
        }

        match station.remaining_ms(time::now()) {
            Some(remaining) if remaining >= 0 => {
                self.scheduler
                    .schedule(&name, Duration::from_millis(remaining as u64))
                    .await?;
                Ok(station)
            }
            Some(_) => self.skip(station_id, SkipReason::Natural).await,
            None => {
                // Unpaused stations without a current song were skipped above
                error!(station_id = %station_id, "no current song on an unpaused station after validation");
                Ok(station)
            }
        }
    }

    /// Advance the station to its next song.
    ///
    /// Uniformly invoked by timer fire, manual force-skip, vote quorum, and
    /// the reconciliation sweep; idempotent against "nothing to do".
    pub async fn skip(&self, station_id: Uuid, reason: SkipReason) -> Result<Station> {
        let name = next_song_notification(station_id);
        if let Err(e) = self.scheduler.unschedule(&name).await {
            warn!(station_id = %station_id, error = %e, "best-effort unschedule failed");
        }

        let station = self
            .store
            .get(station_id)
            .await?
            .ok_or(Error::StationNotFound(station_id))?;
        info!(station_id = %station_id, reason = reason.as_str(), "skipping current song");

        if self.config.history.enabled {
            if let Some(song) = &station.current_song {
                if let Err(e) =
                    history::append(self.store.pool(), station_id, song, reason, time::now()).await
                {
                    warn!(station_id = %station_id, error = %e, "history append failed");
                }
            }
        }

        // Top up before popping so a freshly-filled queue can hand us a song;
        // the pop below re-reads the row and sees whatever was added
        self.autofill_top_up_swallowing(station_id).await?;

        let now = time::now();
        let mut outgoing: Option<CurrentSong> = None;
        let updated = self
            .store
            .update(station_id, |s| {
                outgoing = s.current_song.take();
                let next = if s.queue.is_empty() {
                    None
                } else {
                    Some(s.queue.remove(0))
                };
                s.current_song = next.map(CurrentSong::from_entry);
                s.started_at = now;
                s.time_paused_ms = 0;
                if s.paused {
                    s.paused_at = Some(now);
                }
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;

        let window = self.config.recently_played_window(station_id);
        if window > 0 {
            if let Some(song) = &outgoing {
                if let Err(e) = self
                    .push_recently_played(station_id, &song.entry.media_source, window)
                    .await
                {
                    warn!(station_id = %station_id, error = %e, "failed to record recently played song");
                }
            }
        }

        // The pop freed a slot
        let station = self
            .autofill_top_up_swallowing(station_id)
            .await?
            .unwrap_or(updated);

        self.events
            .publish_lossy(&StationEvent::QueueUpdated {
                station_id,
                timestamp: now,
            })
            .await;
        self.events
            .publish_lossy(&StationEvent::NextSong {
                station_id,
                song: station.current_song.clone(),
                timestamp: now,
            })
            .await;

        if let Some(song) = &station.current_song {
            if !station.paused {
                let play_ms = (song.entry.duration_secs * 1000).max(0) as u64;
                self.scheduler
                    .schedule(&name, Duration::from_millis(play_ms))
                    .await?;
            }
        }

        Ok(station)
    }

    /// Stop the station's logical clock
    pub async fn pause(&self, station_id: Uuid) -> Result<Station> {
        let now = time::now();
        let mut already_paused = false;
        let updated = self
            .store
            .update(station_id, |s| {
                if s.paused {
                    already_paused = true;
                    return;
                }
                s.paused = true;
                s.paused_at = Some(now);
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;

        if already_paused {
            return Ok(updated);
        }

        let name = next_song_notification(station_id);
        if let Err(e) = self.scheduler.unschedule(&name).await {
            warn!(station_id = %station_id, error = %e, "failed to unschedule on pause");
        }
        self.events
            .publish_lossy(&StationEvent::StationPaused {
                station_id,
                timestamp: now,
            })
            .await;
        Ok(updated)
    }

    /// Restart the station's logical clock.
    ///
    /// Publishes `StationResumed`; the engine event loop in every process
    /// re-invokes [`initialize`](Self::initialize), which recomputes the
    /// remaining play time from the accumulated pause credit.
    pub async fn resume(&self, station_id: Uuid) -> Result<Station> {
        let now = time::now();
        let mut already_running = false;
        let updated = self
            .store
            .update(station_id, |s| {
                if !s.paused {
                    already_running = true;
                    return;
                }
                if let Some(paused_at) = s.paused_at.take() {
                    s.time_paused_ms += (now - paused_at).num_milliseconds().max(0);
                }
                s.paused = false;
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;

        if already_running {
            return Ok(updated);
        }

        self.events
            .publish_lossy(&StationEvent::StationResumed {
                station_id,
                timestamp: now,
            })
            .await;
        Ok(updated)
    }

    /// Record a listener's skip vote and evaluate the quorum.
    ///
    /// Voting twice is idempotent. Returns the vote count on the current
    /// song.
    pub async fn cast_skip_vote(&self, station_id: Uuid, user_id: Uuid) -> Result<usize> {
        let mut votes = None;
        self.store
            .update(station_id, |s| {
                if let Some(song) = &mut s.current_song {
                    song.skip_votes.insert(user_id);
                    votes = Some(song.skip_votes.len());
                }
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;

        let Some(votes) = votes else {
            return Err(Error::NothingToSkip);
        };

        self.events
            .publish_lossy(&StationEvent::SkipVoteCast {
                station_id,
                user_id,
                votes,
                timestamp: time::now(),
            })
            .await;

        self.process_skip_votes(station_id).await?;
        Ok(votes)
    }

    /// Evaluate the skip-vote quorum against the room this process serves.
    ///
    /// Counted users are the distinct user ids among room sockets that are
    /// participating or have already voted; a cast vote is never invalidated
    /// by a later participation change. With zero votes the only action is
    /// the bootstrap case: an unpaused station with no current song and a
    /// non-empty queue is skipped into playback.
    pub async fn process_skip_votes(&self, station_id: Uuid) -> Result<()> {
        let station = self
            .store
            .get(station_id)
            .await?
            .ok_or(Error::StationNotFound(station_id))?;

        let votes: HashSet<Uuid> = station
            .current_song
            .as_ref()
            .map(|s| s.skip_votes.clone())
            .unwrap_or_default();

        if votes.is_empty() {
            if !station.paused && station.current_song.is_none() && !station.queue.is_empty() {
                debug!(station_id = %station_id, "bootstrapping playback from queued songs");
                return self.skip_swallowing(station_id, SkipReason::VoteSkip).await;
            }
            return Ok(());
        }

        let room = self.registry.listeners_for(station_id).await;
        let counted: HashSet<Uuid> = room
            .iter()
            .filter_map(|l| {
                let user = l.user_id?;
                if l.participating || votes.contains(&user) {
                    Some(user)
                } else {
                    None
                }
            })
            .collect();

        if counted.is_empty() {
            error!(station_id = %station_id, "skip votes present but no counted listeners");
            return Ok(());
        }

        if !station.paused
            && quorum_reached(votes.len(), counted.len(), station.skip_vote_threshold)
        {
            info!(
                station_id = %station_id,
                votes = votes.len(),
                counted = counted.len(),
                threshold = station.skip_vote_threshold,
                "skip-vote quorum reached"
            );
            return self.skip_swallowing(station_id, SkipReason::VoteSkip).await;
        }
        Ok(())
    }

    /// Queue a song on a listener's behalf.
    ///
    /// Validation: requests must be enabled, the song must not already be
    /// queued or playing, and non-owner/DJ requesters are limited to the
    /// station's per-requester slot count. The entry is inserted ahead of
    /// autofill-origin entries when the station's experimental toggle is on.
    pub async fn request_song(
        &self,
        station_id: Uuid,
        media_source: &str,
        user_id: Uuid,
    ) -> Result<Station> {
        let station = self
            .store
            .get(station_id)
            .await?
            .ok_or(Error::StationNotFound(station_id))?;

        if !station.requests.enabled {
            return Err(Error::RequestsDisabled);
        }
        if station.queued_media_sources().contains(media_source) {
            return Err(Error::DuplicateRequest);
        }
        if !station.is_dj_or_owner(user_id)
            && station.request_slots_used(user_id) >= station.requests.limit
        {
            return Err(Error::RequestLimitReached {
                limit: station.requests.limit,
            });
        }

        let media = self.resolver.resolve(media_source).await?;
        let now = time::now();
        let entry = QueueEntry {
            media_source: media_source.to_string(),
            title: media.title,
            artists: media.artists,
            thumbnail: media.thumbnail,
            duration_secs: media.duration_secs,
            skip_duration_secs: media.skip_duration_secs,
            requested_by: Some(user_id),
            requested_at: now,
            origin: RequestOrigin::User,
            verified: media.verified,
        };

        let ahead_of_autofill = self.config.requests_ahead_of_autofill(station_id);
        let mut duplicate = false;
        let mut limit_hit = None;
        let updated = self
            .store
            .update(station_id, |s| {
                // Re-validate on the fresh row; a racing request may have won
                if s.queued_media_sources().contains(media_source) {
                    duplicate = true;
                    return;
                }
                if !s.is_dj_or_owner(user_id)
                    && s.request_slots_used(user_id) >= s.requests.limit
                {
                    limit_hit = Some(s.requests.limit);
                    return;
                }
                if ahead_of_autofill {
                    let position = s
                        .queue
                        .iter()
                        .position(|e| e.origin == RequestOrigin::Autofill)
                        .unwrap_or(s.queue.len());
                    s.queue.insert(position, entry);
                } else {
                    s.queue.push(entry);
                }
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;

        if duplicate {
            return Err(Error::DuplicateRequest);
        }
        if let Some(limit) = limit_hit {
            return Err(Error::RequestLimitReached { limit });
        }

        self.events
            .publish_lossy(&StationEvent::QueueUpdated {
                station_id,
                timestamp: now,
            })
            .await;
        Ok(updated)
    }

    /// Add a source playlist to the station's autofill rotation
    pub async fn add_autofill_playlist(
        &self,
        station_id: Uuid,
        playlist_id: Uuid,
    ) -> Result<Station> {
        let mut rejection = None;
        let updated = self
            .store
            .update(station_id, |s| {
                if playlist_id == s.backing_playlist_id {
                    rejection = Some(Error::InvalidInput(
                        "a station cannot autofill from its own playlist".to_string(),
                    ));
                } else if s.autofill.playlists.contains(&playlist_id) {
                    rejection = Some(Error::PlaylistAlreadyAutofilled(playlist_id));
                } else if s.blacklist.contains(&playlist_id) {
                    rejection = Some(Error::InvalidInput(
                        "playlist is blacklisted for this station".to_string(),
                    ));
                } else {
                    s.autofill.playlists.push(playlist_id);
                }
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;
        if let Some(e) = rejection {
            return Err(e);
        }

        let station = self
            .autofill_top_up_swallowing(station_id)
            .await?
            .unwrap_or(updated);
        self.events
            .publish_lossy(&StationEvent::QueueUpdated {
                station_id,
                timestamp: time::now(),
            })
            .await;
        Ok(station)
    }

    /// Remove a source playlist from the autofill rotation; already-queued
    /// entries stay queued
    pub async fn remove_autofill_playlist(
        &self,
        station_id: Uuid,
        playlist_id: Uuid,
    ) -> Result<Station> {
        let mut missing = false;
        let updated = self
            .store
            .update(station_id, |s| {
                if !s.autofill.playlists.contains(&playlist_id) {
                    missing = true;
                    return;
                }
                s.autofill.playlists.retain(|p| *p != playlist_id);
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;
        if missing {
            return Err(Error::InvalidInput(
                "playlist is not autofilling this station".to_string(),
            ));
        }
        Ok(updated)
    }

    /// Blacklist a playlist's songs from ever being autofilled
    pub async fn add_blacklist_playlist(
        &self,
        station_id: Uuid,
        playlist_id: Uuid,
    ) -> Result<Station> {
        let mut rejection = None;
        let updated = self
            .store
            .update(station_id, |s| {
                if playlist_id == s.backing_playlist_id {
                    rejection = Some(Error::InvalidInput(
                        "a station cannot blacklist its own playlist".to_string(),
                    ));
                } else if s.blacklist.contains(&playlist_id) {
                    rejection = Some(Error::PlaylistAlreadyBlacklisted(playlist_id));
                } else if s.autofill.playlists.contains(&playlist_id) {
                    rejection = Some(Error::InvalidInput(
                        "playlist is currently autofilling this station".to_string(),
                    ));
                } else {
                    s.blacklist.push(playlist_id);
                }
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;
        if let Some(e) = rejection {
            return Err(e);
        }
        Ok(updated)
    }

    /// Remove a playlist from the blacklist
    pub async fn remove_blacklist_playlist(
        &self,
        station_id: Uuid,
        playlist_id: Uuid,
    ) -> Result<Station> {
        let mut missing = false;
        let updated = self
            .store
            .update(station_id, |s| {
                if !s.blacklist.contains(&playlist_id) {
                    missing = true;
                    return;
                }
                s.blacklist.retain(|p| *p != playlist_id);
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;
        if missing {
            return Err(Error::InvalidInput(
                "playlist is not blacklisted for this station".to_string(),
            ));
        }
        Ok(updated)
    }

    /// Grant a user DJ control
    pub async fn add_dj(&self, station_id: Uuid, user_id: Uuid) -> Result<Station> {
        let mut changed = false;
        let updated = self
            .store
            .update(station_id, |s| {
                if !s.djs.contains(&user_id) {
                    s.djs.push(user_id);
                    changed = true;
                }
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;
        if changed {
            self.events
                .publish_lossy(&StationEvent::DjAdded {
                    station_id,
                    user_id,
                    timestamp: time::now(),
                })
                .await;
        }
        Ok(updated)
    }

    /// Revoke a user's DJ control
    pub async fn remove_dj(&self, station_id: Uuid, user_id: Uuid) -> Result<Station> {
        let mut changed = false;
        let updated = self
            .store
            .update(station_id, |s| {
                if s.djs.contains(&user_id) {
                    s.djs.retain(|u| *u != user_id);
                    changed = true;
                }
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;
        if changed {
            self.events
                .publish_lossy(&StationEvent::DjRemoved {
                    station_id,
                    user_id,
                    timestamp: time::now(),
                })
                .await;
        }
        Ok(updated)
    }

    /// Re-run autofill for every station referencing a changed playlist
    pub async fn handle_playlist_updated(&self, playlist_id: Uuid) -> Result<()> {
        let stations = self.playlists.stations_referencing(playlist_id).await?;
        for station_id in stations {
            match self.autofill_top_up_swallowing(station_id).await {
                Ok(_) => {
                    self.events
                        .publish_lossy(&StationEvent::QueueUpdated {
                            station_id,
                            timestamp: time::now(),
                        })
                        .await;
                }
                // One broken station must not block the rest
                Err(e) => {
                    warn!(station_id = %station_id, playlist_id = %playlist_id, error = %e, "re-autofill failed")
                }
            }
        }
        Ok(())
    }

    /// Top the station's queue up to its autofill limit.
    ///
    /// Surfaces [`Error::AutofillDisabled`] and
    /// [`Error::AutofillLimitReached`] for callers that care; most go
    /// through the swallowing wrapper.
    pub async fn autofill_top_up(&self, station_id: Uuid) -> Result<Station> {
        let station = self
            .store
            .get(station_id)
            .await?
            .ok_or(Error::StationNotFound(station_id))?;
        if !station.autofill.enabled {
            return Err(Error::AutofillDisabled);
        }

        let mut sources = Vec::with_capacity(station.autofill.playlists.len());
        for playlist_id in &station.autofill.playlists {
            match self.playlists.playlist(*playlist_id).await? {
                Some(playlist) => sources.push(playlist),
                None => {
                    warn!(station_id = %station_id, playlist_id = %playlist_id, "autofill source playlist missing")
                }
            }
        }
        let mut blacklists = Vec::with_capacity(station.blacklist.len());
        for playlist_id in &station.blacklist {
            if let Some(playlist) = self.playlists.playlist(*playlist_id).await? {
                blacklists.push(playlist);
            }
        }

        let recently_played = self.recently_played(station_id).await;
        let selection = autofill::select(
            &station,
            &sources,
            &blacklists,
            false,
            &recently_played,
            &self.config,
        )?;
        if selection.picks.is_empty() {
            return Ok(station);
        }

        let entries =
            autofill::resolve_selected(self.resolver.as_ref(), &selection.picks, time::now()).await;
        if entries.is_empty() {
            warn!(station_id = %station_id, "no selected candidate resolved; leaving the queue as is");
            return Ok(station);
        }

        let updated = self
            .store
            .update(station_id, |s| {
                let existing = s.queued_media_sources();
                for entry in entries {
                    // A racing request may have queued it since selection
                    if existing.contains(&entry.media_source) {
                        continue;
                    }
                    s.queue.push(entry);
                }
                if let Some(index) = selection.new_current_song_index {
                    s.current_song_index = index;
                }
            })
            .await?
            .ok_or(Error::StationNotFound(station_id))?;
        Ok(updated)
    }

    async fn autofill_top_up_swallowing(&self, station_id: Uuid) -> Result<Option<Station>> {
        match self.autofill_top_up(station_id).await {
            Ok(station) => Ok(Some(station)),
            Err(e) if e.is_recognized() => {
                debug!(station_id = %station_id, condition = %e, "autofill not applicable");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn skip_swallowing(&self, station_id: Uuid, reason: SkipReason) -> Result<()> {
        match self.skip(station_id, reason).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_recognized() => {
                debug!(station_id = %station_id, condition = %e, "skip resolved to a no-op");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The station's bounded recently-played ring; read failures degrade to
    /// an empty ring
    async fn recently_played(&self, station_id: Uuid) -> Vec<String> {
        match self
            .bus
            .table_get(RECENTLY_PLAYED_TABLE, &station_id.to_string())
            .await
        {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(station_id = %station_id, error = %e, "undecodable recently-played ring");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(station_id = %station_id, error = %e, "failed to read recently-played ring");
                Vec::new()
            }
        }
    }

    async fn push_recently_played(
        &self,
        station_id: Uuid,
        media_source: &str,
        window: usize,
    ) -> Result<()> {
        let mut ring = self.recently_played(station_id).await;
        ring.push(media_source.to_string());
        let excess = ring.len().saturating_sub(window);
        if excess > 0 {
            ring.drain(0..excess);
        }
        self.bus
            .table_set(
                RECENTLY_PLAYED_TABLE,
                &station_id.to_string(),
                serde_json::to_string(&ring)?,
            )
            .await
    }

    fn next_song_callback(&self, station_id: Uuid) -> NotificationCallback {
        let weak = self
            .self_ref
            .get()
            .cloned()
            .unwrap_or_else(Weak::new);
        Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(coordinator) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = coordinator.skip(station_id, SkipReason::Natural).await {
                    if e.is_recognized() {
                        debug!(station_id = %station_id, condition = %e, "timer fire resolved to a no-op");
                    } else {
                        error!(station_id = %station_id, error = %e, "timer-driven skip failed");
                    }
                }
            }) as BoxFuture<'static, ()>
        })
    }
}

/// Boundary-inclusive quorum check: skip when
/// `min(votes, counted) / counted * 100 >= threshold`
fn quorum_reached(votes: usize, counted: usize, threshold: u8) -> bool {
    if counted == 0 {
        return false;
    }
    let ratio = votes.min(counted) as f64 / counted as f64 * 100.0;
    ratio >= threshold as f64
}
