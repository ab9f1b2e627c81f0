//! Engine facade and startup wiring
//!
//! `StationSyncEngine` is the startup-ordered container for the subsystem:
//! it constructs every component with explicit dependencies, brings all known
//! stations under timer management, and runs the three background loops — the
//! scheduler's expiry pump, the typed-event loop, and the reconciliation
//! sweep.
//!
//! The event loop is the single declared subscriber of the station event
//! channel. It runs in every process (including the one that published) and
//! owns all pub/sub side effects: re-initializing stations on resume/creation
//! and on empty-to-non-empty queue transitions, releasing timers on pause,
//! moving local sockets between per-song rooms, and fanning events out to
//! realtime rooms with per-socket permission filtering for non-public
//! stations.

use crate::bus::SharedBus;
use crate::collab::{
    MediaResolver, PermissionGate, PlaylistStore, RealtimeGateway, PERMISSION_VIEW_STATION,
};
use crate::config::EngineConfig;
use crate::coordinator::PlaybackCoordinator;
use crate::db;
use crate::error::Result;
use crate::events::EventBus;
use crate::listeners::{
    next_song_notification, song_room, station_room, ListenerRegistry, DISCOVERY_ROOM,
};
use crate::sched::NotificationScheduler;
use crate::store::StationStore;
use crate::sweep::ReconciliationSweep;
use sqlx::{Pool, Sqlite};
use stationd_common::events::StationEvent;
use stationd_common::models::Privacy;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything the engine needs injected at startup
pub struct EngineDeps {
    pub pool: Pool<Sqlite>,
    pub bus: Arc<dyn SharedBus>,
    pub resolver: Arc<dyn MediaResolver>,
    pub playlists: Arc<dyn PlaylistStore>,
    pub gateway: Arc<dyn RealtimeGateway>,
    pub permissions: Arc<dyn PermissionGate>,
    pub config: EngineConfig,
}

/// The assembled subsystem
pub struct StationSyncEngine {
    coordinator: Arc<PlaybackCoordinator>,
    scheduler: Arc<NotificationScheduler>,
    registry: Arc<ListenerRegistry>,
    store: Arc<StationStore>,
    events: EventBus,
    gateway: Arc<dyn RealtimeGateway>,
    permissions: Arc<dyn PermissionGate>,
    config: Arc<EngineConfig>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StationSyncEngine {
    /// Construct every component, creating the durable schema if needed
    pub async fn new(deps: EngineDeps) -> Result<Self> {
        db::init::create_tables(&deps.pool).await?;

        let config = Arc::new(deps.config);
        let store = Arc::new(StationStore::new(deps.pool, Arc::clone(&deps.bus)));
        let scheduler = Arc::new(NotificationScheduler::new(Arc::clone(&deps.bus)));
        let registry = Arc::new(ListenerRegistry::new());
        let events = EventBus::new(Arc::clone(&deps.bus));

        let coordinator = PlaybackCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Arc::clone(&deps.bus),
            events.clone(),
            deps.resolver,
            deps.playlists,
            Arc::clone(&registry),
            Arc::clone(&config),
        );

        Ok(Self {
            coordinator,
            scheduler,
            registry,
            store,
            events,
            gateway: deps.gateway,
            permissions: deps.permissions,
            config,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn coordinator(&self) -> &Arc<PlaybackCoordinator> {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<StationStore> {
        &self.store
    }

    /// Spawn the background loops and initialize every known station
    pub async fn start(&self) -> Result<()> {
        {
            let mut tasks = self.tasks.lock().await;
            if !tasks.is_empty() {
                debug!("engine already started");
                return Ok(());
            }

            tasks.push(Arc::clone(&self.scheduler).start());

            // Subscribe before initializing so no event is missed
            let rx = self.events.subscribe().await?;
            tasks.push(self.spawn_event_loop(rx));

            let sweep = ReconciliationSweep::new(
                Arc::clone(&self.coordinator),
                Arc::clone(&self.store),
                Arc::clone(&self.config),
            );
            tasks.push(sweep.start());
        }

        let stations = db::stations::find_all(self.store.pool()).await?;
        info!(count = stations.len(), "initializing stations at startup");
        for station in stations {
            match self.coordinator.initialize(station.id).await {
                Ok(_) => {}
                Err(e) if e.is_recognized() => {
                    debug!(station_id = %station.id, condition = %e, "startup initialization was a no-op")
                }
                Err(e) => {
                    error!(station_id = %station.id, error = %e, "startup initialization failed")
                }
            }
        }
        Ok(())
    }

    /// Abort the background loops
    pub async fn stop(&self) {
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        info!("engine stopped");
    }

    /// A socket joins a station: registry bookkeeping plus room membership
    pub async fn join_station(
        &self,
        socket_id: Uuid,
        user_id: Option<Uuid>,
        station_id: Uuid,
    ) -> Result<()> {
        self.registry.join(socket_id, user_id, station_id).await;
        self.gateway
            .join_room(socket_id, &station_room(station_id))
            .await;
        if let Some(station) = self.store.get(station_id).await? {
            if station.current_song.is_some() {
                self.gateway
                    .join_room(socket_id, &song_room(station_id))
                    .await;
            }
        }
        Ok(())
    }

    /// A socket disconnects or leaves; the remaining room may now satisfy
    /// the skip-vote quorum
    pub async fn leave_station(&self, socket_id: Uuid) -> Result<()> {
        let Some(listener) = self.registry.leave(socket_id).await else {
            return Ok(());
        };
        self.gateway
            .leave_room(socket_id, &station_room(listener.station_id))
            .await;
        self.gateway
            .leave_room(socket_id, &song_room(listener.station_id))
            .await;

        match self.coordinator.process_skip_votes(listener.station_id).await {
            Ok(()) => {}
            Err(e) if e.is_recognized() => {}
            Err(e) => {
                warn!(station_id = %listener.station_id, error = %e, "vote re-evaluation after leave failed")
            }
        }
        Ok(())
    }

    /// A socket flips between participating and passive; re-evaluate the
    /// quorum it counts toward
    pub async fn set_participation(&self, socket_id: Uuid, participating: bool) -> Result<()> {
        self.registry
            .set_participating(socket_id, participating)
            .await;
        if let Some(listener) = self.registry.get(socket_id).await {
            match self.coordinator.process_skip_votes(listener.station_id).await {
                Ok(()) => {}
                Err(e) if e.is_recognized() => {}
                Err(e) => {
                    warn!(station_id = %listener.station_id, error = %e, "vote re-evaluation after participation change failed")
                }
            }
        }
        Ok(())
    }

    fn spawn_event_loop(&self, mut rx: broadcast::Receiver<String>) -> JoinHandle<()> {
        let coordinator = Arc::clone(&self.coordinator);
        let scheduler = Arc::clone(&self.scheduler);
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let gateway = Arc::clone(&self.gateway);
        let permissions = Arc::clone(&self.permissions);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        let event = match EventBus::decode(&payload) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(error = %e, "dropping undecodable station event");
                                continue;
                            }
                        };
                        handle_event(
                            &coordinator,
                            &scheduler,
                            &store,
                            &registry,
                            &gateway,
                            &permissions,
                            event,
                        )
                        .await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event loop lagged; relying on reconciliation");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

async fn handle_event(
    coordinator: &Arc<PlaybackCoordinator>,
    scheduler: &Arc<NotificationScheduler>,
    store: &Arc<StationStore>,
    registry: &Arc<ListenerRegistry>,
    gateway: &Arc<dyn RealtimeGateway>,
    permissions: &Arc<dyn PermissionGate>,
    event: StationEvent,
) {
    let station_id = event.station_id();
    match &event {
        StationEvent::StationCreated { .. } | StationEvent::StationResumed { .. } => {
            initialize_logged(coordinator, station_id).await;
            fan_out(store, registry, gateway, permissions, station_id, &event, false).await;
        }
        StationEvent::QueueUpdated { .. } => {
            // A queue that went empty-to-non-empty restarts playback
            match store.get(station_id).await {
                Ok(Some(station)) => {
                    if !station.paused
                        && station.current_song.is_none()
                        && !station.queue.is_empty()
                    {
                        initialize_logged(coordinator, station_id).await;
                    }
                }
                Ok(None) => debug!(station_id = %station_id, "queue event for unknown station"),
                Err(e) => warn!(station_id = %station_id, error = %e, "cannot read station for queue event"),
            }
            fan_out(store, registry, gateway, permissions, station_id, &event, false).await;
        }
        StationEvent::StationPaused { .. } => {
            // Idempotent across processes; the marker is shared
            if let Err(e) = scheduler
                .unschedule(&next_song_notification(station_id))
                .await
            {
                warn!(station_id = %station_id, error = %e, "failed to release timer on pause event");
            }
            fan_out(store, registry, gateway, permissions, station_id, &event, false).await;
        }
        StationEvent::NextSong { song, .. } => {
            // Local sockets follow the song into (or out of) the per-song room
            let room = song_room(station_id);
            for listener in registry.listeners_for(station_id).await {
                if song.is_some() {
                    gateway.join_room(listener.socket_id, &room).await;
                } else {
                    gateway.leave_room(listener.socket_id, &room).await;
                }
            }
            fan_out(store, registry, gateway, permissions, station_id, &event, true).await;
        }
        StationEvent::SkipVoteCast { .. }
        | StationEvent::DjAdded { .. }
        | StationEvent::DjRemoved { .. } => {
            fan_out(store, registry, gateway, permissions, station_id, &event, false).await;
        }
    }
}

async fn initialize_logged(coordinator: &Arc<PlaybackCoordinator>, station_id: Uuid) {
    match coordinator.initialize(station_id).await {
        Ok(_) => {}
        Err(e) if e.is_recognized() => {
            debug!(station_id = %station_id, condition = %e, "initialization was a no-op")
        }
        Err(e) => error!(station_id = %station_id, error = %e, "event-driven initialization failed"),
    }
}

/// Emit an event to the station's audience.
///
/// Public stations broadcast to the station room (plus the discovery room
/// for next-song events); private and unlisted stations fan out per socket,
/// gated by the view permission.
async fn fan_out(
    store: &Arc<StationStore>,
    registry: &Arc<ListenerRegistry>,
    gateway: &Arc<dyn RealtimeGateway>,
    permissions: &Arc<dyn PermissionGate>,
    station_id: Uuid,
    event: &StationEvent,
    include_discovery: bool,
) {
    let station = match store.get(station_id).await {
        Ok(Some(station)) => station,
        Ok(None) => {
            debug!(station_id = %station_id, "skipping fan-out for unknown station");
            return;
        }
        Err(e) => {
            warn!(station_id = %station_id, error = %e, "cannot read station for fan-out");
            return;
        }
    };

    match station.privacy {
        Privacy::Public => {
            if include_discovery {
                gateway
                    .emit_to_rooms(
                        &[station_room(station_id), DISCOVERY_ROOM.to_string()],
                        event,
                    )
                    .await;
            } else {
                gateway.emit_to_room(&station_room(station_id), event).await;
            }
        }
        Privacy::Unlisted | Privacy::Private => {
            for listener in registry.listeners_for(station_id).await {
                let Some(user_id) = listener.user_id else {
                    continue;
                };
                match permissions
                    .has_permission(PERMISSION_VIEW_STATION, user_id, station_id)
                    .await
                {
                    Ok(true) => gateway.emit_to_socket(listener.socket_id, event).await,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(station_id = %station_id, user_id = %user_id, error = %e, "permission check failed during fan-out")
                    }
                }
            }
        }
    }
}
