//! Reconciliation sweep
//!
//! Periodic self-healing pass over the cached stations: any station whose
//! current song should already have ended but whose next-song timer never
//! fired (the scheduling process died, or the subscribing process changed
//! between scheduling and firing) is re-initialized, which forces the overdue
//! skip. Also prunes aged history rows when history is enabled.

use crate::config::EngineConfig;
use crate::coordinator::PlaybackCoordinator;
use crate::db::history;
use crate::store::StationStore;
use stationd_common::time;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Periodic recovery task for stuck station timers
pub struct ReconciliationSweep {
    coordinator: Arc<PlaybackCoordinator>,
    store: Arc<StationStore>,
    config: Arc<EngineConfig>,
}

impl ReconciliationSweep {
    pub fn new(
        coordinator: Arc<PlaybackCoordinator>,
        store: Arc<StationStore>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            coordinator,
            store,
            config,
        }
    }

    /// Spawn the fixed-period sweep loop
    pub fn start(self) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }

    /// One sweep pass; failures are logged, never fatal
    pub async fn run_once(&self) {
        let stations = match self.store.cached_stations().await {
            Ok(stations) => stations,
            Err(e) => {
                warn!(error = %e, "sweep could not scan cached stations");
                return;
            }
        };

        let now = time::now();
        for station in stations {
            let has_positive_duration = station
                .current_song
                .as_ref()
                .map(|s| s.entry.duration_secs > 0)
                .unwrap_or(false);
            let overdue = station
                .remaining_ms(now)
                .map(|remaining| remaining < 0)
                .unwrap_or(false);

            if station.paused || !has_positive_duration || !overdue {
                continue;
            }

            info!(station_id = %station.id, "recovering station with a missed next-song timer");
            match self.coordinator.initialize(station.id).await {
                Ok(_) => {}
                Err(e) if e.is_recognized() => {
                    debug!(station_id = %station.id, condition = %e, "recovery resolved to a no-op")
                }
                Err(e) => {
                    warn!(station_id = %station.id, error = %e, "recovery initialization failed")
                }
            }
        }

        if self.config.history.enabled {
            let cutoff = now - chrono::Duration::days(self.config.history.retention_days as i64);
            match history::prune_older_than(self.store.pool(), cutoff).await {
                Ok(0) => {}
                Ok(pruned) => info!(pruned, "pruned aged station history rows"),
                Err(e) => warn!(error = %e, "history pruning failed"),
            }
        }
    }
}
