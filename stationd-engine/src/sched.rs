//! Notification scheduler
//!
//! Distributed, at-most-one, named single-fire timer. A schedule call writes
//! a TTL marker into the shared bus with create-if-absent semantics; when the
//! marker expires, every process is notified and runs whatever callbacks it
//! registered locally for that name. Because the marker is gone once expired,
//! re-arming requires a fresh `schedule` call — the scheduler itself never
//! repeats.
//!
//! The marker's create-if-absent write is what gives the "at most one pending
//! timer per name" guarantee under concurrent scheduling from multiple
//! processes: the earlier marker wins and later calls see `AlreadyPending`.

use crate::bus::SharedBus;
use crate::error::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Async callback invoked when a notification fires
pub type NotificationCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// What a schedule call achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A fresh marker was created
    Armed,
    /// An earlier marker already holds the name; it wins
    AlreadyPending,
}

/// Distributed single-fire timer over the shared bus's TTL markers
pub struct NotificationScheduler {
    bus: Arc<dyn SharedBus>,
    subscriptions: RwLock<HashMap<String, Vec<NotificationCallback>>>,
}

impl NotificationScheduler {
    pub fn new(bus: Arc<dyn SharedBus>) -> Self {
        Self {
            bus,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Arm the timer for `name`, firing `delay` from now.
    ///
    /// No-ops (returning [`ScheduleOutcome::AlreadyPending`]) when a marker
    /// for `name` is already pending anywhere in the deployment.
    pub async fn schedule(&self, name: &str, delay: Duration) -> Result<ScheduleOutcome> {
        if self.bus.set_expiring_marker(name, delay).await? {
            debug!(name, delay_ms = delay.as_millis() as u64, "notification armed");
            Ok(ScheduleOutcome::Armed)
        } else {
            debug!(name, "notification already pending");
            Ok(ScheduleOutcome::AlreadyPending)
        }
    }

    /// Proactively delete the pending marker for `name`; safe to call when
    /// nothing is scheduled
    pub async fn unschedule(&self, name: &str) -> Result<()> {
        self.bus.delete_marker(name).await
    }

    /// Whether a marker for `name` is currently pending
    pub async fn is_scheduled(&self, name: &str) -> Result<bool> {
        self.bus.marker_exists(name).await
    }

    /// Register an in-process callback for `name`.
    ///
    /// With `unique`, an existing subscription for the same logical name is
    /// reused instead of duplicated.
    pub async fn subscribe(&self, name: &str, callback: NotificationCallback, unique: bool) {
        let mut subscriptions = self.subscriptions.write().await;
        let entry = subscriptions.entry(name.to_string()).or_default();
        if unique && !entry.is_empty() {
            debug!(name, "reusing existing subscription");
            return;
        }
        entry.push(callback);
    }

    /// Spawn the pump: consume marker-expiry notifications and invoke
    /// matching local subscriptions
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let scheduler = self;
        tokio::spawn(async move {
            let mut expiries = scheduler.bus.expiry_notifications().await;
            loop {
                match expiries.recv().await {
                    Ok(name) => {
                        let callbacks = scheduler
                            .subscriptions
                            .read()
                            .await
                            .get(&name)
                            .cloned()
                            .unwrap_or_default();
                        if callbacks.is_empty() {
                            debug!(name, "no local subscription for expired marker");
                            continue;
                        }
                        for callback in callbacks {
                            tokio::spawn(callback());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification pump lagged; relying on reconciliation");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
