//! Typed event bus
//!
//! All cross-process state propagation in the subsystem flows through one
//! declared channel carrying serialized [`StationEvent`] values. Publishers
//! are the coordinator's operations; the single subscriber is the engine's
//! event loop, which drives re-initialization and realtime room fan-out in
//! every process (including the one that published).

use crate::bus::SharedBus;
use crate::error::{Error, Result};
use stationd_common::events::StationEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// The one channel station events travel on
pub const STATION_EVENTS_CHANNEL: &str = "station.events";

/// Typed publish/subscribe over the shared bus
#[derive(Clone)]
pub struct EventBus {
    bus: Arc<dyn SharedBus>,
}

impl EventBus {
    pub fn new(bus: Arc<dyn SharedBus>) -> Self {
        Self { bus }
    }

    /// Publish an event to every process
    pub async fn publish(&self, event: &StationEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        self.bus.publish(STATION_EVENTS_CHANNEL, payload).await
    }

    /// Publish, logging instead of failing; used where event delivery is
    /// best-effort relative to the already-persisted state change
    pub async fn publish_lossy(&self, event: &StationEvent) {
        if let Err(e) = self.publish(event).await {
            warn!(error = %e, "failed to publish station event");
        }
    }

    /// Subscribe to the raw payload stream
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<String>> {
        self.bus.subscribe(STATION_EVENTS_CHANNEL).await
    }

    /// Decode one received payload
    pub fn decode(payload: &str) -> Result<StationEvent> {
        serde_json::from_str(payload)
            .map_err(|e| Error::Bus(format!("undecodable station event: {}", e)))
    }
}
