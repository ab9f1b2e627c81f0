//! # Station Playback Synchronization Engine (stationd-engine)
//!
//! Keeps a station — a shared, continuously-playing queue of media — in a
//! single consistent playback state across many connected listeners and
//! multiple stateless backend processes sharing one durable store and one
//! shared cache/notification bus.
//!
//! **Architecture:** a timer-driven state machine (`coordinator`) backed by a
//! cache-aside station repository (`store`), a distributed single-fire timer
//! built on TTL-expiry notifications (`sched`), a pure queue autofill
//! algorithm (`autofill`), and a periodic reconciliation sweep (`sweep`).
//! External collaborators (media resolution, playlists, realtime transport,
//! permissions) are injected through the traits in `collab`; everything is
//! wired by the `engine::StationSyncEngine` startup container.

pub mod autofill;
pub mod bus;
pub mod collab;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod listeners;
pub mod sched;
pub mod store;
pub mod sweep;

pub use config::EngineConfig;
pub use engine::StationSyncEngine;
pub use error::{Error, ErrorKind, Result};
