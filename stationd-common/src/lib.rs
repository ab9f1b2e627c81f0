//! # Stationd Common Library
//!
//! Shared code for the station playback synchronization engine:
//! - Domain models (Station aggregate, queue entries, current song)
//! - Event types (StationEvent enum)
//! - Common error type
//! - Timestamp utilities

pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{Error, Result};
