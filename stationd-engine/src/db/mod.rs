//! Durable storage access
//!
//! SQLite-backed document storage for the station aggregate and the
//! feature-flagged skip history. One row per station; nested collections
//! serialize through serde_json into TEXT columns.

pub mod history;
pub mod init;
pub mod stations;
