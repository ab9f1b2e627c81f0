//! Engine configuration
//!
//! Loaded from a TOML file by the host, with serde defaults for every field
//! so a missing or partial file yields a working engine.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Engine configuration surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reconciliation sweep period in seconds
    pub sweep_interval_secs: u64,

    /// Media providers currently enabled system-wide; songs from other
    /// providers are excluded from autofill and invalidate a current song
    pub enabled_providers: Vec<String>,

    pub experimental: ExperimentalConfig,
    pub history: HistoryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            enabled_providers: vec!["youtube".to_string(), "soundcloud".to_string()],
            experimental: ExperimentalConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

/// Per-station experimental overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentalConfig {
    /// Tag name carrying the weighted-autofill weight annotation
    /// (`<tag>:<weight>` on a playlist song)
    pub weight_tag: Option<String>,

    /// Stations with a bounded "recently played" exclusion ring, mapped to
    /// the ring length (absent = disabled)
    pub recently_played_window: HashMap<Uuid, usize>,

    /// Stations where user requests queue ahead of autofill-origin entries
    pub requests_ahead_of_autofill: HashMap<Uuid, bool>,
}

/// Station history retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    /// Rows older than this are pruned by the sweep
    pub retention_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_days: 30,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidInput(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| Error::InvalidInput(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Whether a media provider is enabled system-wide
    pub fn provider_enabled(&self, provider: &str) -> bool {
        self.enabled_providers.iter().any(|p| p == provider)
    }

    /// Length of the station's recently-played exclusion ring (0 = disabled)
    pub fn recently_played_window(&self, station_id: Uuid) -> usize {
        self.experimental
            .recently_played_window
            .get(&station_id)
            .copied()
            .unwrap_or(0)
    }

    /// Whether user requests queue ahead of autofill entries on this station
    pub fn requests_ahead_of_autofill(&self, station_id: Uuid) -> bool {
        self.experimental
            .requests_ahead_of_autofill
            .get(&station_id)
            .copied()
            .unwrap_or(false)
    }
}
