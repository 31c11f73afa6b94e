//! # Configuration
//!
//! Settings for the map engine and the `mapdb` binary, read from a TOML file.
//! Every field has a default, so a partial file (or none at all) is usable.
//!
//! ```toml
//! [map]
//! data_dir = "data/maps"
//! game = "GS"
//! max_file_bytes = 268435456
//!
//! [matching]
//! max_restarts = 5
//! peer_timeout_ms = 3000
//! peer_max_lines = 5
//! location_timeout_ms = 15000
//!
//! [pathfinding]
//! nearest_cutoff = 20.0
//! missing_edge_cost = 0.2
//!
//! [logging]
//! level = "info"
//! file = "mapdb.log"
//! ```
//!
//! Maps for a game live in `<data_dir>/<game>/`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::map::matcher::{MatchSettings, DEFAULT_MAX_RESTARTS};
use crate::map::pathfinder::{DEFAULT_MISSING_EDGE_COST, DEFAULT_NEAREST_CUTOFF};
use crate::map::policy::{policy_for_game, GameMatchingPolicy};
use crate::map::probe::ProbeSettings;
use crate::map::storage::{FileStore, DEFAULT_MAX_FILE_BYTES};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub pathfinding: PathfindingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Game code; selects the matching policy ("GS..." or "DR...").
    #[serde(default = "default_game")]
    pub game: String,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_data_dir() -> String {
    "data/maps".to_string()
}

fn default_game() -> String {
    "GS".to_string()
}

fn default_max_file_bytes() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            game: default_game(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
    #[serde(default = "default_peer_max_lines")]
    pub peer_max_lines: usize,
    #[serde(default = "default_location_timeout_ms")]
    pub location_timeout_ms: u64,
}

fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}

fn default_peer_timeout_ms() -> u64 {
    3_000
}

fn default_peer_max_lines() -> usize {
    5
}

fn default_location_timeout_ms() -> u64 {
    15_000
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            peer_timeout_ms: default_peer_timeout_ms(),
            peer_max_lines: default_peer_max_lines(),
            location_timeout_ms: default_location_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathfindingConfig {
    /// Nearest-of-set searches stop at the first candidate closer than this.
    #[serde(default = "default_nearest_cutoff")]
    pub nearest_cutoff: f64,
    /// Seconds assumed for an edge with no recorded cost when estimating.
    #[serde(default = "default_missing_edge_cost")]
    pub missing_edge_cost: f64,
}

fn default_nearest_cutoff() -> f64 {
    DEFAULT_NEAREST_CUTOFF
}

fn default_missing_edge_cost() -> f64 {
    DEFAULT_MISSING_EDGE_COST
}

impl Default for PathfindingConfig {
    fn default() -> Self {
        Self {
            nearest_cutoff: default_nearest_cutoff(),
            missing_edge_cost: default_missing_edge_cost(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if policy_for_game(&self.map.game).is_none() {
            return Err(anyhow!(
                "Unknown game '{}' (expected a GS or DR code)",
                self.map.game
            ));
        }
        if self.map.max_file_bytes == 0 {
            return Err(anyhow!("map.max_file_bytes must be positive"));
        }
        if self.matching.max_restarts == 0 {
            return Err(anyhow!("matching.max_restarts must be at least 1"));
        }
        if self.matching.peer_timeout_ms == 0 || self.matching.location_timeout_ms == 0 {
            return Err(anyhow!("matching timeouts must be positive"));
        }
        let costs = [
            ("pathfinding.nearest_cutoff", self.pathfinding.nearest_cutoff),
            ("pathfinding.missing_edge_cost", self.pathfinding.missing_edge_cost),
        ];
        for (name, value) in costs {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!("{} must be a non-negative number, got {}", name, value));
            }
        }
        Ok(())
    }

    /// Per-game directory holding `map-<epoch>.*` files.
    pub fn map_dir(&self) -> PathBuf {
        PathBuf::from(&self.map.data_dir).join(&self.map.game)
    }

    pub fn file_store(&self) -> FileStore {
        FileStore::new(self.map_dir()).with_max_file_bytes(self.map.max_file_bytes)
    }

    pub fn policy(&self) -> Result<Arc<dyn GameMatchingPolicy>> {
        policy_for_game(&self.map.game)
            .map(Arc::from)
            .ok_or_else(|| anyhow!("Unknown game '{}'", self.map.game))
    }

    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            max_restarts: self.matching.max_restarts,
            probe: ProbeSettings {
                peer_timeout: Duration::from_millis(self.matching.peer_timeout_ms),
                peer_max_lines: self.matching.peer_max_lines,
                location_timeout: Duration::from_millis(self.matching.location_timeout_ms),
            },
        }
    }
}
