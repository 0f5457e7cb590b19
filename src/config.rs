//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Server binding settings
//! - SQLite database location and lock wait
//! - Competition mode (users or teams) and optional time window
//! - Unlockable item types and conflict retry budget

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::ItemKind;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub competition: CompetitionConfig,
    #[serde(default)]
    pub unlocks: UnlocksConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// How long a writer waits on another connection's lock
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Whether points are spent by individual users or by whole teams
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionMode {
    Users,
    #[default]
    Teams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompetitionConfig {
    #[serde(default)]
    pub mode: CompetitionMode,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlocksConfig {
    /// Item table tags accepted in the `type` field of an unlock request
    #[serde(default = "default_item_types")]
    pub item_types: Vec<String>,
    /// Total attempts of validate-then-write when the commit conflicts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_item_types() -> Vec<String> {
    vec![ItemKind::Hint.tag().to_string()]
}

fn default_max_attempts() -> u32 {
    2
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("unlocks.db"),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for UnlocksConfig {
    fn default() -> Self {
        Self {
            item_types: default_item_types(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl CompetitionConfig {
    /// Check whether `now` falls inside the configured window (open ends allowed)
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.start {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if now > end {
                return false;
            }
        }
        true
    }
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path, then apply environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config: Config = if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            // Use embedded default config
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")?
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("UNLOCKS_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Some(port) = std::env::var("UNLOCKS_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.server.port = port;
        }
        if let Ok(path) = std::env::var("DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = PathBuf::from(path);
            }
        }
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.unlocks.max_attempts == 0 {
            bail!("unlocks.max_attempts must be at least 1");
        }
        if self.unlocks.item_types.is_empty() {
            bail!("unlocks.item_types must name at least one item type");
        }
        for tag in &self.unlocks.item_types {
            if ItemKind::from_tag(tag).is_none() {
                bail!("Unknown item type in unlocks.item_types: {}", tag);
            }
        }
        if let (Some(start), Some(end)) = (self.competition.start, self.competition.end) {
            if end <= start {
                bail!("competition.end must be after competition.start");
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        // The embedded default config ships with the crate; the fallback only
        // guards against an edited config.toml that no longer parses.
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig::default(),
            competition: CompetitionConfig::default(),
            unlocks: UnlocksConfig::default(),
        })
    }
}
