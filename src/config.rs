use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{llog_debug, Error, Result};

fn default_max_agents() -> usize {
    4
}

fn default_depth_weight() -> f64 {
    2.0
}

fn default_deadline_horizon_hours() -> u64 {
    48
}

fn default_deadline_boost() -> f64 {
    5.0
}

fn default_status_channel_capacity() -> usize {
    256
}

fn default_promote_sweep_secs() -> u64 {
    1
}

fn default_resource_sweep_secs() -> u64 {
    5
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Engine configuration, loaded from `<data_dir>/lattice.toml`.
///
/// Every field has a default so a missing config file yields a
/// fully usable engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Override for the data directory (defaults to `~/.lattice`).
    pub data_dir: Option<String>,
    /// Maximum number of concurrently dispatched tasks.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    /// Priority boost per level of dependency depth.
    #[serde(default = "default_depth_weight")]
    pub depth_weight: f64,
    /// Hours before a deadline within which urgency ramps up.
    #[serde(default = "default_deadline_horizon_hours")]
    pub deadline_horizon_hours: u64,
    /// Maximum priority boost for an imminent or overdue deadline.
    #[serde(default = "default_deadline_boost")]
    pub deadline_boost: f64,
    /// Capacity of the bounded status-update channel.
    #[serde(default = "default_status_channel_capacity")]
    pub status_channel_capacity: usize,
    /// Seconds between pending-promotion sweeps.
    #[serde(default = "default_promote_sweep_secs")]
    pub promote_sweep_secs: u64,
    /// Seconds between resource-monitor sweeps.
    #[serde(default = "default_resource_sweep_secs")]
    pub resource_sweep_secs: u64,
    /// Seconds to wait for loops to drain during shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_agents: default_max_agents(),
            depth_weight: default_depth_weight(),
            deadline_horizon_hours: default_deadline_horizon_hours(),
            deadline_boost: default_deadline_boost(),
            status_channel_capacity: default_status_channel_capacity(),
            promote_sweep_secs: default_promote_sweep_secs(),
            resource_sweep_secs: default_resource_sweep_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl EngineConfig {
    /// Resolve the data directory for the engine.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".lattice")),
        }
    }

    /// Path to the config file inside the data directory.
    pub fn config_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("lattice.toml"))
    }

    /// Path to the SQLite database file.
    pub fn db_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("tasks.db"))
    }

    /// Path to the append-only prune archive log.
    pub fn archive_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("archive.jsonl"))
    }

    pub fn promote_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.promote_sweep_secs.max(1))
    }

    pub fn resource_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.resource_sweep_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Load the config from disk, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let default = Self::default();
        let path = default.config_path()?;
        llog_debug!("EngineConfig::load path={}", path.display());
        if !path.exists() {
            llog_debug!("Config file not found, using defaults");
            return Ok(default);
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        llog_debug!(
            "Config loaded: max_agents={}, depth_weight={}",
            config.max_agents,
            config.depth_weight
        );
        Ok(config)
    }

    /// Save the config, creating the data directory if needed.
    pub fn save(&self) -> Result<()> {
        let dir = self.data_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = self.config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        llog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Ensure the data directory exists.
    pub fn ensure_dirs(&self) -> Result<()> {
        let dir = self.data_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_agents, 4);
        assert_eq!(config.depth_weight, 2.0);
        assert_eq!(config.status_channel_capacity, 256);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
    }

    #[test]
    fn test_sweep_intervals_never_zero() {
        let config = EngineConfig {
            promote_sweep_secs: 0,
            resource_sweep_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.promote_sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.resource_sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_data_dir_override() {
        let config = EngineConfig {
            data_dir: Some("/tmp/lattice-test".to_string()),
            ..Default::default()
        };
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/lattice-test"));
        assert!(config
            .db_path()
            .unwrap()
            .ends_with("lattice-test/tasks.db"));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/foo/bar");
        assert!(expanded.ends_with("foo/bar"));
        assert!(!expanded.to_string_lossy().contains('~'));

        let absolute = expand_tilde("/absolute/path");
        assert_eq!(absolute, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str("max_agents = 8").unwrap();
        assert_eq!(config.max_agents, 8);
        assert_eq!(config.depth_weight, 2.0);
        assert_eq!(config.promote_sweep_secs, 1);
    }
}
