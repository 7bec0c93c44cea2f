//! Engine configuration loading and saving.
//!
//! Configuration lives at `~/.switchboard/config.json`; a missing file
//! yields defaults rather than an error.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory scanned for project repositories.
    pub workspace_root: Option<String>,
    /// Seconds between live pane content scans.
    pub scan_interval_secs: u64,
    /// Seconds between full recommendation recomputes.
    pub recommendation_interval_secs: u64,
    /// Seconds between merged-worktree cleanup passes.
    pub cleanup_interval_secs: u64,
    /// Override for the status database path.
    pub db_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            scan_interval_secs: 1,
            recommendation_interval_secs: 5 * 60,
            cleanup_interval_secs: 30 * 60,
            db_path: None,
        }
    }
}

impl EngineConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn recommendation_interval(&self) -> Duration {
        Duration::from_secs(self.recommendation_interval_secs.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// Returns the switchboard state directory (~/.switchboard).
pub fn state_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".switchboard"))
        .ok_or(CoreError::HomeDirNotFound)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("config.json"))
}

/// Default location of the status database, unless overridden in config.
pub fn default_db_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("status.db"))
}

/// Loads the engine configuration, returning defaults if the file doesn't
/// exist. A malformed file is an error so a typo doesn't silently revert
/// every knob to its default.
pub fn load_config() -> Result<EngineConfig> {
    let path = config_path()?;
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(EngineConfig::default())
        }
        Err(err) => {
            return Err(CoreError::Io {
                context: format!("read config {}", path.display()),
                source: err,
            })
        }
    };
    serde_json::from_str(&content).map_err(|err| CoreError::ConfigMalformed {
        path,
        details: err.to_string(),
    })
}

/// Saves the engine configuration to disk, creating the state directory
/// if needed.
pub fn save_config(config: &EngineConfig) -> Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| CoreError::Io {
            context: format!("create state dir {}", parent.display()),
            source: err,
        })?;
    }
    let content = serde_json::to_string_pretty(config).map_err(|err| CoreError::ConfigMalformed {
        path: path.clone(),
        details: err.to_string(),
    })?;
    fs::write(&path, content).map_err(|err| CoreError::Io {
        context: format!("write config {}", path.display()),
        source: err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.scan_interval(), Duration::from_secs(1));
        assert_eq!(config.recommendation_interval(), Duration::from_secs(300));
    }

    #[test]
    fn zero_intervals_clamp_to_one_second() {
        let config = EngineConfig {
            scan_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.scan_interval(), Duration::from_secs(1));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EngineConfig {
            workspace_root: Some("/repos".to_string()),
            scan_interval_secs: 2,
            ..EngineConfig::default()
        };
        let raw = serde_json::to_string(&config).expect("serialize");
        let parsed: EngineConfig = serde_json::from_str(&raw).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let parsed: EngineConfig =
            serde_json::from_str(r#"{"scan_interval_secs": 5}"#).expect("parse");
        assert_eq!(parsed.scan_interval_secs, 5);
        assert_eq!(parsed.recommendation_interval_secs, 300);
    }
}
