use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::driver_config::{DriverConfig, TimerConfig};
use super::engine_config::EngineConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error reading config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("config file already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("could not determine the config directory")]
    NoConfigDir,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to a file in the data directory
    #[serde(default)]
    pub file: bool,
}

/// Settings for one host run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub timers: TimerConfig,

    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Platform config location, e.g. `~/.config/tickjs/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tickjs").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load an explicitly named config file; a missing file is an error
    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigLoadError::NotFound(path.to_path_buf())
            } else {
                ConfigLoadError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(target: "host", "Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the platform config file if there is one, defaults otherwise
    pub fn load_or_default() -> Result<Self, ConfigLoadError> {
        match Self::default_path() {
            Some(path) => match Self::load_from(&path) {
                Err(ConfigLoadError::NotFound(_)) => Ok(Self::default()),
                other => other,
            },
            None => Ok(Self::default()),
        }
    }

    /// Write this config to `path`, never overwriting an existing file
    pub fn write_new(&self, path: &Path) -> Result<(), ConfigLoadError> {
        if path.exists() {
            return Err(ConfigLoadError::AlreadyExists(path.to_path_buf()));
        }

        let io_err = |source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_err)?;
        info!(target: "host", "Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EvalMode, IdleStrategy};

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[engine]
eval_mode = "script"

[driver]
idle = "busy-poll"
"#,
        )
        .unwrap();

        let config = RuntimeConfig::load_from(&path).unwrap();
        assert_eq!(config.engine.eval_mode, EvalMode::Script);
        assert_eq!(config.driver.idle, IdleStrategy::BusyPoll);
        assert_eq!(config.driver.max_block_ms, 50);
        assert_eq!(config.timers.max_live_timers, 65536);
        assert!(!config.logging.file);
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigLoadError::NotFound(_)));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[driver]\nidle = \"sometimes\"\n").unwrap();
        let err = RuntimeConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse { .. }));
    }

    #[test]
    fn test_write_new_round_trip_and_no_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = RuntimeConfig::default();
        config.driver.max_cycles = 7;

        config.write_new(&path).unwrap();
        assert_eq!(RuntimeConfig::load_from(&path).unwrap(), config);

        let err = RuntimeConfig::default().write_new(&path).unwrap_err();
        assert!(matches!(err, ConfigLoadError::AlreadyExists(_)));
    }
}
