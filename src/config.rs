//! TOML configuration file for the CLI.
//!
//! Every field is optional; absent fields fall back to the engine defaults.
//! Durations are plain integers (seconds, or milliseconds where the field
//! name says so) to keep hand-edited files simple.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::EngineConfig;
use crate::error::EngineError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub data_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub job_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_base_secs: Option<u64>,
    pub rebuild_interval_secs: Option<u64>,
    pub slow_query_warn_ms: Option<u64>,
}

impl ConfigFile {
    /// Parse a config file. A missing file is not an error — it yields the
    /// defaults, so a bare `larder` invocation works out of the box.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| EngineError::InvalidConfig {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        toml::from_str(&raw).map_err(|e| EngineError::InvalidConfig {
            message: format!("cannot parse {}: {e}", path.display()),
        })
    }

    /// Write the file back out (used by `larder init`).
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let raw = toml::to_string_pretty(self).map_err(|e| EngineError::InvalidConfig {
            message: format!("cannot serialize config: {e}"),
        })?;
        std::fs::write(path, raw).map_err(|e| EngineError::InvalidConfig {
            message: format!("cannot write {}: {e}", path.display()),
        })
    }

    /// Merge the file over the engine defaults.
    pub fn into_engine_config(self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            data_dir: self.data_dir,
            workers: self.workers.unwrap_or(defaults.workers),
            job_timeout: self
                .job_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            retry_base: self
                .retry_base_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_base),
            rebuild_interval: self.rebuild_interval_secs.map(Duration::from_secs),
            slow_query_warn: self
                .slow_query_warn_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.slow_query_warn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConfigFile::load(&dir.path().join("absent.toml")).unwrap();
        let engine = cfg.into_engine_config();
        assert_eq!(engine.workers, 4);
        assert_eq!(engine.job_timeout, Duration::from_secs(20));
        assert!(engine.rebuild_interval.is_none());
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("larder.toml");
        std::fs::write(&path, "workers = 2\nrebuild_interval_secs = 600\n").unwrap();

        let engine = ConfigFile::load(&path).unwrap().into_engine_config();
        assert_eq!(engine.workers, 2);
        assert_eq!(engine.rebuild_interval, Some(Duration::from_secs(600)));
        assert_eq!(engine.max_attempts, 3);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("larder.toml");
        std::fs::write(&path, "wrokers = 2\n").unwrap();
        assert!(ConfigFile::load(&path).is_err());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("larder.toml");
        let cfg = ConfigFile {
            data_dir: Some(PathBuf::from("/var/lib/larder")),
            workers: Some(8),
            ..Default::default()
        };
        cfg.save(&path).unwrap();
        let loaded = ConfigFile::load(&path).unwrap();
        assert_eq!(loaded.workers, Some(8));
        assert_eq!(loaded.data_dir, cfg.data_dir);
    }
}
