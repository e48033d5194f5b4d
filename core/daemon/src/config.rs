//! Daemon configuration.
//!
//! Optional TOML file at `~/.repowatch/daemon.toml`. A missing file means
//! defaults; a malformed file is reported and the daemon falls back to safe
//! defaults rather than refusing to start.

use fs_err as fs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use repowatch_core::PrimerConfig;

const CONFIG_RELATIVE_PATH: &str = ".repowatch/daemon.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub primer: PrimerSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrimerSection {
    #[serde(default = "default_quiescence_secs")]
    pub quiescence_secs: u64,
    #[serde(default = "default_increment_secs")]
    pub increment_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for PrimerSection {
    fn default() -> Self {
        Self {
            quiescence_secs: default_quiescence_secs(),
            increment_secs: default_increment_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_quiescence_secs() -> u64 {
    60
}

fn default_increment_secs() -> u64 {
    5
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl DaemonConfig {
    pub fn primer_config(&self) -> PrimerConfig {
        PrimerConfig {
            quiescence: Duration::from_secs(self.primer.quiescence_secs),
            increment: Duration::from_secs(self.primer.increment_secs),
            poll_interval: Duration::from_secs(self.primer.poll_interval_secs),
        }
    }
}

pub fn load_daemon_config() -> DaemonConfig {
    let path = match config_path() {
        Some(path) => path,
        None => {
            tracing::warn!("Home directory not found; using default daemon config");
            return DaemonConfig::default();
        }
    };
    load_from_path(&path).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Failed to load daemon config; using defaults");
        DaemonConfig::default()
    })
}

fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_RELATIVE_PATH))
}

fn load_from_path(path: &Path) -> Result<DaemonConfig, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(DaemonConfig::default())
        }
        Err(err) => return Err(format!("Failed to read daemon config: {}", err)),
    };
    toml::from_str(&raw).map_err(|err| format!("Failed to parse daemon config: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_baseline_debounce() {
        let config = DaemonConfig::default().primer_config();
        assert_eq!(config.quiescence, Duration::from_secs(60));
        assert_eq!(config.increment, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn partial_config_keeps_unset_defaults() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [primer]
            quiescence_secs = 10
            "#,
        )
        .expect("parses");
        assert_eq!(config.primer.quiescence_secs, 10);
        assert_eq!(config.primer.increment_secs, 5);
        assert_eq!(config.primer.poll_interval_secs, 5);
    }

    #[test]
    fn empty_config_is_valid() {
        let config: DaemonConfig = toml::from_str("").expect("parses");
        assert_eq!(config.primer.quiescence_secs, 60);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let config = load_from_path(&dir.path().join("daemon.toml")).expect("defaults");
        assert_eq!(config.primer.increment_secs, 5);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("daemon.toml");
        std::fs::write(&path, "primer = \"oops\"").expect("write");
        assert!(load_from_path(&path).is_err());
    }
}
