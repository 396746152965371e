//! Configuration for starcomm sessions

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::environ::{absolute, EnvOptions};
use crate::error::StarError;

/// Application used to recognise a Starlink tree next to the running executable
const PROBE_APPLICATION: &str = "smurf/makemap";

/// Session configuration, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Starlink installation root; overrides STARLINK_DIR
    #[serde(default)]
    pub install_root: Option<PathBuf>,

    /// Where scratch directories are created (current directory if unset)
    #[serde(default)]
    pub scratch_parent: Option<PathBuf>,

    /// Kill commands that run longer than this many seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Stop applications from prompting for parameters
    #[serde(default = "default_noprompt")]
    pub noprompt: bool,

    /// Override for the container trace program
    #[serde(default)]
    pub trace_command: Option<String>,
}

fn default_noprompt() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            install_root: None,
            scratch_parent: None,
            timeout_secs: None,
            noprompt: default_noprompt(),
            trace_command: None,
        }
    }
}

impl Config {
    /// Default location: `<config dir>/starcomm/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("starcomm").join("config.json"))
    }

    /// Load config from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, StarError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| config_error(path, e))?;
        serde_json::from_str(&content).map_err(|e| config_error(path, e))
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<(), StarError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| config_error(path, e))?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| config_error(path, e))?;
        std::fs::write(path, content).map_err(|e| config_error(path, e))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn env_options(&self) -> EnvOptions {
        EnvOptions {
            noprompt: self.noprompt,
        }
    }

    /// Find the Starlink installation root
    ///
    /// Checked in order: the configured root, `STARLINK_DIR`, and the
    /// directory above the running executable when it sits in a Starlink
    /// `bin` directory. Returns `None` (with a warning) if nothing matches.
    pub fn discover_install_root(&self) -> Option<PathBuf> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        self.discover_with(std::env::var("STARLINK_DIR").ok(), exe_dir)
    }

    fn discover_with(&self, starlink_dir: Option<String>, exe_dir: Option<PathBuf>) -> Option<PathBuf> {
        if let Some(root) = &self.install_root {
            return Some(absolute(root));
        }

        if let Some(dir) = starlink_dir.filter(|d| !d.is_empty()) {
            let root = absolute(Path::new(&dir));
            info!(root = %root.display(), "using STARLINK_DIR");
            return Some(root);
        }

        if let Some(bin) = exe_dir {
            if bin.join(PROBE_APPLICATION).exists() {
                if let Some(root) = bin.parent() {
                    info!(root = %root.display(), "found Starlink next to executable");
                    return Some(root.to_path_buf());
                }
            }
        }

        warn!("no Starlink installation found; set STARLINK_DIR or install_root");
        None
    }
}

fn config_error(path: &Path, err: impl std::fmt::Display) -> StarError {
    StarError::Config {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.noprompt);
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config {
            install_root: Some(PathBuf::from("/star")),
            timeout_secs: Some(30),
            noprompt: false,
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.timeout(), Some(Duration::from_secs(30)));
        assert!(!loaded.env_options().noprompt);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"timeout_secs": 5}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.timeout_secs, Some(5));
        assert!(config.noprompt);
        assert!(config.install_root.is_none());
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(Config::load(&path), Err(StarError::Config { .. })));
    }

    #[test]
    fn test_discovery_order() {
        let configured = Config {
            install_root: Some(PathBuf::from("/opt/star")),
            ..Config::default()
        };
        assert_eq!(
            configured.discover_with(Some("/other".to_string()), None),
            Some(PathBuf::from("/opt/star"))
        );

        let config = Config::default();
        assert_eq!(
            config.discover_with(Some("/usr/local/star".to_string()), None),
            Some(PathBuf::from("/usr/local/star"))
        );
        assert!(config.discover_with(Some(String::new()), None).is_none());
        assert!(config.discover_with(None, None).is_none());
    }

    #[test]
    fn test_discovery_next_to_executable() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(bin.join("smurf")).unwrap();
        std::fs::write(bin.join(PROBE_APPLICATION), "").unwrap();

        let config = Config::default();
        assert_eq!(config.discover_with(None, Some(bin)), Some(dir.path().to_path_buf()));
        assert!(config
            .discover_with(None, Some(dir.path().join("elsewhere")))
            .is_none());
    }
}
