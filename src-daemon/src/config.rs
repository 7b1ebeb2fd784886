//! Configuration persistence for the capture daemon.
//!
//! Settings live in `micrelay/daemon.json` under the user's configuration
//! directory. Command-line options are applied on top after loading.

use directories::BaseDirs;
use micrelay_common::{MicConfig, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Daemon configuration that persists across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address the WebSocket listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port of the WebSocket listener
    #[serde(default = "default_port")]
    pub port: u16,
    /// Capture subprocess; must write raw PCM to stdout
    #[serde(default = "default_capture_command")]
    pub capture_command: Vec<String>,
    /// Config reported before any client sets one. Also the native format of
    /// the capture command.
    #[serde(default)]
    pub default_config: MicConfig,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_capture_command() -> Vec<String> {
    ["arecord", "-D", "hw:0,0", "-f", "S16_LE", "-c", "1", "-r", "48000", "-t", "raw"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            capture_command: default_capture_command(),
            default_config: MicConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Get the path to the configuration file.
    ///
    /// Returns platform-specific path:
    /// - Linux: ~/.config/micrelay/daemon.json
    /// - macOS: ~/Library/Application Support/micrelay/daemon.json
    /// - Windows: %APPDATA%\micrelay\daemon.json
    pub fn config_path() -> PathBuf {
        BaseDirs::new()
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("micrelay")
            .join("daemon.json")
    }

    /// Load configuration from the default location.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file.
    ///
    /// Returns the default configuration if the file doesn't exist or can't be
    /// parsed. Errors are logged but don't fail the load.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!("No config file found at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}: {}, using defaults",
                        path, e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read config file {:?}: {}, using defaults",
                    path, e
                );
                Self::default()
            }
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> io::Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)?;
        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// `host:port` string handed to the TCP listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_recorder() {
        let config = DaemonConfig::default();
        assert_eq!(config.port, 8890);
        assert_eq!(config.listen_addr(), "0.0.0.0:8890");
        assert_eq!(config.capture_command[0], "arecord");
        assert!(config.capture_command.contains(&"48000".to_string()));
        assert_eq!(config.default_config, MicConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("daemon.json");

        let config = DaemonConfig {
            bind_address: "127.0.0.1".into(),
            port: 9001,
            capture_command: vec!["cat".into(), "/dev/zero".into()],
            default_config: MicConfig {
                sample_rate: 16_000,
                ..MicConfig::default()
            },
        };
        config.save_to(&path).unwrap();

        assert_eq!(DaemonConfig::load_from(&path), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        fs::write(&path, r#"{ "port": 7000 }"#).unwrap();

        let config = DaemonConfig::load_from(&path);
        assert_eq!(config.port, 7000);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.capture_command, default_capture_command());
    }

    #[test]
    fn test_unreadable_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        fs::write(&path, "port = 7000").unwrap();
        assert_eq!(DaemonConfig::load_from(&path), DaemonConfig::default());

        let missing = dir.path().join("missing.json");
        assert_eq!(DaemonConfig::load_from(&missing), DaemonConfig::default());
    }
}
