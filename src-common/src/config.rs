//! Configuration persistence for micrelay clients.
//!
//! This module handles loading and saving client configuration to a JSON file
//! in the user's configuration directory. It is shared between the CLI and
//! the client library so both read the same settings.

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::types::{CaptureConfig, ConfigError};

/// Environment variable overriding the configured daemon URL.
pub const DAEMON_URL_ENV: &str = "MICRELAY_DAEMON_URL";

/// Keys accepted by [`ClientConfig::get_value`] and [`ClientConfig::set_value`].
pub const CONFIG_KEYS: &[&str] = &[
    "daemon_url",
    "sample_rate",
    "channel_count",
    "bytes_per_sample",
    "seconds_per_chunk",
    "device_id",
    "reconnect_delay_ms",
    "liveness_timeout_ms",
    "ping_interval_ms",
    "connect_timeout_ms",
    "recorder_command",
];

/// Client configuration that persists across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the capture daemon
    #[serde(default = "crate::default_daemon_url")]
    pub daemon_url: String,
    /// Capture format requested from whichever backend is active
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Delay before reconnecting after the daemon connection drops
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Silence window after a liveness probe before the connection is declared dead
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    /// Interval between liveness probes
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Upper bound on a single connection attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Recorder used by the local fallback capture path (format arguments are appended)
    #[serde(default = "default_recorder_command")]
    pub recorder_command: Vec<String>,
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_liveness_timeout_ms() -> u64 {
    2000
}

fn default_ping_interval_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_recorder_command() -> Vec<String> {
    vec!["arecord".to_string(), "-q".to_string()]
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            daemon_url: crate::default_daemon_url(),
            capture: CaptureConfig::default(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            recorder_command: default_recorder_command(),
        }
    }
}

impl ClientConfig {
    /// Get the path to the configuration file.
    ///
    /// Returns platform-specific path:
    /// - Linux: ~/.config/micrelay/client.json
    /// - macOS: ~/Library/Application Support/micrelay/client.json
    /// - Windows: %APPDATA%\micrelay\client.json
    pub fn config_path() -> PathBuf {
        BaseDirs::new()
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("micrelay")
            .join("client.json")
    }

    /// Load configuration from the default location.
    ///
    /// `MICRELAY_DAEMON_URL` overrides the stored daemon URL.
    pub fn load() -> Self {
        let mut config = Self::load_from(&Self::config_path());
        if let Ok(url) = std::env::var(DAEMON_URL_ENV) {
            if !url.is_empty() {
                config.daemon_url = url;
            }
        }
        config
    }

    /// Load configuration from a specific file.
    ///
    /// Returns the default configuration if the file doesn't exist or can't be
    /// parsed.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            debug!("No client config at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}: {}, using defaults",
                        path, e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read config file {:?}: {}, using defaults", path, e);
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

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;

        Ok(())
    }

    /// Read a single value by key, rendered as a string.
    pub fn get_value(&self, key: &str) -> Result<String, ConfigError> {
        let value = match key {
            "daemon_url" => self.daemon_url.clone(),
            "sample_rate" => self.capture.sample_rate.to_string(),
            "channel_count" => self.capture.channel_count.to_string(),
            "bytes_per_sample" => self.capture.bytes_per_sample.to_string(),
            "seconds_per_chunk" => self.capture.seconds_per_chunk.to_string(),
            "device_id" => self.capture.device_id.clone().unwrap_or_default(),
            "reconnect_delay_ms" => self.reconnect_delay_ms.to_string(),
            "liveness_timeout_ms" => self.liveness_timeout_ms.to_string(),
            "ping_interval_ms" => self.ping_interval_ms.to_string(),
            "connect_timeout_ms" => self.connect_timeout_ms.to_string(),
            "recorder_command" => self.recorder_command.join(" "),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        };
        Ok(value)
    }

    /// Set a single value by key from its string form.
    ///
    /// Capture fields are validated as a whole after the change; the config is
    /// left untouched on error.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut next = self.clone();
        match key {
            "daemon_url" => next.daemon_url = value.to_string(),
            "sample_rate" => next.capture.sample_rate = parse_number(key, value)?,
            "channel_count" => next.capture.channel_count = parse_number(key, value)?,
            "bytes_per_sample" => next.capture.bytes_per_sample = parse_number(key, value)?,
            "seconds_per_chunk" => next.capture.seconds_per_chunk = parse_number(key, value)?,
            "device_id" => {
                next.capture.device_id = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "reconnect_delay_ms" => next.reconnect_delay_ms = parse_number(key, value)?,
            "liveness_timeout_ms" => next.liveness_timeout_ms = parse_number(key, value)?,
            "ping_interval_ms" => next.ping_interval_ms = parse_number(key, value)?,
            "connect_timeout_ms" => next.connect_timeout_ms = parse_number(key, value)?,
            "recorder_command" => {
                let parts: Vec<String> = value.split_whitespace().map(str::to_string).collect();
                if parts.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: "command cannot be empty".to_string(),
                    });
                }
                next.recorder_command = parts;
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        next.capture.validate()?;
        *self = next;
        Ok(())
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.daemon_url, "ws://127.0.0.1:8890/");
        assert_eq!(config.reconnect_delay_ms, 3000);
        assert_eq!(config.liveness_timeout_ms, 2000);
        assert_eq!(config.capture, CaptureConfig::default());
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"daemon_url": "ws://10.0.0.5:8890/"}"#).unwrap();
        assert_eq!(config.daemon_url, "ws://10.0.0.5:8890/");
        assert_eq!(config.ping_interval_ms, 5000);
        assert_eq!(config.recorder_command, vec!["arecord", "-q"]);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client.json");

        let mut config = ClientConfig::default();
        config.capture.sample_rate = 44_100;
        config.reconnect_delay_ms = 500;
        config.save_to(&path).unwrap();

        let loaded = ClientConfig::load_from(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unparseable_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, "{ nope").unwrap();

        let log = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(log.clone())
            .with_ansi(false)
            .finish();
        let loaded = tracing::subscriber::with_default(subscriber, || ClientConfig::load_from(&path));

        assert_eq!(loaded, ClientConfig::default());
        let output = log.contents();
        assert!(output.contains("WARN"), "log was: {}", output);
        assert!(output.contains("Failed to parse config file"), "log was: {}", output);
    }

    #[test]
    fn test_unreadable_path_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ClientConfig::load_from(dir.path()), ClientConfig::default());
    }

    #[test]
    fn test_set_and_get_values() {
        let mut config = ClientConfig::default();
        config.set_value("sample_rate", "48000").unwrap();
        config.set_value("device_id", "hw:2,0").unwrap();
        config.set_value("recorder_command", "parecord --raw").unwrap();

        assert_eq!(config.get_value("sample_rate").unwrap(), "48000");
        assert_eq!(config.get_value("device_id").unwrap(), "hw:2,0");
        assert_eq!(config.recorder_command, vec!["parecord", "--raw"]);
    }

    #[test]
    fn test_set_value_rejects_invalid() {
        let mut config = ClientConfig::default();
        assert!(matches!(
            config.set_value("bytes_per_sample", "3"),
            Err(ConfigError::BytesPerSample(3))
        ));
        assert!(matches!(
            config.set_value("sample_rate", "fast"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.set_value("volume", "11"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_every_listed_key_is_readable() {
        let config = ClientConfig::default();
        for key in CONFIG_KEYS {
            assert!(config.get_value(key).is_ok(), "key {} not readable", key);
        }
    }
}
