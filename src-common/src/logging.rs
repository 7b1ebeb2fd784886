//! Platform-specific logging directory resolution.

use std::path::PathBuf;

/// Returns the platform-appropriate directory for log files.
///
/// | Platform | Directory |
/// |----------|-----------|
/// | Linux | `$XDG_STATE_HOME/micrelay/logs` or `~/.local/state/micrelay/logs` |
/// | macOS | `~/Library/Logs/micrelay` |
/// | Windows | `%LOCALAPPDATA%/micrelay/logs` |
///
/// Falls back to a directory under the system temp dir when no home
/// directory can be determined (e.g. a daemon started by a bare supervisor).
pub fn log_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        match directories::ProjectDirs::from("io", "micrelay", "micrelay") {
            Some(base) => base
                .state_dir()
                .map(|d| d.to_path_buf())
                .unwrap_or_else(|| base.data_local_dir().join("state"))
                .join("logs"),
            None => fallback_log_dir(),
        }
    }

    #[cfg(target_os = "macos")]
    {
        match dirs::home_dir() {
            Some(home) => home.join("Library").join("Logs").join("micrelay"),
            None => fallback_log_dir(),
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        match directories::ProjectDirs::from("io", "micrelay", "micrelay") {
            Some(base) => base.data_local_dir().join("logs"),
            None => fallback_log_dir(),
        }
    }
}

fn fallback_log_dir() -> PathBuf {
    std::env::temp_dir().join("micrelay").join("logs")
}

/// Ensures the log directory exists, creating it if necessary.
pub fn ensure_log_dir() -> Result<PathBuf, std::io::Error> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// File name prefix for the daemon's rolling log files.
pub const DAEMON_LOG_PREFIX: &str = "micrelay-daemon";
