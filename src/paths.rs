//! Centralized filesystem paths for the daemon.
//!
//! All paths live under the user's `~/.claude/` directory by default, per
//! the wire contract in spec.md §6. Override the whole tree for testing or
//! custom deployments with the `TTS_DAEMON_HOME` environment variable.

use std::path::PathBuf;

/// Root directory for all daemon state.
///
/// Resolves to `~/.claude/` by default. Override with `TTS_DAEMON_HOME`.
#[must_use]
pub fn home_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TTS_DAEMON_HOME") {
        return PathBuf::from(override_dir);
    }
    dirs::home_dir()
        .map(|d| d.join(".claude"))
        .unwrap_or_else(|| PathBuf::from("/tmp/.claude"))
}

/// Local socket path: `~/.claude/tts.sock`.
#[must_use]
pub fn socket_path() -> PathBuf {
    home_dir().join("tts.sock")
}

/// PID marker path: `~/.claude/tts_daemon.pid`.
#[must_use]
pub fn pid_path() -> PathBuf {
    home_dir().join("tts_daemon.pid")
}

/// Log file path: `~/.claude/tts_daemon.log`.
#[must_use]
pub fn log_path() -> PathBuf {
    home_dir().join("tts_daemon.log")
}

/// Cache directory: `~/.claude/tts_cache/`.
#[must_use]
pub fn cache_dir() -> PathBuf {
    home_dir().join("tts_cache")
}

/// Configuration document path: `~/.claude/tts_config.json`.
#[must_use]
pub fn config_path() -> PathBuf {
    home_dir().join("tts_config.json")
}
