//! Path utilities for parley
//!
//! Handles XDG Base Directory specification compliance for config and
//! log directories.

use std::path::PathBuf;

use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "parley";

/// Get project directories (cached)
fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the runtime directory
///
/// Location: `$XDG_RUNTIME_DIR/parley` or `/tmp/parley-$UID`
pub fn runtime_dir() -> PathBuf {
    if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg_runtime).join(APP_NAME)
    } else {
        // Fallback to /tmp with UID for security
        // SAFETY: getuid() is always safe to call
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
    }
}

/// Get the configuration directory
///
/// Location: `$XDG_CONFIG_HOME/parley` or `~/.config/parley`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| runtime_dir().join("config"))
}

/// Get the main configuration file path
///
/// Location: `$XDG_CONFIG_HOME/parley/config.toml`
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the log directory
///
/// Location: `$XDG_STATE_HOME/parley/logs` or `~/.local/state/parley/logs`
pub fn log_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| runtime_dir().join("state"))
        .join("logs")
}
