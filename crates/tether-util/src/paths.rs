//! Default paths for tether components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/tether/tetherd.sock` or `/tmp/tether-$USER/tetherd.sock`
//! - Data: `$XDG_DATA_HOME/tether` or `~/.local/share/tether`
//! - Config: `$XDG_CONFIG_HOME/tether/config.toml` or `~/.config/tether/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const TETHER_SOCKET_ENV: &str = "TETHER_SOCKET";

/// Environment variable for overriding the data directory
pub const TETHER_DATA_DIR_ENV: &str = "TETHER_DATA_DIR";

const SOCKET_FILENAME: &str = "tetherd.sock";
const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "tether";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$TETHER_SOCKET` environment variable (if set)
/// 2. `$XDG_RUNTIME_DIR/tether/tetherd.sock` (if XDG_RUNTIME_DIR is set)
/// 3. `/tmp/tether-$USER/tetherd.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(TETHER_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Socket path ignoring `$TETHER_SOCKET`, for config defaults where the env
/// var is checked separately.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$TETHER_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/tether` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/tether` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(TETHER_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Data directory ignoring `$TETHER_DATA_DIR`
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share").join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_contains_tether() {
        let path = socket_path_without_env();
        assert!(path.to_string_lossy().contains("tether"));
        assert!(path.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn data_dir_contains_tether() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("tether"));
    }

    #[test]
    fn config_path_is_toml() {
        let path = default_config_path();
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }
}
