//! Default filesystem locations for proctord
//!
//! Everything is user-writable by default:
//! - Socket: `$XDG_RUNTIME_DIR/proctord/proctord.sock` or `/tmp/proctord-$USER/proctord.sock`
//! - Data: `$XDG_DATA_HOME/proctord` or `~/.local/share/proctord`
//! - Config: `$XDG_CONFIG_HOME/proctord/config.toml` or `~/.config/proctord/config.toml`

use std::path::PathBuf;

const SOCKET_FILENAME: &str = "proctord.sock";
const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "proctord";

fn home_subdir(parts: &[&str]) -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    let mut path = PathBuf::from(home);
    for part in parts {
        path.push(part);
    }
    Some(path.join(APP_DIR))
}

/// Socket path ignoring `$PROCTOR_SOCKET`; the CLI applies the env var.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Data directory holding the SQLite database, ignoring `$PROCTOR_DATA_DIR`.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    home_subdir(&[".local", "share"]).unwrap_or_else(|| PathBuf::from("/tmp").join(APP_DIR).join("data"))
}

/// Default configuration file location.
pub fn default_config_path() -> PathBuf {
    let dir = match std::env::var("XDG_CONFIG_HOME") {
        Ok(config_home) => PathBuf::from(config_home).join(APP_DIR),
        Err(_) => home_subdir(&[".config"]).unwrap_or_else(|| PathBuf::from("/etc").join(APP_DIR)),
    };
    dir.join(CONFIG_FILENAME)
}
