//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub service: RawServiceConfig,

    #[serde(default)]
    pub tracking: RawTrackingConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Directory holding the SQLite database
    pub data_dir: Option<PathBuf>,

    /// Upper bound on how long a store call may wait for the database lock
    pub store_timeout_ms: Option<u64>,
}

/// Tracking loop and display window settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawTrackingConfig {
    pub tick_ms: Option<u64>,

    /// A session is shown this many minutes before it starts
    pub preshow_minutes: Option<i64>,

    /// Countdown flags switch on this many minutes before a start
    pub countdown_minutes: Option<i64>,

    /// How long the last session of a day stays up after it ends
    pub grace_minutes: Option<i64>,

    /// Days ahead of today included in the schedule feed
    pub lookahead_days: Option<i64>,

    /// Days behind today scanned for missed exams
    pub missed_lookback_days: Option<i64>,

    /// Length of the window given to a synthesized makeup session
    pub virtual_session_minutes: Option<i64>,

    /// Makeup duration used when the stored exam has none
    pub default_makeup_minutes: Option<u32>,

    /// Capacity of the tick -> hub snapshot channel
    pub snapshot_buffer: Option<usize>,

    /// Outbound queue length per subscriber before it is dropped
    pub subscriber_buffer: Option<usize>,
}
