//! Validated configuration structures

use crate::schema::{RawConfig, RawServiceConfig, RawTrackingConfig};
use proctor_util::{data_dir_without_env, socket_path_without_env};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TICK_MS: u64 = 1000;
pub const DEFAULT_PRESHOW_MINUTES: i64 = 5;
pub const DEFAULT_COUNTDOWN_MINUTES: i64 = 30;
pub const DEFAULT_GRACE_MINUTES: i64 = 120;
pub const DEFAULT_LOOKAHEAD_DAYS: i64 = 3;
pub const DEFAULT_MISSED_LOOKBACK_DAYS: i64 = 7;
pub const DEFAULT_VIRTUAL_SESSION_MINUTES: i64 = 120;
pub const DEFAULT_MAKEUP_MINUTES: u32 = 90;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

/// Validated configuration ready for use by the service
#[derive(Debug, Clone, Default)]
pub struct TrackerConfig {
    pub service: ServiceConfig,
    pub tracking: TrackingConfig,
}

impl TrackerConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            tracking: TrackingConfig::from_raw(raw.tracking),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub store_timeout: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw.socket_path.unwrap_or_else(socket_path_without_env),
            data_dir: raw.data_dir.unwrap_or_else(data_dir_without_env),
            store_timeout: Duration::from_millis(
                raw.store_timeout_ms.unwrap_or(DEFAULT_STORE_TIMEOUT_MS),
            ),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Thresholds used to decide which session is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRules {
    pub preshow_minutes: i64,
    pub countdown_minutes: i64,
    pub grace_minutes: i64,
}

impl Default for WindowRules {
    fn default() -> Self {
        Self {
            preshow_minutes: DEFAULT_PRESHOW_MINUTES,
            countdown_minutes: DEFAULT_COUNTDOWN_MINUTES,
            grace_minutes: DEFAULT_GRACE_MINUTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub tick: Duration,
    pub rules: WindowRules,
    pub lookahead_days: i64,
    pub missed_lookback_days: i64,
    pub virtual_session_minutes: i64,
    pub default_makeup_minutes: u32,
    pub snapshot_buffer: usize,
    pub subscriber_buffer: usize,
}

impl TrackingConfig {
    fn from_raw(raw: RawTrackingConfig) -> Self {
        Self {
            tick: Duration::from_millis(raw.tick_ms.unwrap_or(DEFAULT_TICK_MS)),
            rules: WindowRules {
                preshow_minutes: raw.preshow_minutes.unwrap_or(DEFAULT_PRESHOW_MINUTES),
                countdown_minutes: raw.countdown_minutes.unwrap_or(DEFAULT_COUNTDOWN_MINUTES),
                grace_minutes: raw.grace_minutes.unwrap_or(DEFAULT_GRACE_MINUTES),
            },
            lookahead_days: raw.lookahead_days.unwrap_or(DEFAULT_LOOKAHEAD_DAYS),
            missed_lookback_days: raw
                .missed_lookback_days
                .unwrap_or(DEFAULT_MISSED_LOOKBACK_DAYS),
            virtual_session_minutes: raw
                .virtual_session_minutes
                .unwrap_or(DEFAULT_VIRTUAL_SESSION_MINUTES),
            default_makeup_minutes: raw.default_makeup_minutes.unwrap_or(DEFAULT_MAKEUP_MINUTES),
            snapshot_buffer: raw.snapshot_buffer.unwrap_or(16),
            subscriber_buffer: raw.subscriber_buffer.unwrap_or(8),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::from_raw(RawTrackingConfig::default())
    }
}
