//! Configuration validation

use crate::schema::RawConfig;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero (got {value})")]
    NotPositive { field: &'static str, value: i64 },

    #[error("preshow_minutes ({preshow}) must be less than countdown_minutes ({countdown})")]
    PreshowExceedsCountdown { preshow: i64, countdown: i64 },

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let t = &config.tracking;

    let signed = [
        ("tracking.preshow_minutes", t.preshow_minutes),
        ("tracking.countdown_minutes", t.countdown_minutes),
        ("tracking.grace_minutes", t.grace_minutes),
        ("tracking.lookahead_days", t.lookahead_days),
        ("tracking.missed_lookback_days", t.missed_lookback_days),
        ("tracking.virtual_session_minutes", t.virtual_session_minutes),
    ];
    for (field, value) in signed {
        if let Some(value) = value
            && value <= 0
        {
            errors.push(ValidationError::NotPositive { field, value });
        }
    }

    let unsigned = [
        ("tracking.tick_ms", t.tick_ms),
        ("service.store_timeout_ms", config.service.store_timeout_ms),
        ("tracking.default_makeup_minutes", t.default_makeup_minutes.map(u64::from)),
        ("tracking.snapshot_buffer", t.snapshot_buffer.map(|v| v as u64)),
        ("tracking.subscriber_buffer", t.subscriber_buffer.map(|v| v as u64)),
    ];
    for (field, value) in unsigned {
        if value == Some(0) {
            errors.push(ValidationError::NotPositive { field, value: 0 });
        }
    }

    let preshow = t.preshow_minutes.unwrap_or(crate::DEFAULT_PRESHOW_MINUTES);
    let countdown = t.countdown_minutes.unwrap_or(crate::DEFAULT_COUNTDOWN_MINUTES);
    if preshow > 0 && countdown > 0 && preshow >= countdown {
        errors.push(ValidationError::PreshowExceedsCountdown { preshow, countdown });
    }

    if let Some(path) = &config.service.socket_path
        && path.as_os_str().is_empty()
    {
        errors.push(ValidationError::GlobalError("service.socket_path is empty".into()));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RawServiceConfig, RawTrackingConfig};

    fn raw(tracking: RawTrackingConfig) -> RawConfig {
        RawConfig {
            config_version: 1,
            service: RawServiceConfig::default(),
            tracking,
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&raw(RawTrackingConfig::default())).is_empty());
    }

    #[test]
    fn zero_tick_rejected() {
        let errors = validate_config(&raw(RawTrackingConfig {
            tick_ms: Some(0),
            ..Default::default()
        }));
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            ValidationError::NotPositive { field: "tracking.tick_ms", .. }
        ));
    }

    #[test]
    fn negative_grace_rejected() {
        let errors = validate_config(&raw(RawTrackingConfig {
            grace_minutes: Some(-5),
            ..Default::default()
        }));
        assert!(matches!(
            errors[0],
            ValidationError::NotPositive { value: -5, .. }
        ));
    }

    #[test]
    fn preshow_must_precede_countdown() {
        let errors = validate_config(&raw(RawTrackingConfig {
            preshow_minutes: Some(30),
            countdown_minutes: Some(10),
            ..Default::default()
        }));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::PreshowExceedsCountdown { .. })));
    }
}
