//! Configuration validation

use crate::schema::RawConfig;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Invalid thresholds: {0}")]
    InvalidThresholds(String),

    #[error("Invalid hour for {field}: {value} (must be 0-23)")]
    InvalidHour { field: &'static str, value: u8 },

    #[error("call_min_seconds {min}s must be below long_call_seconds {long}s")]
    InvalidCallBounds { min: u64, long: u64 },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("Shield '{domain}': {message}")]
    DomainError { domain: &'static str, message: String },

    #[error("Duplicate contact ID: {0}")]
    DuplicateContactId(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(thresholds) = &config.escalation.thresholds_minutes {
        errors.extend(validate_thresholds(thresholds));
    }

    for (field, hour) in [
        ("night_start_hour", config.escalation.night_start_hour),
        ("night_end_hour", config.escalation.night_end_hour),
    ] {
        if let Some(value) = hour
            && value >= 24
        {
            errors.push(ValidationError::InvalidHour { field, value });
        }
    }

    errors.extend(validate_verification(config));

    if config.classifier.timeout_seconds == Some(0) {
        errors.push(ValidationError::ZeroValue("classifier.timeout_seconds"));
    }
    if let Some(endpoint) = &config.classifier.endpoint
        && !(endpoint.starts_with("https://") || endpoint.starts_with("http://"))
    {
        errors.push(ValidationError::GlobalError(format!(
            "classifier.endpoint must be an http(s) URL, got '{}'",
            endpoint
        )));
    }

    let budget = &config.shields.daily_budget;
    if budget.enabled {
        match budget.budget_minutes {
            None => errors.push(ValidationError::DomainError {
                domain: "daily_budget",
                message: "enabled without budget_minutes".into(),
            }),
            Some(0) => errors.push(ValidationError::DomainError {
                domain: "daily_budget",
                message: "budget_minutes must be greater than zero".into(),
            }),
            Some(_) => {}
        }
    }

    let mut seen_ids = HashSet::new();
    for contact in &config.contacts {
        if contact.id.is_empty() {
            errors.push(ValidationError::GlobalError(
                "contact id cannot be empty".into(),
            ));
        } else if !seen_ids.insert(&contact.id) {
            errors.push(ValidationError::DuplicateContactId(contact.id.clone()));
        }
    }

    errors
}

fn validate_thresholds(thresholds: &[u32]) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if thresholds.is_empty() {
        errors.push(ValidationError::InvalidThresholds(
            "at least one threshold is required".into(),
        ));
    }
    if thresholds.len() > u8::MAX as usize {
        errors.push(ValidationError::InvalidThresholds(format!(
            "at most {} thresholds are supported",
            u8::MAX
        )));
    }
    if thresholds.contains(&0) {
        errors.push(ValidationError::InvalidThresholds(
            "thresholds must be greater than zero".into(),
        ));
    }
    for pair in thresholds.windows(2) {
        if pair[1] <= pair[0] {
            errors.push(ValidationError::InvalidThresholds(format!(
                "{} is not greater than {}",
                pair[1], pair[0]
            )));
        }
    }

    errors
}

fn validate_verification(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let v = &config.verification;

    let min = v.call_min_seconds.unwrap_or(crate::DEFAULT_CALL_MIN_SECONDS);
    let long = v.long_call_seconds.unwrap_or(crate::DEFAULT_LONG_CALL_SECONDS);
    if min >= long {
        errors.push(ValidationError::InvalidCallBounds { min, long });
    }

    for (field, value) in [
        ("verification.call_watch_seconds", v.call_watch_seconds),
        ("verification.call_max_seconds", v.call_max_seconds),
        (
            "verification.messaging_threshold_seconds",
            v.messaging_threshold_seconds,
        ),
        (
            "verification.messaging_window_seconds",
            v.messaging_window_seconds,
        ),
    ] {
        if value == Some(0) {
            errors.push(ValidationError::ZeroValue(field));
        }
    }

    if let (Some(threshold), Some(window)) =
        (v.messaging_threshold_seconds, v.messaging_window_seconds)
        && threshold > window
    {
        errors.push(ValidationError::GlobalError(format!(
            "messaging threshold {}s exceeds its window {}s",
            threshold, window
        )));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawConfig {
        RawConfig {
            config_version: 1,
            ..Default::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&raw()).is_empty());
    }

    #[test]
    fn rejects_non_increasing_thresholds() {
        let mut config = raw();
        config.escalation.thresholds_minutes = Some(vec![5, 15, 15, 10]);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ValidationError::InvalidThresholds(_))));
    }

    #[test]
    fn rejects_zero_threshold() {
        let mut config = raw();
        config.escalation.thresholds_minutes = Some(vec![0, 5]);
        assert!(!validate_config(&config).is_empty());
    }

    #[test]
    fn rejects_bad_hours() {
        let mut config = raw();
        config.escalation.night_start_hour = Some(24);
        config.escalation.night_end_hour = Some(6);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            ValidationError::InvalidHour {
                field: "night_start_hour",
                value: 24
            }
        ));
    }

    #[test]
    fn rejects_inverted_call_bounds() {
        let mut config = raw();
        config.verification.call_min_seconds = Some(400);

        let errors = validate_config(&config);
        assert!(matches!(
            errors[0],
            ValidationError::InvalidCallBounds { min: 400, long: 300 }
        ));
    }

    #[test]
    fn budget_requires_minutes() {
        let mut config = raw();
        config.shields.daily_budget.enabled = true;

        let errors = validate_config(&config);
        assert!(matches!(
            errors[0],
            ValidationError::DomainError {
                domain: "daily_budget",
                ..
            }
        ));
    }

    #[test]
    fn zero_unlocks_is_allowed() {
        let mut config = raw();
        config.shields.daily_budget.enabled = true;
        config.shields.daily_budget.budget_minutes = Some(120);
        config.shields.daily_budget.max_unlocks_per_day = Some(0);
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn collects_every_error() {
        let mut config = raw();
        config.escalation.thresholds_minutes = Some(vec![]);
        config.classifier.timeout_seconds = Some(0);
        config.verification.call_watch_seconds = Some(0);

        assert_eq!(validate_config(&config).len(), 3);
    }
}
