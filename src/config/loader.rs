//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::config::schema::FailoverConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides and validate a TOML file.
pub fn load_config(path: &Path) -> Result<FailoverConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: FailoverConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply tunables from the process environment.
pub fn apply_env_overrides(config: &mut FailoverConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply tunables from `lookup`. Unparsable values are logged and ignored.
pub fn apply_overrides_from<F>(config: &mut FailoverConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let cb = &mut config.circuit_breaker;
    override_value(&lookup, "CB_ENABLED", &mut cb.enabled);
    override_value(&lookup, "CB_WINDOW_SECONDS", &mut cb.window_seconds);
    override_value(&lookup, "CB_CONSECUTIVE_FAILS", &mut cb.consecutive_fails);
    override_value(&lookup, "CB_COOLDOWN_SECONDS", &mut cb.cooldown_seconds);
    override_value(&lookup, "CB_HALFOPEN_MAX_CALLS", &mut cb.half_open_max_calls);

    let mut rate = cb.failure_rate;
    override_value(&lookup, "CB_FAILURE_RATE", &mut rate);
    if (0.0..=1.0).contains(&rate) {
        cb.failure_rate = rate;
    } else {
        tracing::warn!(value = rate, fallback = cb.failure_rate, "Ignoring out-of-range CB_FAILURE_RATE");
    }

    let warmup = &mut config.warmup;
    override_value(&lookup, "WARMUP_ENABLED", &mut warmup.enabled);
    override_value(&lookup, "WARMUP_ATTEMPTS", &mut warmup.attempts);
    override_value(&lookup, "WARMUP_TIMEOUT_MS", &mut warmup.timeout_ms);
    override_value(&lookup, "WARMUP_REQUIRED_SUCCESS", &mut warmup.required_success);
    override_value(&lookup, "WARMUP_CONCURRENCY", &mut warmup.concurrency);

    let scheduler = &mut config.scheduler;
    override_value(&lookup, "HEALTH_ALL_INTERVAL_SECS", &mut scheduler.interval_secs);
    override_value(&lookup, "HEALTH_WORKERS", &mut scheduler.workers);
    override_value(&lookup, "HEALTH_ROUND_TIMEOUT_SECS", &mut scheduler.round_timeout_secs);
}

fn override_value<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => *target = v,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring invalid environment override"),
    }
}
