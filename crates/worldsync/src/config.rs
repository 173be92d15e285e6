use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub const RETENTION_ENV_VAR: &str = "WORLDSYNC_WAYPOINT_RETENTION_MS";
pub const STALE_WINDOW_ENV_VAR: &str = "WORLDSYNC_STALE_WINDOW_MS";
pub const PLACEMENT_QUIET_ENV_VAR: &str = "WORLDSYNC_PLACEMENT_QUIET_MS";
pub const CLEAR_QUIET_ENV_VAR: &str = "WORLDSYNC_CLEAR_QUIET_MS";
pub const MIN_TWEEN_ENV_VAR: &str = "WORLDSYNC_MIN_TWEEN_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Waypoints older than the watermark minus this window are cleared.
    pub waypoint_retention: Duration,
    /// Incoming waypoints older than `now` minus this window are dropped.
    pub stale_waypoint_window: Duration,
    pub placement_quiet_period: Duration,
    pub clear_quiet_period: Duration,
    pub min_tween_duration: Duration,
    pub max_commands_per_drain: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            waypoint_retention: Duration::from_secs(5),
            stale_waypoint_window: Duration::from_secs(5),
            placement_quiet_period: Duration::from_secs(5),
            clear_quiet_period: Duration::from_secs(5),
            min_tween_duration: Duration::from_millis(1_000),
            max_commands_per_drain: 1_024,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var} (expected milliseconds as u64)")]
    InvalidMillis { var: &'static str, value: String },
    #[error("{var} must be greater than zero")]
    ZeroDuration { var: &'static str },
}

impl SyncConfig {
    /// Defaults with any `WORLDSYNC_*_MS` overrides applied. Bad values are
    /// logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let overrides: [(&'static str, &mut Duration); 5] = [
            (RETENTION_ENV_VAR, &mut config.waypoint_retention),
            (STALE_WINDOW_ENV_VAR, &mut config.stale_waypoint_window),
            (PLACEMENT_QUIET_ENV_VAR, &mut config.placement_quiet_period),
            (CLEAR_QUIET_ENV_VAR, &mut config.clear_quiet_period),
            (MIN_TWEEN_ENV_VAR, &mut config.min_tween_duration),
        ];
        for (var, slot) in overrides {
            let Some(raw) = lookup(var) else {
                continue;
            };
            match parse_millis_override(var, &raw) {
                Ok(value) => *slot = value,
                Err(error) => {
                    warn!(env_var = var, error = %error, "ignoring sync config override");
                }
            }
        }
        config
    }
}

pub fn parse_millis_override(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let millis = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidMillis {
            var,
            value: raw.to_string(),
        })?;
    if millis == 0 {
        return Err(ConfigError::ZeroDuration { var });
    }
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_five_second_windows() {
        let config = SyncConfig::default();
        assert_eq!(config.waypoint_retention, Duration::from_secs(5));
        assert_eq!(config.stale_waypoint_window, Duration::from_secs(5));
        assert_eq!(config.placement_quiet_period, Duration::from_secs(5));
        assert_eq!(config.clear_quiet_period, Duration::from_secs(5));
        assert_eq!(config.min_tween_duration, Duration::from_millis(1_000));
    }

    #[test]
    fn lookup_overrides_valid_values_and_skips_bad_ones() {
        let vars: HashMap<&str, &str> = [
            (RETENTION_ENV_VAR, "2500"),
            (STALE_WINDOW_ENV_VAR, "soon"),
            (MIN_TWEEN_ENV_VAR, "0"),
        ]
        .into_iter()
        .collect();

        let config = SyncConfig::from_lookup(|var| vars.get(var).map(|value| value.to_string()));

        assert_eq!(config.waypoint_retention, Duration::from_millis(2_500));
        assert_eq!(config.stale_waypoint_window, Duration::from_secs(5));
        assert_eq!(config.min_tween_duration, Duration::from_millis(1_000));
    }

    #[test]
    fn parse_reports_the_offending_variable() {
        assert_eq!(
            parse_millis_override(CLEAR_QUIET_ENV_VAR, "x").expect_err("invalid"),
            ConfigError::InvalidMillis {
                var: CLEAR_QUIET_ENV_VAR,
                value: "x".to_string(),
            }
        );
    }
}
