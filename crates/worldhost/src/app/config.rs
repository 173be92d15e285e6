use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;
use worldsync::SyncConfig;

pub(crate) const TPS_ENV_VAR: &str = "WORLDHOST_TPS";
pub(crate) const CLIENTS_ENV_VAR: &str = "WORLDHOST_CLIENTS";
pub(crate) const RUN_MS_ENV_VAR: &str = "WORLDHOST_RUN_MS";
pub(crate) const HEARTBEAT_MS_ENV_VAR: &str = "WORLDHOST_HEARTBEAT_MS";
pub(crate) const SEED_ENV_VAR: &str = "WORLDHOST_SEED";
pub(crate) const SNAPSHOT_ENV_VAR: &str = "WORLDHOST_SNAPSHOT";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HostConfig {
    pub(crate) target_tps: u32,
    pub(crate) max_frame_delta: Duration,
    pub(crate) max_ticks_per_frame: u32,
    pub(crate) metrics_log_interval: Duration,
    /// How often the driving client broadcasts `heartbeat`.
    pub(crate) heartbeat_interval: Duration,
    /// `None` runs until the process is killed.
    pub(crate) run_duration: Option<Duration>,
    pub(crate) client_count: usize,
    pub(crate) seed_path: Option<PathBuf>,
    /// Loaded at startup when present, written back on shutdown.
    pub(crate) snapshot_path: Option<PathBuf>,
    pub(crate) sync: SyncConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            target_tps: 60,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            metrics_log_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(1),
            run_duration: Some(Duration::from_secs(15)),
            client_count: 2,
            seed_path: None,
            snapshot_path: None,
            sync: SyncConfig::default(),
        }
    }
}

impl HostConfig {
    pub(crate) fn from_env() -> Self {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Defaults with overrides from `lookup`. Invalid values are logged and
    /// the default is kept.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self {
            sync: SyncConfig::from_lookup(&lookup),
            ..Self::default()
        };
        if let Some(tps) = parse_override::<u32>(&lookup, TPS_ENV_VAR) {
            config.target_tps = tps.max(1);
        }
        if let Some(clients) = parse_override::<usize>(&lookup, CLIENTS_ENV_VAR) {
            config.client_count = clients.max(1);
        }
        if let Some(millis) = parse_override::<u64>(&lookup, RUN_MS_ENV_VAR) {
            config.run_duration = (millis > 0).then(|| Duration::from_millis(millis));
        }
        if let Some(millis) = parse_override::<u64>(&lookup, HEARTBEAT_MS_ENV_VAR) {
            if millis > 0 {
                config.heartbeat_interval = Duration::from_millis(millis);
            }
        }
        config.seed_path = path_override(&lookup, SEED_ENV_VAR);
        config.snapshot_path = path_override(&lookup, SNAPSHOT_ENV_VAR);
        config
    }

    pub(crate) fn fixed_dt(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_tps.max(1)))
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Option<T> {
    let raw = lookup(var)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                env_var = var,
                value = raw.as_str(),
                "invalid host env var value; falling back to default"
            );
            None
        }
    }
}

fn path_override(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Option<PathBuf> {
    lookup(var)
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(HostConfig::from_lookup(|_| None), HostConfig::default());
    }

    #[test]
    fn overrides_are_applied_and_clamped() {
        let config = HostConfig::from_lookup(lookup_from(&[
            (TPS_ENV_VAR, "0"),
            (CLIENTS_ENV_VAR, "3"),
            (RUN_MS_ENV_VAR, "0"),
            (SEED_ENV_VAR, " world.json "),
            ("WORLDSYNC_MIN_TWEEN_MS", "250"),
        ]));

        assert_eq!(config.target_tps, 1);
        assert_eq!(config.client_count, 3);
        assert_eq!(config.run_duration, None);
        assert_eq!(config.seed_path, Some(PathBuf::from("world.json")));
        assert_eq!(config.sync.min_tween_duration, Duration::from_millis(250));
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = HostConfig::from_lookup(lookup_from(&[
            (TPS_ENV_VAR, "fast"),
            (HEARTBEAT_MS_ENV_VAR, "-5"),
            (SNAPSHOT_ENV_VAR, "  "),
        ]));

        assert_eq!(config.target_tps, 60);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.snapshot_path, None);
    }
}
