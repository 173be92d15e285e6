use tracing::info;
use tracing_subscriber::EnvFilter;
use worldsync::MemoryStore;

use super::seed::{apply_seed, load_seed, parse_seed_json, DEFAULT_SEED};
use super::{HostConfig, HostError};

/// Everything the loop needs, resolved before the first tick.
pub(crate) struct HostWiring {
    pub(crate) config: HostConfig,
    pub(crate) store: MemoryStore,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

pub(crate) fn build_app() -> Result<HostWiring, HostError> {
    init_tracing();
    info!("=== World Host Startup ===");

    build_with_config(HostConfig::from_env())
}

/// Restores the store from the snapshot when one exists, otherwise seeds it.
pub(crate) fn build_with_config(config: HostConfig) -> Result<HostWiring, HostError> {
    if let Some(path) = config.snapshot_path.as_ref().filter(|path| path.exists()) {
        let store = MemoryStore::load_snapshot(path)?;
        return Ok(HostWiring { config, store });
    }

    let seed = match config.seed_path.as_deref() {
        Some(path) => load_seed(path)?,
        None => parse_seed_json(DEFAULT_SEED)?,
    };
    let mut store = MemoryStore::new();
    let actors = apply_seed(&mut store, seed)?;
    info!(
        source = %config
            .seed_path
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "builtin".to_string()),
        actors,
        "store_seeded"
    );
    Ok(HostWiring { config, store })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use worldsync::ActorId;

    use super::*;

    #[test]
    fn builtin_seed_is_used_without_paths() {
        let wiring = build_with_config(HostConfig::default()).expect("wiring");
        assert_eq!(wiring.store.actor_count(), 3);
        assert!(wiring.store.script_by_path("scripts/bob").is_some());
    }

    #[test]
    fn seed_file_overrides_builtin_world() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("world.json");
        fs::write(&path, r#"{ "actors": [ { "_id": "solo", "type": "grid" } ] }"#)
            .expect("write seed");
        let config = HostConfig {
            seed_path: Some(path),
            ..HostConfig::default()
        };

        let wiring = build_with_config(config).expect("wiring");
        assert_eq!(wiring.store.actor_count(), 1);
        assert!(wiring.store.actor(&ActorId::from("solo")).is_some());
    }

    #[test]
    fn missing_seed_file_is_a_startup_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = HostConfig {
            seed_path: Some(dir.path().join("absent.json")),
            ..HostConfig::default()
        };

        let error = build_with_config(config).err().expect("missing seed");
        assert!(matches!(error, HostError::SeedRead { .. }));
    }

    #[test]
    fn existing_snapshot_wins_over_seed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshot = dir.path().join("store.json");
        let seeded = build_with_config(HostConfig::default()).expect("seeded");
        seeded.store.write_snapshot(&snapshot).expect("write snapshot");

        let config = HostConfig {
            seed_path: Some(dir.path().join("ignored.json")),
            snapshot_path: Some(snapshot),
            ..HostConfig::default()
        };
        let wiring = build_with_config(config).expect("restored");
        assert_eq!(wiring.store.actor_count(), 3);
    }
}
