use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use worldsync::{ActorRecord, MemoryStore, Store, StoreError, TransformUpdate, WorldScript};

use super::HostError;

/// World used when no seed file is configured: a floor grid, a bobbing box
/// driven by heartbeats, and the scripts that move it.
pub(crate) const DEFAULT_SEED: &str = r#"{
  "actors": [
    { "_id": "floor", "type": "grid", "name": "floor", "priority": -10,
      "gridWidth": 200, "gridHeight": 200 },
    { "_id": "beacon", "type": "primitive", "name": "beacon",
      "primitive": ["CreateBox", "beacon", { "size": 2 }],
      "state": { "_heartbeat": { "path": "scripts/bob" } } },
    { "_id": "lamp", "type": "primitive", "name": "lamp", "parent": "beacon",
      "primitive": ["CreateSphere", "lamp", { "diameter": 1 }] }
  ],
  "placements": [
    { "actorId": "beacon", "position": { "x": 0, "y": 1, "z": 0 }, "time": 1 },
    { "actorId": "lamp", "position": { "x": 0, "y": 3, "z": 0 }, "time": 1 }
  ],
  "scripts": [
    { "path": "scripts/bob", "code": "move $tick 1 0\nstate beats $tick" }
  ]
}"#;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct SeedFile {
    pub(crate) actors: Vec<ActorRecord>,
    pub(crate) placements: Vec<TransformUpdate>,
    pub(crate) scripts: Vec<SeedScript>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SeedScript {
    pub(crate) path: String,
    #[serde(default)]
    pub(crate) code: String,
}

pub(crate) fn load_seed(path: &Path) -> Result<SeedFile, HostError> {
    let raw = fs::read_to_string(path).map_err(|source| HostError::SeedRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_seed_json(&raw)
}

pub(crate) fn parse_seed_json(raw: &str) -> Result<SeedFile, HostError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let seed = match serde_path_to_error::deserialize::<_, SeedFile>(&mut deserializer) {
        Ok(seed) => seed,
        Err(error) => {
            let path = error.path().to_string();
            let source = error.into_inner();
            let reason = if path.is_empty() || path == "." {
                format!("parse seed json: {source}")
            } else {
                format!("parse seed json at {path}: {source}")
            };
            return Err(HostError::SeedInvalid(reason));
        }
    };
    validate_seed(&seed)?;
    Ok(seed)
}

fn validate_seed(seed: &SeedFile) -> Result<(), HostError> {
    let mut known_ids = HashSet::with_capacity(seed.actors.len());
    for (index, actor) in seed.actors.iter().enumerate() {
        let Some(id) = actor.id.as_ref() else {
            return Err(validation_err(&format!("actors[{index}]._id"), "missing id"));
        };
        if !known_ids.insert(id.clone()) {
            return Err(validation_err(
                &format!("actors[{index}]._id"),
                format!("duplicate id '{id}'"),
            ));
        }
    }
    for (index, placement) in seed.placements.iter().enumerate() {
        if !known_ids.contains(&placement.actor_id) {
            return Err(validation_err(
                &format!("placements[{index}].actorId"),
                format!("unknown actor '{}'", placement.actor_id),
            ));
        }
        if placement.time.is_none() {
            return Err(validation_err(
                &format!("placements[{index}].time"),
                "placements need a time",
            ));
        }
        let components = [placement.position, placement.rotation, placement.scaling];
        if components.iter().flatten().any(|value| !value.is_finite()) {
            return Err(validation_err(
                &format!("placements[{index}]"),
                "expected finite components",
            ));
        }
    }
    let mut known_paths = HashSet::with_capacity(seed.scripts.len());
    for (index, script) in seed.scripts.iter().enumerate() {
        if script.path.trim().is_empty() || !known_paths.insert(script.path.as_str()) {
            return Err(validation_err(
                &format!("scripts[{index}].path"),
                format!("empty or duplicate path '{}'", script.path),
            ));
        }
    }
    Ok(())
}

fn validation_err(path: &str, message: impl Into<String>) -> HostError {
    HostError::SeedInvalid(format!("validation failed at {path}: {}", message.into()))
}

/// Writes the seed into the store in priority order, so every client replays
/// it through its own subscription.
pub(crate) fn apply_seed(store: &mut MemoryStore, seed: SeedFile) -> Result<usize, StoreError> {
    for script in seed.scripts {
        store.save_world_script(&WorldScript::new(script.path, script.code))?;
    }
    let mut actors = seed.actors;
    actors.sort_by_key(|record| record.priority);
    let count = actors.len();
    for record in &actors {
        if let Some(id) = record.id.as_ref() {
            store.save_actor(id, record)?;
        }
    }
    for placement in &seed.placements {
        store.save_placement(placement)?;
    }
    Ok(count)
}
