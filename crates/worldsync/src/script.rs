use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::actor::record::ActorId;
use crate::world::WorldCommand;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptId(String);

impl ScriptId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user script stored alongside the world, addressed by its slash path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldScript {
    #[serde(rename = "_id")]
    pub id: ScriptId,
    #[serde(default)]
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wid: Option<String>,
}

impl WorldScript {
    pub fn new(path: impl Into<String>, code: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            id: ScriptId::generate(),
            name,
            path,
            code: code.into(),
            wid: None,
        }
    }

    pub fn with_id(mut self, id: ScriptId) -> Self {
        self.id = id;
        self
    }
}

/// Arguments a script runs with. `target` is the actor the event was
/// delivered to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptInvocation {
    pub event: Option<String>,
    pub target: Option<ActorId>,
    pub data: Map<String, Value>,
    pub options: Option<Value>,
}

impl ScriptInvocation {
    pub fn for_event(event: &str, target: ActorId, data: Map<String, Value>) -> Self {
        Self {
            event: Some(event.to_string()),
            target: Some(target),
            data,
            options: None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("line {line}: unknown command '{command}'")]
    UnknownCommand { line: usize, command: String },
    #[error("line {line}: {reason} (usage: {usage})")]
    InvalidArguments {
        line: usize,
        reason: String,
        usage: String,
    },
    #[error("line {line}: script has no target actor")]
    MissingTarget { line: usize },
    #[error("script failed: {0}")]
    Failed(String),
}

/// Executes world scripts. Scripts do not touch the world directly; they
/// return commands that the world applies once dispatch has finished.
pub trait ScriptRunner {
    fn run(
        &mut self,
        script: &WorldScript,
        invocation: &ScriptInvocation,
    ) -> Result<Vec<WorldCommand>, ScriptError>;
}

/// Runner that accepts every script and produces nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScriptRunner;

impl ScriptRunner for NoopScriptRunner {
    fn run(
        &mut self,
        _script: &WorldScript,
        _invocation: &ScriptInvocation,
    ) -> Result<Vec<WorldCommand>, ScriptError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunRequest {
    path: String,
    ran: bool,
}

#[derive(Debug, Default)]
pub struct ScriptLibrary {
    scripts: Vec<WorldScript>,
    run_requests: Vec<RunRequest>,
}

impl ScriptLibrary {
    /// Adds or replaces by id. Returns the script when a pending
    /// run-when-loaded request for its path became due.
    pub fn upsert(&mut self, script: WorldScript) -> Option<WorldScript> {
        match self.scripts.iter_mut().find(|known| known.id == script.id) {
            Some(existing) => *existing = script.clone(),
            None => self.scripts.push(script.clone()),
        }
        self.claim_request(&script.path).then_some(script)
    }

    pub fn remove(&mut self, id: &ScriptId) -> Option<WorldScript> {
        let index = self.scripts.iter().position(|script| &script.id == id)?;
        Some(self.scripts.remove(index))
    }

    pub fn by_path(&self, path: &str) -> Option<&WorldScript> {
        self.scripts.iter().find(|script| script.path == path)
    }

    pub fn scripts(&self) -> &[WorldScript] {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Queues a one-time run for `path`. If that script is already loaded it
    /// is returned right away and the request is consumed.
    pub fn request_run_when_loaded(&mut self, path: &str) -> Option<WorldScript> {
        if !self.run_requests.iter().any(|request| request.path == path) {
            self.run_requests.push(RunRequest {
                path: path.to_string(),
                ran: false,
            });
        }
        let script = self.by_path(path)?.clone();
        self.claim_request(path).then_some(script)
    }

    fn claim_request(&mut self, path: &str) -> bool {
        match self
            .run_requests
            .iter_mut()
            .find(|request| request.path == path && !request.ran)
        {
            Some(request) => {
                request.ran = true;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_last_path_segment() {
        let script = WorldScript::new("scripts/doors/open", "echo hi");
        assert_eq!(script.name, "open");
        assert_eq!(WorldScript::new("solo", "").name, "solo");
    }

    #[test]
    fn upsert_replaces_by_id_and_lookup_uses_path() {
        let mut library = ScriptLibrary::default();
        let first = WorldScript::new("a/b", "one").with_id(ScriptId::new("s1"));
        library.upsert(first);
        let mut edited = WorldScript::new("a/c", "two").with_id(ScriptId::new("s1"));
        edited.name = "renamed".to_string();
        library.upsert(edited);

        assert_eq!(library.len(), 1);
        assert!(library.by_path("a/b").is_none());
        assert_eq!(library.by_path("a/c").map(|s| s.code.as_str()), Some("two"));

        assert!(library.remove(&ScriptId::new("s1")).is_some());
        assert!(library.is_empty());
    }

    #[test]
    fn run_when_loaded_fires_once() {
        let mut library = ScriptLibrary::default();
        assert!(library.request_run_when_loaded("boot").is_none());

        let script = WorldScript::new("boot", "echo up").with_id(ScriptId::new("b"));
        assert!(library.upsert(script.clone()).is_some());
        assert!(library.upsert(script).is_none());
        assert!(library.request_run_when_loaded("boot").is_none());
    }

    #[test]
    fn run_when_loaded_runs_already_loaded_script() {
        let mut library = ScriptLibrary::default();
        library.upsert(WorldScript::new("init", "").with_id(ScriptId::new("i")));
        assert!(library.request_run_when_loaded("init").is_some());
        assert!(library.request_run_when_loaded("init").is_none());
    }
}
