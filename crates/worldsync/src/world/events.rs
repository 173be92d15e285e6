use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::actor::record::ActorId;
use crate::script::ScriptInvocation;

use super::World;

/// What travels with an event: an optional target and a free-form body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPayload {
    pub target: Option<ActorId>,
    pub data: Map<String, Value>,
}

impl EventPayload {
    pub fn broadcast() -> Self {
        Self::default()
    }

    pub fn targeted(target: impl Into<ActorId>) -> Self {
        Self {
            target: Some(target.into()),
            data: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }
}

impl World {
    /// Delivers `event` to its target, or to every actor in registry order.
    /// Returns the number of actors that had a handler bound.
    pub fn broadcast_event(&mut self, event: &str, payload: EventPayload) -> usize {
        let recipients: Vec<ActorId> = match &payload.target {
            Some(target) => vec![target.clone()],
            None => self.actors.iter().map(|actor| actor.id().clone()).collect(),
        };
        let mut honored = 0;
        for id in &recipients {
            if self.trigger(id, event, payload.data.clone()) {
                honored += 1;
            }
        }
        self.metrics.record_event(honored);
        info!(
            event,
            target = payload.target.as_ref().map(ActorId::as_str),
            honored,
            "event_dispatched"
        );
        self.settle();
        honored
    }

    /// Runs the handler `id` has bound for `event`. Returns whether one was
    /// bound, even if its script is not loaded.
    pub fn trigger(&mut self, id: &ActorId, event: &str, data: Map<String, Value>) -> bool {
        let Some(binding) = self.actor(id).and_then(|actor| actor.handler(event)) else {
            return false;
        };
        let Some(script) = self.scripts.by_path(&binding.path).cloned() else {
            debug!(actor = %id, event, script = %binding.path, "handler_script_missing");
            return true;
        };
        let invocation = ScriptInvocation {
            options: binding.options,
            ..ScriptInvocation::for_event(event, id.clone(), data)
        };
        self.execute_script(&script, &invocation);
        true
    }
}
