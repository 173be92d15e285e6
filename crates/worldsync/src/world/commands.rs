use serde_json::{Map, Value};
use tracing::debug;

use crate::actor::record::{ActorId, ActorRecord};
use crate::actor::{Actor, ActorError, Axis, TransformChannel};
use crate::math::Vec3;

use super::{EventPayload, World};

/// A deferred mutation produced by a script. Applied after the dispatch
/// that produced it has returned.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldCommand {
    SetTransform {
        actor: ActorId,
        channel: TransformChannel,
        value: Vec3,
    },
    SetComponent {
        actor: ActorId,
        channel: TransformChannel,
        axis: Axis,
        value: f32,
    },
    SetState {
        actor: ActorId,
        fields: Map<String, Value>,
    },
    SetLocalState {
        actor: ActorId,
        key: String,
        value: Value,
    },
    BindHandler {
        actor: ActorId,
        event: String,
        path: String,
        options: Option<Value>,
    },
    SendEvent {
        event: String,
        payload: EventPayload,
    },
    Remove {
        actor: ActorId,
    },
    Spawn(ActorRecord),
    RunScriptWhenLoaded {
        path: String,
    },
}

impl World {
    pub(crate) fn apply_command(&mut self, command: WorldCommand) -> Result<(), ActorError> {
        debug!(?command, "world_command");
        match command {
            WorldCommand::SetTransform {
                actor,
                channel,
                value,
            } => self.set_transform(&actor, channel, value),
            WorldCommand::SetComponent {
                actor,
                channel,
                axis,
                value,
            } => {
                let mut vector = self.vector(&actor, channel)?;
                vector.set(axis, value)
            }
            WorldCommand::SetState { actor, fields } => {
                self.require(&actor)?.set_state(fields);
                Ok(())
            }
            WorldCommand::SetLocalState { actor, key, value } => {
                self.require(&actor)?.set_local_state(&key, value);
                Ok(())
            }
            WorldCommand::BindHandler {
                actor,
                event,
                path,
                options,
            } => {
                self.require(&actor)?.on(&event, &path, options);
                Ok(())
            }
            WorldCommand::SendEvent { event, payload } => {
                self.broadcast_event(&event, payload);
                Ok(())
            }
            WorldCommand::Remove { actor } => self.remove_actor(&actor).map(|_| ()),
            WorldCommand::Spawn(record) => {
                self.spawn(record);
                Ok(())
            }
            WorldCommand::RunScriptWhenLoaded { path } => {
                self.run_script_when_loaded(&path);
                Ok(())
            }
        }
    }

    fn require(&mut self, id: &ActorId) -> Result<&mut Actor, ActorError> {
        self.actor_mut(id)
            .ok_or_else(|| ActorError::UnknownActor(id.clone()))
    }
}
