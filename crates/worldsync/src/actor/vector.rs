use crate::actor::record::ActorId;
use crate::actor::{ActorError, TransformChannel};
use crate::math::Vec3;
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// A component value as it arrives from scripts or UI fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentInput {
    Number(f64),
    Text(String),
}

impl From<f32> for ComponentInput {
    fn from(value: f32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<f64> for ComponentInput {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for ComponentInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ComponentInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

pub fn parse_component(input: ComponentInput) -> Result<f32, ActorError> {
    let value = match input {
        ComponentInput::Number(value) => value as f32,
        ComponentInput::Text(text) => text
            .trim()
            .parse::<f32>()
            .map_err(|_| ActorError::InvalidComponent { input: text.clone() })?,
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ActorError::InvalidComponent {
            input: value.to_string(),
        })
    }
}

/// Per-axis view of one transform channel. Every component write goes
/// through the world's local transform path, so it is persisted as a waypoint.
pub struct WaypointVector<'w> {
    world: &'w mut World,
    actor: ActorId,
    channel: TransformChannel,
}

impl<'w> WaypointVector<'w> {
    pub(crate) fn new(world: &'w mut World, actor: ActorId, channel: TransformChannel) -> Self {
        Self {
            world,
            actor,
            channel,
        }
    }

    pub fn channel(&self) -> TransformChannel {
        self.channel
    }

    pub fn value(&self) -> Vec3 {
        self.world
            .actor(&self.actor)
            .map(|actor| actor.transform().get(self.channel))
            .unwrap_or_default()
    }

    pub fn x(&self) -> f32 {
        self.value().x
    }

    pub fn y(&self) -> f32 {
        self.value().y
    }

    pub fn z(&self) -> f32 {
        self.value().z
    }

    pub fn set_x(&mut self, input: impl Into<ComponentInput>) -> Result<(), ActorError> {
        self.set(Axis::X, input)
    }

    pub fn set_y(&mut self, input: impl Into<ComponentInput>) -> Result<(), ActorError> {
        self.set(Axis::Y, input)
    }

    pub fn set_z(&mut self, input: impl Into<ComponentInput>) -> Result<(), ActorError> {
        self.set(Axis::Z, input)
    }

    pub fn set(&mut self, axis: Axis, input: impl Into<ComponentInput>) -> Result<(), ActorError> {
        let component = parse_component(input.into())?;
        let mut value = self
            .world
            .actor(&self.actor)
            .map(|actor| actor.transform().get(self.channel))
            .ok_or_else(|| ActorError::UnknownActor(self.actor.clone()))?;
        match axis {
            Axis::X => value.x = component,
            Axis::Y => value.y = component,
            Axis::Z => value.z = component,
        }
        self.world.set_transform(&self.actor, self.channel, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_components_parse_as_floats() {
        assert_eq!(parse_component(" 2.5 ".into()), Ok(2.5));
        assert_eq!(parse_component(String::from("-3").into()), Ok(-3.0));
        assert_eq!(parse_component(4.0_f64.into()), Ok(4.0));
        assert_eq!(
            parse_component("north".into()),
            Err(ActorError::InvalidComponent {
                input: "north".to_string()
            })
        );
        assert!(parse_component(f64::NAN.into()).is_err());
    }
}
