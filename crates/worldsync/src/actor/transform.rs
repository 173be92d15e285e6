use std::fmt;

use serde::{Deserialize, Serialize};

use crate::actor::record::MaterialRecord;
use crate::math::Vec3;
use crate::render::{MeshHandle, MeshId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformChannel {
    Position,
    Rotation,
    Scaling,
}

impl TransformChannel {
    pub const ALL: [Self; 3] = [Self::Position, Self::Rotation, Self::Scaling];

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Position => 0,
            Self::Rotation => 1,
            Self::Scaling => 2,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Rotation => "rotation",
            Self::Scaling => "scaling",
        }
    }
}

impl fmt::Display for TransformChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformState {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scaling: Vec3,
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scaling: Vec3::ONE,
        }
    }
}

impl TransformState {
    pub fn get(&self, channel: TransformChannel) -> Vec3 {
        match channel {
            TransformChannel::Position => self.position,
            TransformChannel::Rotation => self.rotation,
            TransformChannel::Scaling => self.scaling,
        }
    }

    pub fn set(&mut self, channel: TransformChannel, value: Vec3) {
        match channel {
            TransformChannel::Position => self.position = value,
            TransformChannel::Rotation => self.rotation = value,
            TransformChannel::Scaling => self.scaling = value,
        }
    }
}

/// Stand-in attributes for an actor whose mesh has not been built yet.
#[derive(Debug, Clone, PartialEq)]
pub struct UnrealizedMesh {
    pub transform: TransformState,
    pub visible: bool,
    pub check_collisions: bool,
    pub material: MaterialRecord,
    pub parent: Option<MeshId>,
}

impl Default for UnrealizedMesh {
    fn default() -> Self {
        Self {
            transform: TransformState::default(),
            visible: true,
            check_collisions: false,
            material: MaterialRecord::default(),
            parent: None,
        }
    }
}

/// What the actor renders through. Every render-side write goes through this
/// accessor so callers never care whether a mesh exists.
pub enum RenderSlot {
    Unrealized(UnrealizedMesh),
    Realized(Box<dyn MeshHandle>),
}

impl Default for RenderSlot {
    fn default() -> Self {
        Self::Unrealized(UnrealizedMesh::default())
    }
}

impl fmt::Debug for RenderSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrealized(proxy) => f.debug_tuple("Unrealized").field(proxy).finish(),
            Self::Realized(handle) => f.debug_tuple("Realized").field(&handle.id()).finish(),
        }
    }
}

impl RenderSlot {
    pub fn is_realized(&self) -> bool {
        matches!(self, Self::Realized(_))
    }

    pub fn mesh_id(&self) -> Option<MeshId> {
        match self {
            Self::Unrealized(_) => None,
            Self::Realized(handle) => Some(handle.id()),
        }
    }

    pub fn channel(&self, channel: TransformChannel) -> Vec3 {
        match self {
            Self::Unrealized(proxy) => proxy.transform.get(channel),
            Self::Realized(handle) => match channel {
                TransformChannel::Position => handle.position(),
                TransformChannel::Rotation => handle.rotation(),
                TransformChannel::Scaling => handle.scaling(),
            },
        }
    }

    pub fn set_channel(&mut self, channel: TransformChannel, value: Vec3) {
        match self {
            Self::Unrealized(proxy) => proxy.transform.set(channel, value),
            Self::Realized(handle) => match channel {
                TransformChannel::Position => handle.set_position(value),
                TransformChannel::Rotation => handle.set_rotation(value),
                TransformChannel::Scaling => handle.set_scaling(value),
            },
        }
    }

    pub fn transform(&self) -> TransformState {
        TransformState {
            position: self.channel(TransformChannel::Position),
            rotation: self.channel(TransformChannel::Rotation),
            scaling: self.channel(TransformChannel::Scaling),
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        match self {
            Self::Unrealized(proxy) => proxy.visible = visible,
            Self::Realized(handle) => handle.set_visible(visible),
        }
    }

    pub fn set_parent(&mut self, parent: Option<MeshId>) {
        match self {
            Self::Unrealized(proxy) => proxy.parent = parent,
            Self::Realized(handle) => handle.set_parent(parent),
        }
    }

    pub fn apply_material(&mut self, material: &MaterialRecord, check_collisions: bool) {
        match self {
            Self::Unrealized(proxy) => {
                proxy.material = material.clone();
                proxy.check_collisions = check_collisions;
            }
            Self::Realized(handle) => {
                handle.set_material(material);
                handle.set_check_collisions(check_collisions);
            }
        }
    }

    /// Releases render resources and falls back to an unrealized stand-in
    /// carrying the last render transform.
    pub fn dispose(&mut self) {
        if let Self::Realized(handle) = self {
            let transform = TransformState {
                position: handle.position(),
                rotation: handle.rotation(),
                scaling: handle.scaling(),
            };
            handle.dispose();
            *self = Self::Unrealized(UnrealizedMesh {
                transform,
                ..UnrealizedMesh::default()
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrealized_slot_tracks_writes() {
        let mut slot = RenderSlot::default();
        assert_eq!(slot.channel(TransformChannel::Scaling), Vec3::ONE);
        slot.set_channel(TransformChannel::Rotation, Vec3::new(0.0, 1.5, 0.0));
        slot.set_visible(false);

        assert_eq!(slot.transform().rotation, Vec3::new(0.0, 1.5, 0.0));
        let RenderSlot::Unrealized(proxy) = &slot else {
            panic!("expected unrealized slot");
        };
        assert!(!proxy.visible);
        assert!(!slot.is_realized());
        assert_eq!(slot.mesh_id(), None);
    }

    #[test]
    fn channel_names_are_lowercase() {
        let names: Vec<&str> = TransformChannel::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["position", "rotation", "scaling"]);
    }
}
