use crate::actor::record::ActorId;
use crate::actor::Actor;
use crate::math::Vec3;

use super::World;

impl World {
    pub fn actor(&self, id: &ActorId) -> Option<&Actor> {
        self.index.get(id).map(|slot| &self.actors[*slot])
    }

    pub fn actor_mut(&mut self, id: &ActorId) -> Option<&mut Actor> {
        self.index.get(id).map(|slot| &mut self.actors[*slot])
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.index.contains_key(id)
    }

    /// Actors in registration order.
    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Actor> {
        self.actors.iter().find(|actor| actor.name() == name)
    }

    pub fn children_of(&self, parent: &ActorId) -> Vec<ActorId> {
        self.actors
            .iter()
            .filter(|actor| actor.parent() == Some(parent))
            .map(|actor| actor.id().clone())
            .collect()
    }

    /// Closest actor whose kind tag matches `kind` (ASCII case-insensitive).
    /// Ties resolve to the earlier registered actor.
    pub fn nearest(&self, kind: &str, point: Option<Vec3>) -> Option<&Actor> {
        let point = point?;
        let mut best: Option<(&Actor, f32)> = None;
        for actor in &self.actors {
            if !actor.kind().tag().eq_ignore_ascii_case(kind) {
                continue;
            }
            let distance = actor.position().distance(point);
            if best.map_or(true, |(_, closest)| distance < closest) {
                best = Some((actor, distance));
            }
        }
        best.map(|(actor, _)| actor)
    }
}
