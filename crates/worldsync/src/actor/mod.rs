pub mod kind;
pub mod record;
mod transform;
mod vector;

use std::time::Duration;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{error, trace};

use crate::clock::Timestamp;
use crate::config::SyncConfig;
use crate::math::Vec3;
use crate::render::{MeshId, RenderError, Renderer};
use crate::sync::{tween_duration, DueWrites, PersistenceSchedule, Tween, TweenSet};

use self::kind::{KindData, KindRegistry};
use self::record::{
    handler_state_key, ActorId, ActorRecord, HandlerBinding, MaterialRecord, TransformUpdate,
};

pub use transform::{RenderSlot, TransformChannel, TransformState, UnrealizedMesh};
pub use vector::{parse_component, Axis, ComponentInput, WaypointVector};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActorError {
    #[error("no actor with id {0}")]
    UnknownActor(ActorId),
    #[error("'{input}' is not a number")]
    InvalidComponent { input: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unplaced,
    Placed,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    MissingTime,
    /// Any accepted placement, waypoint or local write ends the one-shot.
    AlreadyPlaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    Applied,
    /// Target not registered yet; replayed on registration.
    Buffered,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaypointOutcome {
    Applied { duration: Duration },
    MissingTime,
    /// Older than the watermark.
    Stale,
    /// Older than the receive window; dropped before lookup.
    Expired,
    UnknownTarget,
}

#[derive(Debug)]
pub(crate) enum Realization {
    Skipped,
    Refreshed,
    Built { first: bool },
    Failed(RenderError),
}

/// One live actor: persisted fields, logical transform, render slot, and the
/// sync bookkeeping that orders incoming updates.
#[derive(Debug)]
pub struct Actor {
    id: ActorId,
    kind: KindData,
    name: String,
    priority: i64,
    parent: Option<ActorId>,
    parent_mesh: Option<MeshId>,
    state: Map<String, Value>,
    local_state: Map<String, Value>,
    material: MaterialRecord,
    visible: Option<bool>,
    check_collisions: bool,
    logical: TransformState,
    render: RenderSlot,
    tweens: TweenSet,
    lifecycle: Lifecycle,
    watermark: Option<Timestamp>,
    schedule: PersistenceSchedule,
    dirty: bool,
    created: bool,
}

impl Actor {
    pub(crate) fn from_record(
        id: ActorId,
        kind: KindData,
        record: &ActorRecord,
        config: &SyncConfig,
    ) -> Self {
        let mut actor = Self {
            id,
            kind,
            name: String::new(),
            priority: 0,
            parent: None,
            parent_mesh: None,
            state: Map::new(),
            local_state: Map::new(),
            material: MaterialRecord::default(),
            visible: None,
            check_collisions: false,
            logical: TransformState::default(),
            render: RenderSlot::default(),
            tweens: TweenSet::default(),
            lifecycle: Lifecycle::Unplaced,
            watermark: None,
            schedule: PersistenceSchedule::new(config),
            dirty: false,
            created: false,
        };
        actor.copy_common_fields(record);
        actor
    }

    fn copy_common_fields(&mut self, record: &ActorRecord) {
        self.name.clone_from(&record.name);
        self.priority = record.priority;
        self.parent.clone_from(&record.parent);
        self.state.clone_from(&record.state);
        self.material.clone_from(&record.material);
        self.visible = record.visible;
        self.check_collisions = record.check_collisions;
    }

    /// Re-reads a definition in place. Returns whether the mesh must be rebuilt.
    pub(crate) fn reinit(&mut self, record: &ActorRecord, kinds: &KindRegistry) -> bool {
        self.copy_common_fields(record);
        let same_kind = self.kind.tag().eq_ignore_ascii_case(&record.kind);
        let rebuild = if same_kind {
            self.kind.behavior_mut().reinit(record);
            self.kind.behavior().rebuilds_on_init()
        } else {
            self.kind = kinds.construct(record);
            true
        };
        self.dirty = false;
        rebuild
    }

    /// Builds or refreshes the render-side mesh. A failed build leaves the
    /// previous slot untouched.
    pub(crate) fn realize(&mut self, renderer: &mut dyn Renderer, rebuild: bool) -> Realization {
        let Some(request) = self.kind.behavior().mesh_request(&self.id, &self.name) else {
            if rebuild {
                self.render.dispose();
            }
            self.refresh_render_attributes();
            return Realization::Skipped;
        };
        if self.render.is_realized() && !rebuild {
            self.refresh_render_attributes();
            return Realization::Refreshed;
        }

        let handle = match renderer.build_mesh(&request) {
            Ok(handle) => handle,
            Err(error) => {
                error!(
                    actor = %self.id,
                    builder = %request.builder,
                    error = %error,
                    "mesh_build_failed"
                );
                return Realization::Failed(error);
            }
        };
        self.render.dispose();
        self.render = RenderSlot::Realized(handle);
        self.render.set_parent(self.parent_mesh);
        self.sync_render_from_logical();
        self.refresh_render_attributes();

        let first = !self.created;
        self.created = true;
        Realization::Built { first }
    }

    fn refresh_render_attributes(&mut self) {
        self.render
            .apply_material(&self.material, self.check_collisions);
        self.render.set_visible(self.visible.unwrap_or(true));
    }

    fn sync_render_from_logical(&mut self) {
        let offset = self.kind.behavior().placement_offset();
        for channel in TransformChannel::ALL {
            let mut value = self.logical.get(channel);
            if channel == TransformChannel::Position {
                value += offset;
            }
            self.render.set_channel(channel, value);
        }
    }

    pub(crate) fn apply_placement(&mut self, update: &TransformUpdate) -> PlacementOutcome {
        let Some(time) = update.time else {
            return PlacementOutcome::Ignored(IgnoreReason::MissingTime);
        };
        if self.lifecycle != Lifecycle::Unplaced {
            return PlacementOutcome::Ignored(IgnoreReason::AlreadyPlaced);
        }

        self.lifecycle = Lifecycle::Placed;
        self.watermark = Some(time);
        let offset = self.kind.behavior().placement_offset();
        for (channel, raw) in channels_of(update) {
            let applied = if channel == TransformChannel::Position {
                raw + offset
            } else {
                raw
            };
            self.tweens.cancel(channel);
            self.render.set_channel(channel, applied);
            self.logical.set(channel, raw);
        }
        PlacementOutcome::Applied
    }

    pub(crate) fn apply_waypoint(
        &mut self,
        update: &TransformUpdate,
        now: Timestamp,
        min_tween: Duration,
    ) -> WaypointOutcome {
        let Some(time) = update.time else {
            return WaypointOutcome::MissingTime;
        };
        if self.watermark.is_some_and(|watermark| time <= watermark) {
            trace!(actor = %self.id, %time, "waypoint_stale");
            return WaypointOutcome::Stale;
        }

        self.watermark = Some(time);
        self.lifecycle = Lifecycle::Live;
        let duration = tween_duration(now, time, min_tween);
        let offset = self.kind.behavior().placement_offset();
        for (channel, raw) in channels_of(update) {
            let target = if channel == TransformChannel::Position {
                raw + offset
            } else {
                raw
            };
            let from = self.render.channel(channel);
            self.tweens
                .start(Tween::new(channel, from, target, now, duration));
        }
        WaypointOutcome::Applied { duration }
    }

    /// Steps every in-flight tween, mirroring render values into the logical
    /// transform. Returns the number of channels written.
    pub(crate) fn advance_tweens(&mut self, now: Timestamp) -> usize {
        if self.tweens.is_empty() {
            return 0;
        }
        let offset = self.kind.behavior().placement_offset();
        let writes = self.tweens.advance(now);
        for (channel, value) in &writes {
            self.render.set_channel(*channel, *value);
            let logical = if *channel == TransformChannel::Position {
                *value - offset
            } else {
                *value
            };
            self.logical.set(*channel, logical);
        }
        writes.len()
    }

    /// Local edit: immediate logical and render write, then the waypoint to
    /// persist. Also arms both debounced writes.
    pub(crate) fn write_local(
        &mut self,
        channel: TransformChannel,
        value: Vec3,
        now: Timestamp,
    ) -> TransformUpdate {
        self.tweens.cancel(channel);
        self.logical.set(channel, value);
        let applied = if channel == TransformChannel::Position {
            value + self.kind.behavior().placement_offset()
        } else {
            value
        };
        self.render.set_channel(channel, applied);
        self.lifecycle = Lifecycle::Live;
        self.watermark = Some(self.watermark.map_or(now, |watermark| watermark.max(now)));
        self.schedule.touch(now);
        self.dirty = true;
        self.transform_sample(now)
    }

    pub(crate) fn poll_persistence(&mut self, now: Timestamp) -> DueWrites {
        self.schedule.poll(now)
    }

    /// Full logical transform stamped `time`.
    pub fn transform_sample(&self, time: Timestamp) -> TransformUpdate {
        TransformUpdate::at(self.id.clone(), time)
            .with_position(self.logical.position)
            .with_rotation(self.logical.rotation)
            .with_scaling(self.logical.scaling)
    }

    /// Waypoints stamped before this instant may be cleared.
    pub fn waypoint_cutoff(&self, retention: Duration) -> Option<Timestamp> {
        self.watermark
            .map(|watermark| watermark.saturating_sub(retention))
    }

    pub fn to_record(&self) -> ActorRecord {
        let mut record = ActorRecord {
            id: Some(self.id.clone()),
            name: self.name.clone(),
            priority: self.priority,
            parent: self.parent.clone(),
            state: self.state.clone(),
            visible: self.visible,
            check_collisions: self.check_collisions,
            material: self.material.clone(),
            ..ActorRecord::default()
        };
        self.kind.behavior().write_record(&mut record);
        record
    }

    pub fn has_handler(&self, event: &str) -> bool {
        self.state.contains_key(&handler_state_key(event))
    }

    pub fn handler(&self, event: &str) -> Option<HandlerBinding> {
        let raw = self.state.get(&handler_state_key(event))?;
        match serde_json::from_value(raw.clone()) {
            Ok(binding) => Some(binding),
            Err(error) => {
                error!(actor = %self.id, event, error = %error, "handler_binding_invalid");
                None
            }
        }
    }

    /// Binds `event` to the script at `path`.
    pub fn on(&mut self, event: &str, path: &str, options: Option<Value>) {
        self.state.insert(
            handler_state_key(event),
            json!({ "path": path, "options": options }),
        );
        self.dirty = true;
    }

    /// Shallow-merges `fields` into the persisted state.
    pub fn set_state(&mut self, fields: Map<String, Value>) {
        self.state.extend(fields);
        self.dirty = true;
    }

    pub fn set_local_state(&mut self, key: &str, value: Value) {
        self.local_state.insert(key.to_string(), value);
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.dirty = true;
    }

    pub fn set_priority(&mut self, priority: i64) {
        self.priority = priority;
        self.dirty = true;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = Some(visible);
        self.render.set_visible(visible);
        self.dirty = true;
    }

    pub fn set_check_collisions(&mut self, check: bool) {
        self.check_collisions = check;
        self.render.apply_material(&self.material, check);
        self.dirty = true;
    }

    pub fn set_material(&mut self, material: MaterialRecord) {
        self.material = material;
        self.render
            .apply_material(&self.material, self.check_collisions);
        self.dirty = true;
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ActorId>) {
        self.parent = parent;
        self.dirty = true;
    }

    pub(crate) fn set_parent_mesh(&mut self, parent: Option<MeshId>) {
        self.parent_mesh = parent;
        self.render.set_parent(parent);
    }

    pub(crate) fn kind_mut(&mut self) -> &mut KindData {
        self.dirty = true;
        &mut self.kind
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_saved(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn dispose(&mut self) {
        self.tweens.cancel_all();
        self.schedule.cancel();
        self.render.dispose();
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn kind(&self) -> &KindData {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn parent(&self) -> Option<&ActorId> {
        self.parent.as_ref()
    }

    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    pub fn local_state(&self) -> &Map<String, Value> {
        &self.local_state
    }

    pub fn material(&self) -> &MaterialRecord {
        &self.material
    }

    pub fn is_visible(&self) -> bool {
        self.visible.unwrap_or(true)
    }

    pub fn check_collisions(&self) -> bool {
        self.check_collisions
    }

    pub fn transform(&self) -> &TransformState {
        &self.logical
    }

    pub fn position(&self) -> Vec3 {
        self.logical.position
    }

    pub fn rotation(&self) -> Vec3 {
        self.logical.rotation
    }

    pub fn scaling(&self) -> Vec3 {
        self.logical.scaling
    }

    pub fn render(&self) -> &RenderSlot {
        &self.render
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn watermark(&self) -> Option<Timestamp> {
        self.watermark
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn active_tweens(&self) -> usize {
        self.tweens.active_count()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.schedule.is_pending()
    }
}

fn channels_of(update: &TransformUpdate) -> impl Iterator<Item = (TransformChannel, Vec3)> + '_ {
    [
        (TransformChannel::Position, update.position),
        (TransformChannel::Rotation, update.rotation),
        (TransformChannel::Scaling, update.scaling),
    ]
    .into_iter()
    .filter_map(|(channel, value)| value.map(|value| (channel, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeadlessRenderer;

    const MIN_TWEEN: Duration = Duration::from_millis(1_000);

    fn actor(kind: &str) -> Actor {
        let record = ActorRecord::with_id("a", kind);
        let kinds = KindRegistry::default();
        Actor::from_record(
            ActorId::from("a"),
            kinds.construct(&record),
            &record,
            &SyncConfig::default(),
        )
    }

    fn grid_actor() -> Actor {
        let record = ActorRecord {
            grid_width: Some(80.0),
            grid_height: Some(80.0),
            ..ActorRecord::with_id("g", "grid")
        };
        Actor::from_record(
            ActorId::from("g"),
            KindRegistry::default().construct(&record),
            &record,
            &SyncConfig::default(),
        )
    }

    fn at(millis: u64, x: f32) -> TransformUpdate {
        TransformUpdate::at("a", Timestamp(millis)).with_position(Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn placement_is_one_shot() {
        let mut actor = actor("primitive");
        assert_eq!(actor.apply_placement(&at(100, 1.0)), PlacementOutcome::Applied);
        assert_eq!(
            actor.apply_placement(&at(200, 2.0)),
            PlacementOutcome::Ignored(IgnoreReason::AlreadyPlaced)
        );
        assert_eq!(actor.position(), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(actor.lifecycle(), Lifecycle::Placed);
        assert_eq!(actor.watermark(), Some(Timestamp(100)));
    }

    #[test]
    fn local_write_closes_the_placement_window() {
        let mut actor = actor("primitive");
        actor.write_local(
            TransformChannel::Position,
            Vec3::new(4.0, 0.0, 0.0),
            Timestamp(500),
        );
        assert_eq!(
            actor.apply_placement(&at(900, 1.0)),
            PlacementOutcome::Ignored(IgnoreReason::AlreadyPlaced)
        );
        assert_eq!(actor.position(), Vec3::new(4.0, 0.0, 0.0));
        assert_eq!(actor.watermark(), Some(Timestamp(500)));
    }

    #[test]
    fn placement_without_time_does_not_consume_one_shot() {
        let mut actor = actor("primitive");
        let untimed = TransformUpdate {
            time: None,
            ..at(0, 9.0)
        };
        assert_eq!(
            actor.apply_placement(&untimed),
            PlacementOutcome::Ignored(IgnoreReason::MissingTime)
        );
        assert_eq!(actor.apply_placement(&at(50, 3.0)), PlacementOutcome::Applied);
        assert_eq!(actor.position().x, 3.0);
    }

    #[test]
    fn placement_offset_reaches_render_but_not_logical() {
        let mut grid = grid_actor();
        let update =
            TransformUpdate::at("g", Timestamp(10)).with_position(Vec3::new(5.0, 0.0, 5.0));
        grid.apply_placement(&update);

        assert_eq!(grid.position(), Vec3::new(5.0, 0.0, 5.0));
        assert_eq!(
            grid.render().channel(TransformChannel::Position),
            Vec3::new(-35.0, 2.0, -35.0)
        );
    }

    #[test]
    fn out_of_order_waypoint_is_a_no_op() {
        let mut actor = actor("primitive");
        let now = Timestamp(10_000);
        assert!(matches!(
            actor.apply_waypoint(&at(9_000, 4.0), now, MIN_TWEEN),
            WaypointOutcome::Applied { .. }
        ));
        assert_eq!(
            actor.apply_waypoint(&at(8_000, -4.0), now, MIN_TWEEN),
            WaypointOutcome::Stale
        );
        assert_eq!(
            actor.apply_waypoint(&at(9_000, -4.0), now, MIN_TWEEN),
            WaypointOutcome::Stale
        );

        actor.advance_tweens(Timestamp(20_000));
        assert_eq!(actor.position(), Vec3::new(4.0, 0.0, 0.0));
        assert_eq!(actor.lifecycle(), Lifecycle::Live);
    }

    #[test]
    fn tween_exposes_in_flight_value_to_reads() {
        let mut actor = actor("primitive");
        let outcome = actor.apply_waypoint(&at(9_800, 10.0), Timestamp(10_000), MIN_TWEEN);
        assert_eq!(
            outcome,
            WaypointOutcome::Applied {
                duration: MIN_TWEEN
            }
        );

        actor.advance_tweens(Timestamp(10_500));
        assert_eq!(actor.position(), Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(actor.active_tweens(), 1);

        actor.advance_tweens(Timestamp(11_000));
        assert_eq!(actor.position(), Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(actor.active_tweens(), 0);
    }

    #[test]
    fn newer_waypoint_cancels_in_flight_tween() {
        let mut actor = actor("primitive");
        actor.apply_waypoint(&at(9_800, 10.0), Timestamp(10_000), MIN_TWEEN);
        actor.advance_tweens(Timestamp(10_500));
        actor.apply_waypoint(&at(10_400, 0.0), Timestamp(10_500), MIN_TWEEN);

        actor.advance_tweens(Timestamp(11_000));
        assert_eq!(actor.position(), Vec3::new(2.5, 0.0, 0.0));
        actor.advance_tweens(Timestamp(11_500));
        assert_eq!(actor.position(), Vec3::ZERO);
    }

    #[test]
    fn local_write_advances_watermark_and_marks_dirty() {
        let mut actor = actor("primitive");
        let sample = actor.write_local(
            TransformChannel::Rotation,
            Vec3::new(0.0, 1.0, 0.0),
            Timestamp(500),
        );

        assert_eq!(sample.time, Some(Timestamp(500)));
        assert_eq!(sample.rotation, Some(Vec3::new(0.0, 1.0, 0.0)));
        assert_eq!(sample.scaling, Some(Vec3::ONE));
        assert_eq!(actor.watermark(), Some(Timestamp(500)));
        assert!(actor.is_dirty());
        assert!(actor.has_pending_writes());
        assert_eq!(
            actor.waypoint_cutoff(Duration::from_secs(5)),
            Some(Timestamp(0))
        );
    }

    #[test]
    fn record_is_idempotent_and_includes_handlers() {
        let mut actor = actor("primitive");
        actor.on("pick", "scripts/pick", None);
        actor.set_local_state("scratch", json!(1));

        let first = actor.to_record();
        let second = actor.to_record();
        assert_eq!(first, second);
        assert_eq!(
            first.state.get("_pick"),
            Some(&json!({"path": "scripts/pick", "options": null}))
        );
        assert!(!first.state.contains_key("scratch"));
        assert_eq!(
            actor.handler("pick"),
            Some(HandlerBinding {
                path: "scripts/pick".to_string(),
                options: None
            })
        );
    }

    #[test]
    fn failed_build_leaves_actor_unrealized() {
        let record = ActorRecord {
            primitive: Some(vec![json!("CreateTeapot")]),
            ..ActorRecord::with_id("p", "primitive")
        };
        let mut actor = Actor::from_record(
            ActorId::from("p"),
            KindRegistry::default().construct(&record),
            &record,
            &SyncConfig::default(),
        );
        let mut renderer = HeadlessRenderer::default();

        assert!(matches!(
            actor.realize(&mut renderer, true),
            Realization::Failed(RenderError::MissingBuilder { .. })
        ));
        assert!(!actor.render().is_realized());
    }

    #[test]
    fn realized_mesh_receives_logical_transform_with_offset() {
        let mut grid = grid_actor();
        grid.write_local(
            TransformChannel::Position,
            Vec3::new(1.0, 0.0, 1.0),
            Timestamp(1),
        );
        let mut renderer = HeadlessRenderer::default();

        assert!(matches!(
            grid.realize(&mut renderer, true),
            Realization::Built { first: true }
        ));
        let mesh_id = grid.render().mesh_id().expect("mesh");
        let mesh = renderer.mesh(mesh_id).expect("recorded");
        assert_eq!(mesh.position, Vec3::new(-39.0, 2.0, -39.0));

        assert!(matches!(
            grid.realize(&mut renderer, true),
            Realization::Built { first: false }
        ));
        assert_eq!(renderer.live_mesh_count(), 1);
    }
}
