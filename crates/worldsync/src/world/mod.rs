mod commands;
mod events;
mod lookup;

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::{json, Map};
use tracing::{debug, error, info, trace, warn};

use crate::actor::kind::{KindData, KindRegistry};
use crate::actor::record::{ActorId, ActorRecord, TransformUpdate};
use crate::actor::{
    Actor, ActorError, PlacementOutcome, Realization, TransformChannel, WaypointOutcome,
    WaypointVector,
};
use crate::clock::{Clock, Timestamp};
use crate::config::SyncConfig;
use crate::math::Vec3;
use crate::metrics::{MetricsAccumulator, MetricsHandle, SyncMetricsSnapshot};
use crate::render::{HeadlessRenderer, Renderer};
use crate::script::{NoopScriptRunner, ScriptInvocation, ScriptLibrary, ScriptRunner, WorldScript};
use crate::store::{Store, StoreError, StoreEvent};

pub use commands::WorldCommand;
pub use events::EventPayload;

pub type LoadedCallback = Box<dyn FnOnce(&mut World, &ActorId)>;

/// External collaborators a world talks to.
pub struct WorldServices {
    pub store: Box<dyn Store>,
    pub renderer: Box<dyn Renderer>,
    pub runner: Box<dyn ScriptRunner>,
    pub clock: Box<dyn Clock>,
}

impl WorldServices {
    pub fn new(
        store: impl Store + 'static,
        renderer: impl Renderer + 'static,
        runner: impl ScriptRunner + 'static,
        clock: impl Clock + 'static,
    ) -> Self {
        Self {
            store: Box::new(store),
            renderer: Box::new(renderer),
            runner: Box::new(runner),
            clock: Box::new(clock),
        }
    }

    /// In-memory renderer and a runner that ignores scripts.
    pub fn headless(store: impl Store + 'static, clock: impl Clock + 'static) -> Self {
        Self::new(store, HeadlessRenderer::default(), NoopScriptRunner, clock)
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    pub fn with_runner(mut self, runner: impl ScriptRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub channels_written: usize,
    pub placements_written: usize,
    pub waypoint_clears: usize,
    pub commands_applied: usize,
    pub flushed: FlushReport,
}

/// The actor registry for one client. All mutation goes through `&mut self`.
pub struct World {
    config: SyncConfig,
    kinds: KindRegistry,
    store: Box<dyn Store>,
    renderer: Box<dyn Renderer>,
    runner: Box<dyn ScriptRunner>,
    clock: Box<dyn Clock>,
    actors: Vec<Actor>,
    index: HashMap<ActorId, usize>,
    pending_placements: HashMap<ActorId, TransformUpdate>,
    loaded_callbacks: HashMap<ActorId, Vec<LoadedCallback>>,
    scripts: ScriptLibrary,
    commands: VecDeque<WorldCommand>,
    draining: bool,
    flush_requested: bool,
    metrics: MetricsAccumulator,
    metrics_handle: MetricsHandle,
}

impl World {
    pub fn new(config: SyncConfig, services: WorldServices) -> Self {
        Self {
            config,
            kinds: KindRegistry::default(),
            store: services.store,
            renderer: services.renderer,
            runner: services.runner,
            clock: services.clock,
            actors: Vec::new(),
            index: HashMap::new(),
            pending_placements: HashMap::new(),
            loaded_callbacks: HashMap::new(),
            scripts: ScriptLibrary::default(),
            commands: VecDeque::new(),
            draining: false,
            flush_requested: false,
            metrics: MetricsAccumulator::default(),
            metrics_handle: MetricsHandle::default(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn kinds_mut(&mut self) -> &mut KindRegistry {
        &mut self.kinds
    }

    pub fn scripts(&self) -> &ScriptLibrary {
        &self.scripts
    }

    pub fn metrics_handle(&self) -> MetricsHandle {
        self.metrics_handle.clone()
    }

    pub fn metrics_snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            actors: self.actors.len(),
            active_tweens: self.active_tween_count(),
            ..self.metrics.totals()
        }
    }

    pub fn pending_placement_count(&self) -> usize {
        self.pending_placements.len()
    }

    /// Registers a new actor or re-initializes the existing one in place.
    pub fn upsert_from_definition(&mut self, record: ActorRecord) -> ActorId {
        let id = record.id.clone().unwrap_or_else(ActorId::generate);

        if let Some(slot) = self.index.get(&id).copied() {
            let rebuild = self.actors[slot].reinit(&record, &self.kinds);
            let realization = self.actors[slot].realize(self.renderer.as_mut(), rebuild);
            debug!(
                actor = %id,
                kind = self.actors[slot].kind().tag(),
                rebuild,
                "actor_reinitialized"
            );
            self.link_parent(&id);
            self.after_realization(&id, realization);
            self.settle();
            return id;
        }

        let kind = self.kinds.construct(&record);
        let mut actor = Actor::from_record(id.clone(), kind, &record, &self.config);
        let realization = actor.realize(self.renderer.as_mut(), true);
        info!(actor = %id, kind = actor.kind().tag(), "actor_registered");
        self.index.insert(id.clone(), self.actors.len());
        self.actors.push(actor);

        self.link_parent(&id);
        if let Some(placement) = self.pending_placements.remove(&id) {
            self.apply_placement(placement);
        }
        if let Some(callbacks) = self.loaded_callbacks.remove(&id) {
            for callback in callbacks {
                callback(self, &id);
            }
        }
        self.after_realization(&id, realization);
        self.settle();
        id
    }

    /// Destroys and evicts the actor a removal notice names. Returns whether
    /// a live actor was evicted.
    pub fn remove_from_definition(&mut self, record: &ActorRecord) -> bool {
        let Some(id) = record.id.as_ref() else {
            return false;
        };
        self.pending_placements.remove(id);
        let removed = self.evict(id);
        if removed {
            info!(actor = %id, "actor_removed");
            self.relink_children(id);
        }
        removed
    }

    /// Replays definitions ordered by ascending priority; ties keep input order.
    pub fn load_definitions(&mut self, mut records: Vec<ActorRecord>) -> usize {
        records.sort_by_key(|record| record.priority);
        let count = records.len();
        for record in records {
            self.upsert_from_definition(record);
        }
        count
    }

    /// Creates an actor locally. It stays dirty until the next flush.
    pub fn spawn(&mut self, mut record: ActorRecord) -> ActorId {
        let id = record.id.get_or_insert_with(ActorId::generate).clone();
        self.upsert_from_definition(record);
        if let Some(actor) = self.actor_mut(&id) {
            actor.mark_dirty();
        }
        id
    }

    pub fn apply_placement(&mut self, placement: TransformUpdate) -> PlacementOutcome {
        let Some(slot) = self.index.get(&placement.actor_id).copied() else {
            debug!(actor = %placement.actor_id, "placement_buffered");
            self.metrics.record_placement_buffered();
            self.pending_placements
                .insert(placement.actor_id.clone(), placement);
            return PlacementOutcome::Buffered;
        };

        let outcome = self.actors[slot].apply_placement(&placement);
        match outcome {
            PlacementOutcome::Applied => {
                self.metrics.record_placement_applied();
                let mut data = Map::new();
                if let Some(time) = placement.time {
                    data.insert("time".to_string(), json!(time.as_millis()));
                }
                self.trigger(&placement.actor_id, "placed", data);
                self.settle();
            }
            PlacementOutcome::Ignored(reason) => {
                trace!(actor = %placement.actor_id, ?reason, "placement_ignored");
                self.metrics.record_placement_ignored();
            }
            PlacementOutcome::Buffered => {}
        }
        outcome
    }

    pub fn apply_waypoint(&mut self, waypoint: TransformUpdate) -> WaypointOutcome {
        let now = self.clock.now();
        if let Some(time) = waypoint.time {
            if now.since(time) > self.config.stale_waypoint_window {
                trace!(actor = %waypoint.actor_id, %time, %now, "waypoint_expired");
                self.metrics.record_waypoint_stale();
                return WaypointOutcome::Expired;
            }
        }
        let Some(slot) = self.index.get(&waypoint.actor_id).copied() else {
            self.metrics.record_waypoint_unknown_target();
            return WaypointOutcome::UnknownTarget;
        };

        let outcome =
            self.actors[slot].apply_waypoint(&waypoint, now, self.config.min_tween_duration);
        match outcome {
            WaypointOutcome::Applied { .. } => self.metrics.record_waypoint_applied(),
            WaypointOutcome::Stale | WaypointOutcome::MissingTime => {
                self.metrics.record_waypoint_stale()
            }
            WaypointOutcome::Expired | WaypointOutcome::UnknownTarget => {}
        }
        outcome
    }

    /// Runs `callback` now if `id` is registered, otherwise once at registration.
    pub fn run_when_loaded(
        &mut self,
        id: ActorId,
        callback: impl FnOnce(&mut World, &ActorId) + 'static,
    ) {
        if self.index.contains_key(&id) {
            callback(self, &id);
        } else {
            self.loaded_callbacks
                .entry(id)
                .or_default()
                .push(Box::new(callback));
        }
    }

    pub fn apply_store_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::ActorChanged(record) => {
                if record.id.is_none() {
                    warn!(kind = %record.kind, "actor_definition_without_id");
                    return;
                }
                self.upsert_from_definition(record);
            }
            StoreEvent::ActorRemoved(record) => {
                self.remove_from_definition(&record);
            }
            StoreEvent::Placement(placement) => {
                self.apply_placement(placement);
            }
            StoreEvent::Waypoint(waypoint) => {
                self.apply_waypoint(waypoint);
            }
            StoreEvent::ScriptChanged(script) => {
                debug!(script = %script.path, "world_script_updated");
                if let Some(due) = self.scripts.upsert(script) {
                    self.execute_script(&due, &ScriptInvocation::default());
                    self.settle();
                }
            }
            StoreEvent::ScriptRemoved(script) => {
                debug!(script = %script.path, "world_script_removed");
                self.scripts.remove(&script.id);
            }
        }
    }

    /// Local removal: children first, then this actor's own documents.
    /// Returns how many actors were evicted.
    pub fn remove_actor(&mut self, id: &ActorId) -> Result<usize, ActorError> {
        if !self.index.contains_key(id) {
            return Err(ActorError::UnknownActor(id.clone()));
        }
        let mut visited = HashSet::new();
        Ok(self.remove_cascade(id, &mut visited))
    }

    fn remove_cascade(&mut self, id: &ActorId, visited: &mut HashSet<ActorId>) -> usize {
        if !visited.insert(id.clone()) {
            return 0;
        }
        let mut removed = 0;
        for child in self.children_of(id) {
            removed += self.remove_cascade(&child, visited);
        }
        if let Err(error) = self.store.remove_actor(id) {
            self.report_store_failure(id, "remove_actor", &error);
        }
        self.pending_placements.remove(id);
        if self.evict(id) {
            info!(actor = %id, "actor_removed");
            removed += 1;
        }
        removed
    }

    pub fn set_transform(
        &mut self,
        id: &ActorId,
        channel: TransformChannel,
        value: Vec3,
    ) -> Result<(), ActorError> {
        let slot = self.slot(id)?;
        let now = self.clock.now();
        let waypoint = self.actors[slot].write_local(channel, value, now);
        if let Err(error) = self.store.save_waypoint(&waypoint) {
            self.report_store_failure(id, "save_waypoint", &error);
        }
        Ok(())
    }

    pub fn set_position(&mut self, id: &ActorId, value: Vec3) -> Result<(), ActorError> {
        self.set_transform(id, TransformChannel::Position, value)
    }

    pub fn set_rotation(&mut self, id: &ActorId, value: Vec3) -> Result<(), ActorError> {
        self.set_transform(id, TransformChannel::Rotation, value)
    }

    pub fn set_scaling(&mut self, id: &ActorId, value: Vec3) -> Result<(), ActorError> {
        self.set_transform(id, TransformChannel::Scaling, value)
    }

    pub fn position_vector(&mut self, id: &ActorId) -> Result<WaypointVector<'_>, ActorError> {
        self.vector(id, TransformChannel::Position)
    }

    pub fn rotation_vector(&mut self, id: &ActorId) -> Result<WaypointVector<'_>, ActorError> {
        self.vector(id, TransformChannel::Rotation)
    }

    pub fn scaling_vector(&mut self, id: &ActorId) -> Result<WaypointVector<'_>, ActorError> {
        self.vector(id, TransformChannel::Scaling)
    }

    fn vector(
        &mut self,
        id: &ActorId,
        channel: TransformChannel,
    ) -> Result<WaypointVector<'_>, ActorError> {
        self.slot(id)?;
        Ok(WaypointVector::new(self, id.clone(), channel))
    }

    /// Edits kind data (grid size, path nodes, ...) and rebuilds the mesh.
    pub fn edit_kind(
        &mut self,
        id: &ActorId,
        edit: impl FnOnce(&mut KindData),
    ) -> Result<(), ActorError> {
        let slot = self.slot(id)?;
        edit(self.actors[slot].kind_mut());
        let realization = self.actors[slot].realize(self.renderer.as_mut(), true);
        self.after_realization(id, realization);
        self.settle();
        Ok(())
    }

    pub fn set_parent(
        &mut self,
        id: &ActorId,
        parent: Option<ActorId>,
    ) -> Result<(), ActorError> {
        let slot = self.slot(id)?;
        self.actors[slot].set_parent(parent);
        self.actors[slot].set_parent_mesh(None);
        self.link_parent(id);
        Ok(())
    }

    /// Writes the actor record now, regardless of the dirty flag.
    pub fn save_actor(&mut self, id: &ActorId) -> Result<(), ActorError> {
        let slot = self.slot(id)?;
        self.persist(slot);
        Ok(())
    }

    /// Saves every dirty actor. The flag clears only on a confirmed write.
    pub fn flush_all(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        for slot in 0..self.actors.len() {
            if !self.actors[slot].is_dirty() {
                continue;
            }
            if self.persist(slot) {
                report.saved += 1;
            } else {
                report.failed += 1;
            }
        }
        if report.saved + report.failed > 0 {
            debug!(saved = report.saved, failed = report.failed, "flush_complete");
        }
        report
    }

    fn persist(&mut self, slot: usize) -> bool {
        let actor = &mut self.actors[slot];
        let record = actor.to_record();
        match self.store.save_actor(actor.id(), &record) {
            Ok(()) => {
                actor.mark_saved();
                true
            }
            Err(error) => {
                let id = actor.id().clone();
                self.report_store_failure(&id, "save_actor", &error);
                false
            }
        }
    }

    /// One frame: advance tweens, fire due debounced writes, apply queued
    /// script commands, publish metrics.
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        let mut report = TickReport::default();
        let mut failures = Vec::new();

        for actor in &mut self.actors {
            report.channels_written += actor.advance_tweens(now);
            let due = actor.poll_persistence(now);
            if due.placement {
                match self.store.save_placement(&actor.transform_sample(now)) {
                    Ok(()) => report.placements_written += 1,
                    Err(error) => failures.push((actor.id().clone(), "save_placement", error)),
                }
            }
            if due.clear_waypoints {
                if let Some(cutoff) = actor.waypoint_cutoff(self.config.waypoint_retention) {
                    match self.store.clear_waypoints(actor.id(), cutoff) {
                        Ok(removed) => {
                            report.waypoint_clears += 1;
                            debug!(actor = %actor.id(), %cutoff, removed, "waypoints_cleared");
                        }
                        Err(error) => {
                            failures.push((actor.id().clone(), "clear_waypoints", error))
                        }
                    }
                }
            }
        }
        for (id, operation, error) in failures {
            self.report_store_failure(&id, operation, &error);
        }

        report.commands_applied = self.drain_commands();
        if self.flush_requested {
            self.flush_requested = false;
            report.flushed = self.flush_all();
        }
        self.publish_metrics();
        report
    }

    /// Runs a world script by path, then flushes dirty actors.
    pub fn run_script(&mut self, path: &str, invocation: ScriptInvocation) -> bool {
        let Some(script) = self.scripts.by_path(path).cloned() else {
            warn!(script = path, "script_not_found");
            return false;
        };
        self.execute_script(&script, &invocation);
        self.settle();
        true
    }

    /// Runs the script at `path` once, as soon as it is loaded.
    pub fn run_script_when_loaded(&mut self, path: &str) {
        if let Some(script) = self.scripts.request_run_when_loaded(path) {
            self.execute_script(&script, &ScriptInvocation::default());
            self.settle();
        }
    }

    pub fn save_world_script(&mut self, script: WorldScript) -> Result<(), StoreError> {
        self.store.save_world_script(&script)?;
        if let Some(due) = self.scripts.upsert(script) {
            self.execute_script(&due, &ScriptInvocation::default());
            self.settle();
        }
        Ok(())
    }

    pub fn remove_world_script(&mut self, path: &str) -> Result<bool, StoreError> {
        let Some(id) = self.scripts.by_path(path).map(|script| script.id.clone()) else {
            return Ok(false);
        };
        self.store.remove_world_script(&id)?;
        self.scripts.remove(&id);
        Ok(true)
    }

    pub fn queue_command(&mut self, command: WorldCommand) {
        self.commands.push_back(command);
    }

    pub fn queued_commands(&self) -> usize {
        self.commands.len()
    }

    fn execute_script(&mut self, script: &WorldScript, invocation: &ScriptInvocation) {
        match self.runner.run(script, invocation) {
            Ok(commands) => {
                debug!(script = %script.path, commands = commands.len(), "script_ran");
                self.commands.extend(commands);
                self.flush_requested = true;
            }
            Err(error) => {
                self.metrics.record_script_failed();
                error!(script = %script.path, error = %error, "script_failed");
            }
        }
    }

    /// Applies queued commands and any flush they asked for. Re-entrant calls
    /// leave the work to the outermost caller.
    fn settle(&mut self) -> usize {
        if self.draining {
            return 0;
        }
        let applied = self.drain_commands();
        if self.flush_requested {
            self.flush_requested = false;
            self.flush_all();
        }
        applied
    }

    fn drain_commands(&mut self) -> usize {
        if self.draining {
            return 0;
        }
        self.draining = true;
        let mut applied = 0;
        while applied < self.config.max_commands_per_drain {
            let Some(command) = self.commands.pop_front() else {
                break;
            };
            if let Err(error) = self.apply_command(command) {
                warn!(error = %error, "world_command_failed");
            }
            applied += 1;
        }
        if !self.commands.is_empty() {
            warn!(remaining = self.commands.len(), "world_command_budget_exhausted");
        }
        self.draining = false;
        applied
    }

    fn after_realization(&mut self, id: &ActorId, realization: Realization) {
        match realization {
            Realization::Built { first } => {
                let is_primitive = self
                    .actor(id)
                    .is_some_and(|actor| actor.kind().is_primitive());
                if first && is_primitive {
                    self.trigger(id, "created", Map::new());
                }
                self.relink_children(id);
            }
            Realization::Skipped => self.relink_children(id),
            Realization::Failed(_) => {
                debug!(actor = %id, "actor_left_unrealized");
            }
            Realization::Refreshed => {}
        }
    }

    /// Points every child at the parent's current mesh, or detaches them when
    /// the parent has none.
    fn relink_children(&mut self, parent: &ActorId) {
        let mesh = self.actor(parent).and_then(|actor| actor.render().mesh_id());
        for child in self.children_of(parent) {
            if let Some(actor) = self.actor_mut(&child) {
                actor.set_parent_mesh(mesh);
            }
        }
    }

    /// Links `id` to its parent's mesh when the parent is loaded. Otherwise the
    /// parent picks the child up when it registers.
    fn link_parent(&mut self, id: &ActorId) {
        let Some(parent) = self.actor(id).and_then(|actor| actor.parent().cloned()) else {
            return;
        };
        if !self.index.contains_key(&parent) {
            trace!(actor = %id, parent = %parent, "parent_pending");
            return;
        }
        let parent_mesh = self.actor(&parent).and_then(|actor| actor.render().mesh_id());
        if parent_mesh.is_none() {
            debug!(actor = %id, parent = %parent, "parent_mesh_unavailable");
        }
        if let Some(actor) = self.actor_mut(id) {
            actor.set_parent_mesh(parent_mesh);
        }
    }

    fn evict(&mut self, id: &ActorId) -> bool {
        let Some(slot) = self.index.remove(id) else {
            return false;
        };
        let mut actor = self.actors.remove(slot);
        actor.dispose();
        self.index = self
            .actors
            .iter()
            .enumerate()
            .map(|(slot, actor)| (actor.id().clone(), slot))
            .collect();
        true
    }

    fn slot(&self, id: &ActorId) -> Result<usize, ActorError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| ActorError::UnknownActor(id.clone()))
    }

    fn report_store_failure(&mut self, id: &ActorId, operation: &'static str, error: &StoreError) {
        self.metrics.record_store_write_failed();
        warn!(actor = %id, operation, error = %error, "store_write_failed");
    }

    fn active_tween_count(&self) -> usize {
        self.actors.iter().map(Actor::active_tweens).sum()
    }

    fn publish_metrics(&mut self) {
        let active = self.active_tween_count();
        let snapshot = self.metrics.snapshot(self.actors.len(), active);
        self.metrics_handle.publish(snapshot);
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
