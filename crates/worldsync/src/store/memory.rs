use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::actor::record::{ActorId, ActorRecord, TransformUpdate};
use crate::clock::Timestamp;
use crate::script::{ScriptId, WorldScript};

use super::snapshot::{SnapshotError, StoreSnapshot, SNAPSHOT_VERSION};
use super::{Store, StoreError, StoreEvent};

/// One accepted write, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    SaveActor(ActorId),
    SavePlacement(ActorId),
    SaveWaypoint {
        actor: ActorId,
        time: Option<Timestamp>,
    },
    ClearWaypoints {
        actor: ActorId,
        before: Timestamp,
        removed: usize,
    },
    RemoveActor(ActorId),
    SaveWorldScript(ScriptId),
    RemoveWorldScript(ScriptId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
struct StoredActor {
    seq: u64,
    record: ActorRecord,
}

#[derive(Debug, Default)]
struct StoreState {
    next_seq: u64,
    actors: BTreeMap<ActorId, StoredActor>,
    placements: BTreeMap<ActorId, TransformUpdate>,
    waypoints: BTreeMap<ActorId, Vec<TransformUpdate>>,
    scripts: BTreeMap<ScriptId, WorldScript>,
    next_subscription: u64,
    queues: BTreeMap<SubscriptionId, VecDeque<StoreEvent>>,
    /// `None` unless the store was opened with [`MemoryStore::recording`].
    writes: Option<Vec<StoreWrite>>,
    failure: Option<String>,
}

impl StoreState {
    fn record(&mut self, write: StoreWrite) {
        if let Some(writes) = self.writes.as_mut() {
            writes.push(write);
        }
    }

    fn broadcast(&mut self, event: StoreEvent) {
        for queue in self.queues.values_mut() {
            queue.push_back(event.clone());
        }
    }

    fn check_writable(&self, collection: &'static str, id: &str) -> Result<(), StoreError> {
        match &self.failure {
            Some(reason) => Err(StoreError::Rejected {
                collection,
                id: id.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn current_documents(&self) -> Vec<StoreEvent> {
        let mut actors: Vec<&StoredActor> = self.actors.values().collect();
        actors.sort_by_key(|stored| stored.seq);

        let mut events: Vec<StoreEvent> = self
            .scripts
            .values()
            .cloned()
            .map(StoreEvent::ScriptChanged)
            .collect();
        events.extend(
            actors
                .into_iter()
                .map(|stored| StoreEvent::ActorChanged(stored.record.clone())),
        );
        events.extend(self.placements.values().cloned().map(StoreEvent::Placement));
        events.extend(
            self.waypoints
                .values()
                .flatten()
                .cloned()
                .map(StoreEvent::Waypoint),
        );
        events
    }

    fn upsert_actor(&mut self, id: &ActorId, record: ActorRecord) {
        match self.actors.get_mut(id) {
            Some(stored) => stored.record = record,
            None => {
                self.next_seq += 1;
                let seq = self.next_seq;
                self.actors.insert(id.clone(), StoredActor { seq, record });
            }
        }
    }
}

static STORE_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn lock_state(state: &Mutex<StoreState>) -> MutexGuard<'_, StoreState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            if STORE_LOCK_POISON_WARNED
                .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                warn!("memory store lock poisoned; recovered inner value");
            }
            poisoned.into_inner()
        }
    }
}

/// In-process document store. Clones share the same documents, so several
/// worlds can write to and watch one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`MemoryStore::new`], but keeps a log of accepted writes for
    /// [`MemoryStore::writes`] and [`MemoryStore::take_writes`].
    pub fn recording() -> Self {
        let store = Self::new();
        lock_state(&store.state).writes = Some(Vec::new());
        store
    }

    /// Opens a watch. The new queue starts with every current document.
    pub fn subscribe(&self) -> StoreSubscription {
        let mut state = lock_state(&self.state);
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        let initial: VecDeque<StoreEvent> = state.current_documents().into();
        debug!(subscription = id.0, primed = initial.len(), "store_subscribed");
        state.queues.insert(id, initial);
        StoreSubscription {
            id,
            store: self.clone(),
        }
    }

    /// While set, every write is rejected with `reason`.
    pub fn set_failure(&self, reason: Option<&str>) {
        lock_state(&self.state).failure = reason.map(str::to_string);
    }

    /// Always empty on a store that is not recording.
    pub fn writes(&self) -> Vec<StoreWrite> {
        lock_state(&self.state).writes.clone().unwrap_or_default()
    }

    pub fn take_writes(&self) -> Vec<StoreWrite> {
        lock_state(&self.state)
            .writes
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub fn actor(&self, id: &ActorId) -> Option<ActorRecord> {
        lock_state(&self.state)
            .actors
            .get(id)
            .map(|stored| stored.record.clone())
    }

    pub fn actor_count(&self) -> usize {
        lock_state(&self.state).actors.len()
    }

    pub fn placement(&self, id: &ActorId) -> Option<TransformUpdate> {
        lock_state(&self.state).placements.get(id).cloned()
    }

    pub fn waypoints(&self, id: &ActorId) -> Vec<TransformUpdate> {
        lock_state(&self.state)
            .waypoints
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn script_by_path(&self, path: &str) -> Option<WorldScript> {
        lock_state(&self.state)
            .scripts
            .values()
            .find(|script| script.path == path)
            .cloned()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = lock_state(&self.state);
        let mut actors: Vec<&StoredActor> = state.actors.values().collect();
        actors.sort_by_key(|stored| stored.seq);
        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            actors: actors.into_iter().map(|stored| stored.record.clone()).collect(),
            placements: state.placements.values().cloned().collect(),
            waypoints: state.waypoints.values().flatten().cloned().collect(),
            scripts: state.scripts.values().cloned().collect(),
        }
    }

    pub fn write_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let snapshot = self.snapshot();
        snapshot.write_to(path)?;
        info!(
            path = %path.display(),
            actors = snapshot.actors.len(),
            scripts = snapshot.scripts.len(),
            "store_snapshot_written"
        );
        Ok(())
    }

    pub fn load_snapshot(path: &Path) -> Result<Self, SnapshotError> {
        let snapshot = StoreSnapshot::read_from(path)?;
        let store = Self::from_snapshot(snapshot);
        info!(
            path = %path.display(),
            actors = store.actor_count(),
            "store_snapshot_loaded"
        );
        Ok(store)
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        {
            let mut state = lock_state(&store.state);
            for record in snapshot.actors {
                if let Some(id) = record.id.clone() {
                    state.upsert_actor(&id, record);
                }
            }
            for placement in snapshot.placements {
                state
                    .placements
                    .insert(placement.actor_id.clone(), placement);
            }
            for waypoint in snapshot.waypoints {
                state
                    .waypoints
                    .entry(waypoint.actor_id.clone())
                    .or_default()
                    .push(waypoint);
            }
            for script in snapshot.scripts {
                state.scripts.insert(script.id.clone(), script);
            }
        }
        store
    }

    fn pop_events(&self, id: SubscriptionId) -> Vec<StoreEvent> {
        lock_state(&self.state)
            .queues
            .get_mut(&id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    fn pending_events(&self, id: SubscriptionId) -> usize {
        lock_state(&self.state)
            .queues
            .get(&id)
            .map_or(0, VecDeque::len)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        lock_state(&self.state).queues.remove(&id);
    }
}

impl Store for MemoryStore {
    fn save_actor(&mut self, id: &ActorId, record: &ActorRecord) -> Result<(), StoreError> {
        let mut state = lock_state(&self.state);
        state.check_writable("actors", id.as_str())?;
        let mut record = record.clone();
        record.id = Some(id.clone());
        state.upsert_actor(id, record.clone());
        state.record(StoreWrite::SaveActor(id.clone()));
        state.broadcast(StoreEvent::ActorChanged(record));
        Ok(())
    }

    fn save_placement(&mut self, placement: &TransformUpdate) -> Result<(), StoreError> {
        let mut state = lock_state(&self.state);
        state.check_writable("placements", placement.actor_id.as_str())?;
        state
            .placements
            .insert(placement.actor_id.clone(), placement.clone());
        state.record(StoreWrite::SavePlacement(placement.actor_id.clone()));
        state.broadcast(StoreEvent::Placement(placement.clone()));
        Ok(())
    }

    fn save_waypoint(&mut self, waypoint: &TransformUpdate) -> Result<(), StoreError> {
        let mut state = lock_state(&self.state);
        state.check_writable("waypoints", waypoint.actor_id.as_str())?;
        state
            .waypoints
            .entry(waypoint.actor_id.clone())
            .or_default()
            .push(waypoint.clone());
        state.record(StoreWrite::SaveWaypoint {
            actor: waypoint.actor_id.clone(),
            time: waypoint.time,
        });
        state.broadcast(StoreEvent::Waypoint(waypoint.clone()));
        Ok(())
    }

    fn clear_waypoints(&mut self, id: &ActorId, before: Timestamp) -> Result<usize, StoreError> {
        let mut state = lock_state(&self.state);
        state.check_writable("waypoints", id.as_str())?;
        let removed = match state.waypoints.get_mut(id) {
            Some(samples) => {
                let previous = samples.len();
                samples.retain(|sample| sample.time.map_or(true, |time| time >= before));
                previous - samples.len()
            }
            None => 0,
        };
        state.record(StoreWrite::ClearWaypoints {
            actor: id.clone(),
            before,
            removed,
        });
        Ok(removed)
    }

    fn remove_actor(&mut self, id: &ActorId) -> Result<(), StoreError> {
        let mut state = lock_state(&self.state);
        state.check_writable("actors", id.as_str())?;
        let removed = state.actors.remove(id);
        state.placements.remove(id);
        state.waypoints.remove(id);
        state.record(StoreWrite::RemoveActor(id.clone()));
        if let Some(stored) = removed {
            state.broadcast(StoreEvent::ActorRemoved(stored.record));
        }
        Ok(())
    }

    fn save_world_script(&mut self, script: &WorldScript) -> Result<(), StoreError> {
        let mut state = lock_state(&self.state);
        state.check_writable("scripts", script.id.as_str())?;
        state.scripts.insert(script.id.clone(), script.clone());
        state.record(StoreWrite::SaveWorldScript(script.id.clone()));
        state.broadcast(StoreEvent::ScriptChanged(script.clone()));
        Ok(())
    }

    fn remove_world_script(&mut self, id: &ScriptId) -> Result<(), StoreError> {
        let mut state = lock_state(&self.state);
        state.check_writable("scripts", id.as_str())?;
        let removed = state.scripts.remove(id);
        state.record(StoreWrite::RemoveWorldScript(id.clone()));
        if let Some(script) = removed {
            state.broadcast(StoreEvent::ScriptRemoved(script));
        }
        Ok(())
    }
}

/// Pull-based watch on a [`MemoryStore`]. Dropping it closes the watch.
#[derive(Debug)]
pub struct StoreSubscription {
    id: SubscriptionId,
    store: MemoryStore,
}

impl StoreSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn drain(&self) -> Vec<StoreEvent> {
        self.store.pop_events(self.id)
    }

    pub fn pending(&self) -> usize {
        self.store.pending_events(self.id)
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.store.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn waypoint(id: &str, millis: u64) -> TransformUpdate {
        TransformUpdate::at(id, Timestamp(millis)).with_position(Vec3::new(millis as f32, 0.0, 0.0))
    }

    #[test]
    fn new_subscription_is_primed_with_current_documents() {
        let mut store = MemoryStore::new();
        store
            .save_actor(&ActorId::from("b"), &ActorRecord::with_id("b", "grid"))
            .expect("save b");
        store
            .save_actor(&ActorId::from("a"), &ActorRecord::with_id("a", "primitive"))
            .expect("save a");
        store
            .save_placement(&TransformUpdate::at("a", Timestamp(5)))
            .expect("placement");

        let subscription = store.subscribe();
        let events = subscription.drain();
        let kinds: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                StoreEvent::ActorChanged(record) => Some(record.kind.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec!["grid", "primitive"]);
        assert!(matches!(events.last(), Some(StoreEvent::Placement(_))));
        assert_eq!(subscription.pending(), 0);
    }

    #[test]
    fn writes_fan_out_to_every_subscription() {
        let mut store = MemoryStore::new();
        let first = store.subscribe();
        let second = store.subscribe();

        store.save_waypoint(&waypoint("w", 100)).expect("waypoint");

        assert_eq!(first.drain().len(), 1);
        assert_eq!(second.drain().len(), 1);
        drop(second);
        store.save_waypoint(&waypoint("w", 200)).expect("waypoint");
        assert_eq!(first.drain().len(), 1);
    }

    #[test]
    fn clear_waypoints_keeps_samples_at_or_after_cutoff() {
        let mut store = MemoryStore::new();
        for millis in [1_000, 4_999, 5_000, 9_000] {
            store.save_waypoint(&waypoint("w", millis)).expect("waypoint");
        }

        let removed = store
            .clear_waypoints(&ActorId::from("w"), Timestamp(5_000))
            .expect("clear");

        assert_eq!(removed, 2);
        let remaining: Vec<Option<Timestamp>> = store
            .waypoints(&ActorId::from("w"))
            .iter()
            .map(|sample| sample.time)
            .collect();
        assert_eq!(remaining, vec![Some(Timestamp(5_000)), Some(Timestamp(9_000))]);
    }

    #[test]
    fn remove_actor_purges_placement_and_waypoints() {
        let mut store = MemoryStore::new();
        let id = ActorId::from("gone");
        store
            .save_actor(&id, &ActorRecord::with_id("gone", "primitive"))
            .expect("save");
        store
            .save_placement(&TransformUpdate::at("gone", Timestamp(1)))
            .expect("placement");
        store.save_waypoint(&waypoint("gone", 2)).expect("waypoint");
        let watcher = store.subscribe();
        watcher.drain();

        store.remove_actor(&id).expect("remove");

        assert!(store.actor(&id).is_none());
        assert!(store.placement(&id).is_none());
        assert!(store.waypoints(&id).is_empty());
        assert!(matches!(
            watcher.drain().as_slice(),
            [StoreEvent::ActorRemoved(_)]
        ));
    }

    #[test]
    fn injected_failure_rejects_without_recording() {
        let mut store = MemoryStore::recording();
        store.set_failure(Some("offline"));
        let error = store
            .save_actor(&ActorId::from("x"), &ActorRecord::with_id("x", "grid"))
            .expect_err("rejected");
        assert!(matches!(error, StoreError::Rejected { collection: "actors", .. }));
        assert!(store.writes().is_empty());

        store.set_failure(None);
        store
            .save_actor(&ActorId::from("x"), &ActorRecord::with_id("x", "grid"))
            .expect("accepted");
        assert_eq!(store.take_writes(), vec![StoreWrite::SaveActor(ActorId::from("x"))]);
        assert!(store.writes().is_empty());
    }

    #[test]
    fn write_log_is_kept_only_when_recording() {
        let mut plain = MemoryStore::new();
        let mut recorded = MemoryStore::recording();
        for millis in 0..1_000 {
            plain.save_waypoint(&waypoint("w", millis)).expect("plain");
            recorded.save_waypoint(&waypoint("w", millis)).expect("recorded");
        }

        assert!(plain.writes().is_empty());
        assert!(plain.take_writes().is_empty());
        assert_eq!(plain.waypoints(&ActorId::from("w")).len(), 1_000);
        assert_eq!(recorded.take_writes().len(), 1_000);
        assert!(recorded.writes().is_empty());
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("world.json");
        let mut store = MemoryStore::new();
        store
            .save_actor(&ActorId::from("a"), &ActorRecord::with_id("a", "wall"))
            .expect("save");
        store
            .save_world_script(&WorldScript::new("boot", "echo hi"))
            .expect("script");
        store.write_snapshot(&path).expect("write snapshot");

        let restored = MemoryStore::load_snapshot(&path).expect("load snapshot");

        assert_eq!(restored.actor_count(), 1);
        assert_eq!(
            restored.actor(&ActorId::from("a")).map(|record| record.kind),
            Some("wall".to_string())
        );
        assert!(restored.script_by_path("boot").is_some());
    }
}
