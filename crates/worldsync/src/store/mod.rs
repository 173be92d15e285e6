mod atomic_io;
mod memory;
mod snapshot;

use thiserror::Error;

use crate::actor::record::{ActorId, ActorRecord, TransformUpdate};
use crate::clock::Timestamp;
use crate::script::{ScriptId, WorldScript};

pub use memory::{MemoryStore, StoreSubscription, StoreWrite, SubscriptionId};
pub use snapshot::{SnapshotError, StoreSnapshot, SNAPSHOT_VERSION};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store rejected write to {collection}/{id}: {reason}")]
    Rejected {
        collection: &'static str,
        id: String,
        reason: String,
    },
    #[error("store is unavailable: {0}")]
    Unavailable(String),
}

/// Change notification delivered to watchers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ActorChanged(ActorRecord),
    ActorRemoved(ActorRecord),
    Placement(TransformUpdate),
    Waypoint(TransformUpdate),
    ScriptChanged(WorldScript),
    ScriptRemoved(WorldScript),
}

/// Write side of the document store.
pub trait Store {
    fn save_actor(&mut self, id: &ActorId, record: &ActorRecord) -> Result<(), StoreError>;
    fn save_placement(&mut self, placement: &TransformUpdate) -> Result<(), StoreError>;
    fn save_waypoint(&mut self, waypoint: &TransformUpdate) -> Result<(), StoreError>;
    /// Deletes the actor's waypoints stamped strictly before `before`.
    fn clear_waypoints(&mut self, id: &ActorId, before: Timestamp) -> Result<usize, StoreError>;
    /// Deletes the actor record together with its placement and waypoints.
    fn remove_actor(&mut self, id: &ActorId) -> Result<(), StoreError>;
    fn save_world_script(&mut self, script: &WorldScript) -> Result<(), StoreError>;
    fn remove_world_script(&mut self, id: &ScriptId) -> Result<(), StoreError>;
}
