pub mod actor;
pub mod clock;
pub mod config;
pub mod math;
pub mod metrics;
pub mod render;
pub mod script;
pub mod store;
pub mod sync;
pub mod world;

pub use actor::kind::{
    GenericData, GridData, GridType, KindBehavior, KindData, KindRegistry, PathData,
    PrimitiveData, WallData,
};
pub use actor::record::{
    ActorId, ActorRecord, ColorRecord, HandlerBinding, MaterialRecord, TextureRecord,
    TransformUpdate,
};
pub use actor::{
    parse_component, Actor, ActorError, Axis, ComponentInput, IgnoreReason, Lifecycle,
    PlacementOutcome, RenderSlot, TransformChannel, TransformState, UnrealizedMesh,
    WaypointOutcome, WaypointVector,
};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{ConfigError, SyncConfig};
pub use math::Vec3;
pub use metrics::{MetricsHandle, SyncMetricsSnapshot};
pub use render::{
    HeadlessMesh, HeadlessRenderer, MeshHandle, MeshId, MeshRequest, RenderError, Renderer,
};
pub use script::{
    NoopScriptRunner, ScriptError, ScriptId, ScriptInvocation, ScriptLibrary, ScriptRunner,
    WorldScript,
};
pub use store::{
    MemoryStore, SnapshotError, Store, StoreError, StoreEvent, StoreSnapshot, StoreSubscription,
    StoreWrite,
};
pub use world::{
    EventPayload, FlushReport, LoadedCallback, TickReport, World, WorldCommand, WorldServices,
};
