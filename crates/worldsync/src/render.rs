use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::actor::record::{ActorId, MaterialRecord};
use crate::math::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeshId(pub u64);

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh#{}", self.0)
    }
}

/// A builder call: builder name plus its arguments, as persisted on the actor.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshRequest {
    pub owner: ActorId,
    pub name: String,
    pub builder: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("no mesh builder named '{builder}'")]
    MissingBuilder { builder: String },
    #[error("mesh builder '{builder}' rejected its arguments: {reason}")]
    InvalidArguments { builder: String, reason: String },
}

/// Render-side handle of a realized actor.
pub trait MeshHandle {
    fn id(&self) -> MeshId;
    fn position(&self) -> Vec3;
    fn rotation(&self) -> Vec3;
    fn scaling(&self) -> Vec3;
    fn set_position(&mut self, value: Vec3);
    fn set_rotation(&mut self, value: Vec3);
    fn set_scaling(&mut self, value: Vec3);
    fn set_visible(&mut self, visible: bool);
    fn set_parent(&mut self, parent: Option<MeshId>);
    fn set_material(&mut self, material: &MaterialRecord);
    fn set_check_collisions(&mut self, check: bool);
    fn dispose(&mut self);
}

pub trait Renderer {
    fn build_mesh(&mut self, request: &MeshRequest) -> Result<Box<dyn MeshHandle>, RenderError>;
}

pub const HEADLESS_BUILDERS: &[&str] = &[
    "CreateBox",
    "CreateSphere",
    "CreateCylinder",
    "CreatePlane",
    "CreateGround",
    "CreateDisc",
    "CreateTorus",
    "CreateLines",
    "CreateLineSystem",
    "CreateRibbon",
];

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessMesh {
    pub owner: ActorId,
    pub name: String,
    pub builder: String,
    pub position: Vec3,
    pub rotation: Vec3,
    pub scaling: Vec3,
    pub visible: bool,
    pub parent: Option<MeshId>,
    pub material: MaterialRecord,
    pub check_collisions: bool,
    pub disposed: bool,
}

#[derive(Debug, Default)]
struct HeadlessScene {
    next_id: u64,
    meshes: BTreeMap<MeshId, HeadlessMesh>,
}

static SCENE_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn lock_scene(scene: &Mutex<HeadlessScene>) -> MutexGuard<'_, HeadlessScene> {
    match scene.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            if SCENE_LOCK_POISON_WARNED
                .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                warn!("headless scene lock poisoned; recovered inner value");
            }
            poisoned.into_inner()
        }
    }
}

/// Renderer that records meshes in memory. Clones share the same scene.
#[derive(Debug, Clone, Default)]
pub struct HeadlessRenderer {
    scene: Arc<Mutex<HeadlessScene>>,
}

impl HeadlessRenderer {
    pub fn mesh(&self, id: MeshId) -> Option<HeadlessMesh> {
        lock_scene(&self.scene).meshes.get(&id).cloned()
    }

    pub fn live_meshes(&self) -> Vec<(MeshId, HeadlessMesh)> {
        lock_scene(&self.scene)
            .meshes
            .iter()
            .filter(|(_, mesh)| !mesh.disposed)
            .map(|(id, mesh)| (*id, mesh.clone()))
            .collect()
    }

    pub fn live_mesh_count(&self) -> usize {
        lock_scene(&self.scene)
            .meshes
            .values()
            .filter(|mesh| !mesh.disposed)
            .count()
    }

    pub fn built_mesh_count(&self) -> usize {
        lock_scene(&self.scene).meshes.len()
    }
}

impl Renderer for HeadlessRenderer {
    fn build_mesh(&mut self, request: &MeshRequest) -> Result<Box<dyn MeshHandle>, RenderError> {
        if !HEADLESS_BUILDERS.contains(&request.builder.as_str()) {
            return Err(RenderError::MissingBuilder {
                builder: request.builder.clone(),
            });
        }
        if request
            .args
            .iter()
            .any(|arg| !(arg.is_object() || arg.is_string() || arg.is_null()))
        {
            return Err(RenderError::InvalidArguments {
                builder: request.builder.clone(),
                reason: "expected a name or an options object".to_string(),
            });
        }

        let mut scene = lock_scene(&self.scene);
        scene.next_id += 1;
        let id = MeshId(scene.next_id);
        scene.meshes.insert(
            id,
            HeadlessMesh {
                owner: request.owner.clone(),
                name: request.name.clone(),
                builder: request.builder.clone(),
                position: Vec3::ZERO,
                rotation: Vec3::ZERO,
                scaling: Vec3::ONE,
                visible: true,
                parent: None,
                material: MaterialRecord::default(),
                check_collisions: false,
                disposed: false,
            },
        );
        Ok(Box::new(HeadlessMeshHandle {
            id,
            scene: Arc::clone(&self.scene),
        }))
    }
}

struct HeadlessMeshHandle {
    id: MeshId,
    scene: Arc<Mutex<HeadlessScene>>,
}

impl HeadlessMeshHandle {
    fn read<T>(&self, fallback: T, read: impl FnOnce(&HeadlessMesh) -> T) -> T {
        lock_scene(&self.scene)
            .meshes
            .get(&self.id)
            .map(read)
            .unwrap_or(fallback)
    }

    fn write(&mut self, write: impl FnOnce(&mut HeadlessMesh)) {
        if let Some(mesh) = lock_scene(&self.scene).meshes.get_mut(&self.id) {
            write(mesh);
        }
    }
}

impl MeshHandle for HeadlessMeshHandle {
    fn id(&self) -> MeshId {
        self.id
    }

    fn position(&self) -> Vec3 {
        self.read(Vec3::ZERO, |mesh| mesh.position)
    }

    fn rotation(&self) -> Vec3 {
        self.read(Vec3::ZERO, |mesh| mesh.rotation)
    }

    fn scaling(&self) -> Vec3 {
        self.read(Vec3::ONE, |mesh| mesh.scaling)
    }

    fn set_position(&mut self, value: Vec3) {
        self.write(|mesh| mesh.position = value);
    }

    fn set_rotation(&mut self, value: Vec3) {
        self.write(|mesh| mesh.rotation = value);
    }

    fn set_scaling(&mut self, value: Vec3) {
        self.write(|mesh| mesh.scaling = value);
    }

    fn set_visible(&mut self, visible: bool) {
        self.write(|mesh| mesh.visible = visible);
    }

    fn set_parent(&mut self, parent: Option<MeshId>) {
        self.write(|mesh| mesh.parent = parent);
    }

    fn set_material(&mut self, material: &MaterialRecord) {
        self.write(|mesh| mesh.material = material.clone());
    }

    fn set_check_collisions(&mut self, check: bool) {
        self.write(|mesh| mesh.check_collisions = check);
    }

    fn dispose(&mut self) {
        self.write(|mesh| {
            mesh.disposed = true;
            mesh.visible = false;
            mesh.parent = None;
        });
    }
}
