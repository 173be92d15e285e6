use std::collections::HashMap;

use serde_json::{json, Value};

use crate::actor::record::{ActorId, ActorRecord, TextureRecord};
use crate::math::Vec3;
use crate::render::MeshRequest;

pub const DEFAULT_GRID_SIZE: f32 = 20.0;
pub const DEFAULT_WALL_WIDTH: f32 = 2.0;
pub const DEFAULT_WALL_HEIGHT: f32 = 10.0;

/// Kind-specific behavior shared by every actor variant.
pub trait KindBehavior {
    fn tag(&self) -> &str;

    /// Re-reads kind fields from a definition.
    fn reinit(&mut self, record: &ActorRecord);

    fn mesh_request(&self, owner: &ActorId, name: &str) -> Option<MeshRequest>;

    /// Whether every re-init disposes and rebuilds the mesh.
    fn rebuilds_on_init(&self) -> bool {
        true
    }

    fn write_record(&self, record: &mut ActorRecord);

    /// Added to placed and tweened positions before they reach the mesh.
    fn placement_offset(&self) -> Vec3 {
        Vec3::ZERO
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericData {
    pub tag: String,
}

impl KindBehavior for GenericData {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn reinit(&mut self, record: &ActorRecord) {
        if !record.kind.is_empty() {
            self.tag.clone_from(&record.kind);
        }
    }

    fn mesh_request(&self, _owner: &ActorId, _name: &str) -> Option<MeshRequest> {
        None
    }

    fn write_record(&self, record: &mut ActorRecord) {
        record.kind.clone_from(&self.tag);
    }
}

/// A mesh-builder call: `[builder, args...]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimitiveData {
    pub call: Option<Vec<Value>>,
}

impl PrimitiveData {
    pub fn builder(&self) -> Option<&str> {
        self.call.as_ref()?.first()?.as_str()
    }

    /// Replaces the builder call, e.g. `["CreateBox", "box", {"size": 2}]`.
    pub fn set_call(&mut self, builder: &str, args: Vec<Value>) {
        let mut call = Vec::with_capacity(args.len() + 1);
        call.push(Value::String(builder.to_string()));
        call.extend(args);
        self.call = Some(call);
    }
}

impl KindBehavior for PrimitiveData {
    fn tag(&self) -> &str {
        "primitive"
    }

    fn reinit(&mut self, record: &ActorRecord) {
        self.call.clone_from(&record.primitive);
    }

    fn mesh_request(&self, owner: &ActorId, name: &str) -> Option<MeshRequest> {
        let call = self.call.as_ref()?;
        let builder = match call.first() {
            Some(Value::String(builder)) => builder.clone(),
            Some(other) => other.to_string(),
            None => return None,
        };
        Some(MeshRequest {
            owner: owner.clone(),
            name: name.to_string(),
            builder,
            args: call[1..].to_vec(),
        })
    }

    fn rebuilds_on_init(&self) -> bool {
        false
    }

    fn write_record(&self, record: &mut ActorRecord) {
        record.kind = self.tag().to_string();
        record.primitive.clone_from(&self.call);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridType {
    Square,
    Hex,
}

impl GridType {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(value) if value.eq_ignore_ascii_case("hex") => Self::Hex,
            _ => Self::Square,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Square => "square",
            Self::Hex => "hex",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridData {
    pub grid_type: GridType,
    pub size: Option<f32>,
    pub width: f32,
    pub height: f32,
}

impl Default for GridData {
    fn default() -> Self {
        Self {
            grid_type: GridType::Square,
            size: None,
            width: 0.0,
            height: 0.0,
        }
    }
}

impl GridData {
    pub fn cell_size(&self) -> f32 {
        match self.size {
            Some(size) if size > 0.0 => size,
            _ => DEFAULT_GRID_SIZE,
        }
    }

    /// Distance the line system is shifted so a grid line passes through the
    /// origin, with one padding cell when the half extent is not covered.
    fn square_offset(half_extent: f32, size: f32) -> f32 {
        let covered = (half_extent / size).floor() * size;
        let pad = if covered < half_extent - 1.0 { size } else { 0.0 };
        covered + pad
    }
}

impl KindBehavior for GridData {
    fn tag(&self) -> &str {
        "grid"
    }

    fn reinit(&mut self, record: &ActorRecord) {
        self.grid_type = GridType::parse(record.grid_type.as_deref());
        self.size = record.grid_size;
        self.width = record.grid_width.unwrap_or(0.0);
        self.height = record.grid_height.unwrap_or(0.0);
    }

    fn mesh_request(&self, owner: &ActorId, name: &str) -> Option<MeshRequest> {
        Some(MeshRequest {
            owner: owner.clone(),
            name: name.to_string(),
            builder: "CreateLineSystem".to_string(),
            args: vec![
                json!("grid"),
                json!({
                    "gridType": self.grid_type.as_str(),
                    "gridSize": self.cell_size(),
                    "gridWidth": self.width,
                    "gridHeight": self.height,
                }),
            ],
        })
    }

    fn write_record(&self, record: &mut ActorRecord) {
        record.kind = self.tag().to_string();
        record.grid_type = Some(self.grid_type.as_str().to_string());
        record.grid_size = self.size;
        record.grid_width = Some(self.width);
        record.grid_height = Some(self.height);
    }

    fn placement_offset(&self) -> Vec3 {
        let half_width = (self.width / 2.0).round();
        let half_height = (self.height / 2.0).round();
        match self.grid_type {
            GridType::Hex => Vec3::new(-half_width, 1.0, -half_height),
            GridType::Square => {
                let size = self.cell_size();
                Vec3::new(
                    -Self::square_offset(half_width, size),
                    2.0,
                    -Self::square_offset(half_height, size),
                )
            }
        }
    }
}

/// Polyline through world-space nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathData {
    pub nodes: Vec<Vec3>,
}

impl PathData {
    pub fn add_node(&mut self, node: Vec3) {
        self.nodes.push(node);
    }

    pub fn first_node(&self) -> Option<Vec3> {
        self.nodes.first().copied()
    }

    pub fn last_node(&self) -> Option<Vec3> {
        self.nodes.last().copied()
    }

    fn nodes_json(&self) -> Value {
        Value::Array(
            self.nodes
                .iter()
                .map(|node| json!({"x": node.x, "y": node.y, "z": node.z}))
                .collect(),
        )
    }
}

impl KindBehavior for PathData {
    fn tag(&self) -> &str {
        "path"
    }

    fn reinit(&mut self, record: &ActorRecord) {
        self.nodes = record.nodes.clone().unwrap_or_default();
    }

    fn mesh_request(&self, owner: &ActorId, name: &str) -> Option<MeshRequest> {
        if self.nodes.is_empty() {
            return None;
        }
        Some(MeshRequest {
            owner: owner.clone(),
            name: name.to_string(),
            builder: "CreateLines".to_string(),
            args: vec![json!("path"), json!({ "points": self.nodes_json() })],
        })
    }

    fn write_record(&self, record: &mut ActorRecord) {
        record.kind = self.tag().to_string();
        record.nodes = Some(self.nodes.clone());
    }
}

/// A path extruded into wall segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WallData {
    pub path: PathData,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub primary_texture: Option<TextureRecord>,
    pub secondary_texture: Option<TextureRecord>,
}

impl WallData {
    pub fn width(&self) -> f32 {
        self.width.filter(|w| *w > 0.0).unwrap_or(DEFAULT_WALL_WIDTH)
    }

    pub fn height(&self) -> f32 {
        self.height.filter(|h| *h > 0.0).unwrap_or(DEFAULT_WALL_HEIGHT)
    }

    /// Appends a node. Once there are more than two nodes, an end that lands
    /// within one wall width of the start snaps onto it and closes the wall.
    pub fn add_node(&mut self, node: Vec3) {
        self.path.add_node(node);
        if self.path.nodes.len() <= 2 {
            return;
        }
        let (Some(first), Some(last)) = (self.path.first_node(), self.path.last_node()) else {
            return;
        };
        if first.distance(last) <= self.width() {
            if let Some(end) = self.path.nodes.last_mut() {
                *end = first;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        match (self.path.first_node(), self.path.last_node()) {
            (Some(first), Some(last)) => self.path.nodes.len() > 1 && first == last,
            _ => false,
        }
    }
}

impl KindBehavior for WallData {
    fn tag(&self) -> &str {
        "wall"
    }

    fn reinit(&mut self, record: &ActorRecord) {
        self.path.reinit(record);
        self.width = record.width;
        self.height = record.height;
        self.primary_texture.clone_from(&record.primary_texture);
        self.secondary_texture.clone_from(&record.secondary_texture);
    }

    fn mesh_request(&self, owner: &ActorId, name: &str) -> Option<MeshRequest> {
        if self.path.nodes.is_empty() {
            return None;
        }
        Some(MeshRequest {
            owner: owner.clone(),
            name: name.to_string(),
            builder: "CreateRibbon".to_string(),
            args: vec![
                json!("wall"),
                json!({
                    "points": self.path.nodes_json(),
                    "width": self.width(),
                    "height": self.height(),
                    "closed": self.is_closed(),
                }),
            ],
        })
    }

    fn write_record(&self, record: &mut ActorRecord) {
        self.path.write_record(record);
        record.kind = self.tag().to_string();
        if record.name.is_empty() {
            record.name = "wall".to_string();
        }
        record.width = self.width;
        record.height = self.height;
        record.primary_texture.clone_from(&self.primary_texture);
        record.secondary_texture.clone_from(&self.secondary_texture);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KindData {
    Generic(GenericData),
    Primitive(PrimitiveData),
    Grid(GridData),
    Path(PathData),
    Wall(WallData),
}

impl KindData {
    pub fn behavior(&self) -> &dyn KindBehavior {
        match self {
            Self::Generic(data) => data,
            Self::Primitive(data) => data,
            Self::Grid(data) => data,
            Self::Path(data) => data,
            Self::Wall(data) => data,
        }
    }

    pub fn behavior_mut(&mut self) -> &mut dyn KindBehavior {
        match self {
            Self::Generic(data) => data,
            Self::Primitive(data) => data,
            Self::Grid(data) => data,
            Self::Path(data) => data,
            Self::Wall(data) => data,
        }
    }

    pub fn tag(&self) -> &str {
        self.behavior().tag()
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Primitive(_))
    }
}

pub type KindConstructor = fn(&ActorRecord) -> KindData;

fn build_primitive(record: &ActorRecord) -> KindData {
    let mut data = PrimitiveData::default();
    data.reinit(record);
    KindData::Primitive(data)
}

fn build_grid(record: &ActorRecord) -> KindData {
    let mut data = GridData::default();
    data.reinit(record);
    KindData::Grid(data)
}

fn build_path(record: &ActorRecord) -> KindData {
    let mut data = PathData::default();
    data.reinit(record);
    KindData::Path(data)
}

fn build_wall(record: &ActorRecord) -> KindData {
    let mut data = WallData::default();
    data.reinit(record);
    KindData::Wall(data)
}

/// Kind tag to constructor. Unknown tags build a generic actor.
#[derive(Debug, Clone)]
pub struct KindRegistry {
    constructors: HashMap<String, KindConstructor>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        let mut registry = Self {
            constructors: HashMap::new(),
        };
        registry.register("primitive", build_primitive);
        registry.register("grid", build_grid);
        registry.register("path", build_path);
        registry.register("wall", build_wall);
        registry
    }
}

impl KindRegistry {
    pub fn register(&mut self, tag: &str, constructor: KindConstructor) {
        self.constructors.insert(tag.to_ascii_lowercase(), constructor);
    }

    pub fn is_known(&self, tag: &str) -> bool {
        self.constructors.contains_key(&tag.to_ascii_lowercase())
    }

    pub fn construct(&self, record: &ActorRecord) -> KindData {
        match self.constructors.get(&record.kind.to_ascii_lowercase()) {
            Some(constructor) => constructor(record),
            None => KindData::Generic(GenericData {
                tag: record.kind.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn grid_record(width: f32, height: f32, size: Option<f32>, grid_type: &str) -> ActorRecord {
        ActorRecord {
            grid_width: Some(width),
            grid_height: Some(height),
            grid_size: size,
            grid_type: Some(grid_type.to_string()),
            ..ActorRecord::with_id("g", "grid")
        }
    }

    #[test]
    fn unknown_kind_falls_back_to_generic_and_keeps_tag() {
        let registry = KindRegistry::default();
        let data = registry.construct(&ActorRecord::with_id("t", "Tree"));
        assert_eq!(data, KindData::Generic(GenericData { tag: "Tree".into() }));
        assert_eq!(data.tag(), "Tree");
        assert!(data.behavior().mesh_request(&ActorId::from("t"), "t").is_none());
    }

    #[test]
    fn square_grid_offset_pads_uncovered_half_extent() {
        let registry = KindRegistry::default();
        let covered = registry.construct(&grid_record(200.0, 100.0, None, "square"));
        assert_eq!(
            covered.behavior().placement_offset(),
            Vec3::new(-100.0, 2.0, -40.0 - 20.0)
        );

        let exact = registry.construct(&grid_record(80.0, 80.0, Some(20.0), "square"));
        assert_eq!(exact.behavior().placement_offset(), Vec3::new(-40.0, 2.0, -40.0));
    }

    #[test]
    fn hex_grid_offset_uses_rounded_half_extent() {
        let registry = KindRegistry::default();
        let hex = registry.construct(&grid_record(31.0, 10.0, None, "hex"));
        assert_eq!(hex.behavior().placement_offset(), Vec3::new(-16.0, 1.0, -5.0));
    }

    #[test]
    fn primitive_request_splits_builder_and_args() {
        let record = ActorRecord {
            primitive: Some(vec![json!("CreateBox"), json!("crate"), json!({"size": 2})]),
            ..ActorRecord::with_id("p", "primitive")
        };
        let data = KindRegistry::default().construct(&record);
        let request = data
            .behavior()
            .mesh_request(&ActorId::from("p"), "crate")
            .expect("request");
        assert_eq!(request.builder, "CreateBox");
        assert_eq!(request.args, vec![json!("crate"), json!({"size": 2})]);
        assert!(!data.behavior().rebuilds_on_init());
    }

    #[test]
    fn wall_closes_when_end_returns_within_width() {
        let mut wall = WallData::default();
        wall.add_node(Vec3::new(0.0, 0.0, 0.0));
        wall.add_node(Vec3::new(10.0, 0.0, 0.0));
        assert!(!wall.is_closed());
        wall.add_node(Vec3::new(10.0, 0.0, 10.0));
        assert!(!wall.is_closed());
        wall.add_node(Vec3::new(1.5, 0.0, 0.5));

        assert!(wall.is_closed());
        assert_eq!(wall.path.last_node(), Some(Vec3::ZERO));
        assert_eq!(wall.path.nodes.len(), 4);
    }

    #[test]
    fn wall_record_carries_path_and_dimensions() {
        let mut wall = WallData {
            width: Some(3.0),
            primary_texture: Some(TextureRecord::named("brick.png")),
            ..WallData::default()
        };
        wall.add_node(Vec3::new(1.0, 0.0, 1.0));
        let mut record = ActorRecord::default();
        wall.write_record(&mut record);

        assert_eq!(record.kind, "wall");
        assert_eq!(record.name, "wall");
        assert_eq!(record.nodes, Some(vec![Vec3::new(1.0, 0.0, 1.0)]));
        assert_eq!(record.width, Some(3.0));
        assert_eq!(record.height, None);
        assert_eq!(wall.height(), DEFAULT_WALL_HEIGHT);
    }
}
