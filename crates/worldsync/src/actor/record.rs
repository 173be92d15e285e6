use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::clock::Timestamp;
use crate::math::Vec3;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRecord {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl ColorRecord {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

/// Texture descriptor as persisted; only `name` is needed to fetch the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextureRecord {
    pub name: String,
    pub level: f32,
    pub has_alpha: bool,
    #[serde(rename = "getAlphaFromRGB")]
    pub get_alpha_from_rgb: bool,
    pub coordinates_mode: u32,
    pub u_offset: f32,
    pub v_offset: f32,
    pub u_scale: f32,
    pub v_scale: f32,
    pub u_ang: f32,
    pub v_ang: f32,
    pub w_ang: f32,
    pub wrap_u: u32,
    pub wrap_v: u32,
    pub coordinates_index: u32,
}

impl Default for TextureRecord {
    fn default() -> Self {
        Self {
            name: String::new(),
            level: 1.0,
            has_alpha: false,
            get_alpha_from_rgb: false,
            coordinates_mode: 0,
            u_offset: 0.0,
            v_offset: 0.0,
            u_scale: 1.0,
            v_scale: 1.0,
            u_ang: 0.0,
            v_ang: 0.0,
            w_ang: 0.0,
            wrap_u: 1,
            wrap_v: 1,
            coordinates_index: 0,
        }
    }
}

impl TextureRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaterialRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diffuse_color: Option<ColorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specular_color: Option<ColorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emissive_color: Option<ColorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambient_color: Option<ColorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diffuse_texture: Option<TextureRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specular_texture: Option<TextureRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emissive_texture: Option<TextureRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambient_texture: Option<TextureRecord>,
}

/// The persisted actor document. Kind-specific fields are flat and optional so
/// one shape carries every kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActorRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ActorId>,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub priority: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ActorId>,
    pub state: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    pub check_collisions: bool,
    #[serde(flatten)]
    pub material: MaterialRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primitive: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_size: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_width: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_height: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<Vec3>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_texture: Option<TextureRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_texture: Option<TextureRecord>,
}

impl ActorRecord {
    pub fn with_id(id: impl Into<ActorId>, kind: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            kind: kind.into(),
            ..Self::default()
        }
    }
}

/// Placement or waypoint sample for one actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformUpdate {
    #[serde(alias = "_id", alias = "aid")]
    pub actor_id: ActorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,
}

impl TransformUpdate {
    pub fn at(actor_id: impl Into<ActorId>, time: Timestamp) -> Self {
        Self {
            actor_id: actor_id.into(),
            time: Some(time),
            ..Self::default()
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn with_scaling(mut self, scaling: Vec3) -> Self {
        self.scaling = Some(scaling);
        self
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self(String::new())
    }
}

/// `state["_<event>"]` entry binding an event to a world script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerBinding {
    pub path: String,
    #[serde(default)]
    pub options: Option<Value>,
}

pub fn handler_state_key(event_name: &str) -> String {
    format!("_{event_name}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn record_reads_original_document_shape() {
        let raw = json!({
            "_id": "a-1",
            "type": "primitive",
            "name": "crate",
            "primitive": ["CreateBox", {"size": 2}],
            "diffuseColor": {"r": 1.0, "g": 0.5, "b": 0.0},
            "diffuseTexture": {"name": "wood.png", "uScale": 2.0},
            "checkCollisions": true,
            "state": {"_pick": {"path": "scripts/pick", "options": null}},
            "parent": "root"
        });

        let record: ActorRecord = serde_json::from_value(raw).expect("record");

        assert_eq!(record.id, Some(ActorId::from("a-1")));
        assert_eq!(record.kind, "primitive");
        assert_eq!(record.parent, Some(ActorId::from("root")));
        assert!(record.check_collisions);
        assert_eq!(
            record.material.diffuse_color,
            Some(ColorRecord::new(1.0, 0.5, 0.0))
        );
        let texture = record.material.diffuse_texture.expect("texture");
        assert_eq!(texture.name, "wood.png");
        assert_eq!(texture.u_scale, 2.0);
        assert_eq!(texture.v_scale, 1.0);
    }

    #[test]
    fn transform_update_accepts_legacy_actor_id_keys() {
        let waypoint: TransformUpdate =
            serde_json::from_value(json!({"aid": "w", "time": 10, "position": {"x": 1.0}}))
                .expect("waypoint");
        assert_eq!(waypoint.actor_id, ActorId::from("w"));
        assert_eq!(waypoint.time, Some(Timestamp(10)));
        assert_eq!(waypoint.position, Some(Vec3::new(1.0, 0.0, 0.0)));
        assert_eq!(waypoint.rotation, None);
    }

    #[test]
    fn empty_material_fields_are_not_serialized() {
        let record = ActorRecord::with_id("x", "grid");
        let value = serde_json::to_value(&record).expect("json");
        let object = value.as_object().expect("object");
        assert!(!object.contains_key("diffuseColor"));
        assert!(!object.contains_key("nodes"));
        assert_eq!(object.get("type"), Some(&json!("grid")));
    }
}
