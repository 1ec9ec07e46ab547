//! World model shared between the authoritative server and client views.
//!
//! Everything here crosses the wire inside a [`RoomSnapshot`], so the structs
//! carry serde renames matching the JSON contract (camelCase fields, kebab-case
//! kind tags). Authoritative coordinates live on the domain entities (tokens,
//! props, pointers); the derived [`SceneObject`] list is a projection of them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::zone::StagingZone;

/// A 2D vector used for wire positions and scale pairs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

/// A connected (or previously connected) participant.
///
/// Created on first contact by uid and kept across disconnects so a player can
/// reconnect into the same seat; removed only by an explicit removal command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub uid: String,
    pub name: String,
    pub hp: i32,
    pub max_hp: i32,
    #[serde(rename = "isDM")]
    pub is_dm: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mic_level: Option<f32>,
    #[serde(default)]
    pub status_effects: Vec<String>,
    pub last_heartbeat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portrait: Option<String>,
}

impl Player {
    pub fn new(uid: &str, name: &str, now_ms: u64) -> Self {
        Self {
            uid: uid.to_string(),
            name: name.to_string(),
            hp: 10,
            max_hp: 10,
            is_dm: false,
            mic_level: None,
            status_effects: Vec::new(),
            last_heartbeat: now_ms,
            portrait: None,
        }
    }
}

/// A character sheet stub. Game rules around characters are out of scope; the
/// server only stores and replicates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portrait: Option<String>,
}

/// A token on the map. `x`/`y` are the authoritative coordinates; the scene
/// projection is rebuilt from them and never the other way around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portrait: Option<String>,
}

impl Token {
    pub fn new(id: &str, name: &str, owner: Option<&str>, x: f32, y: f32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            owner: owner.map(|o| o.to_string()),
            x,
            y,
            portrait: None,
        }
    }

    /// Namespaced id used in the scene projection.
    pub fn scene_id(&self) -> String {
        format!("token:{}", self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawingPoint {
    pub x: f32,
    pub y: f32,
}

/// A freehand drawing. `owner` attributes the stroke for per-player undo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drawing {
    pub id: String,
    pub owner: String,
    pub points: Vec<DrawingPoint>,
    pub color: String,
    pub width: f32,
}

impl Drawing {
    pub fn scene_id(&self) -> String {
        format!("drawing:{}", self.id)
    }
}

/// A decorative prop. Ownerless props are communal: anyone may move them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prop {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Prop {
    pub fn scene_id(&self) -> String {
        format!("prop:{}", self.id)
    }
}

/// The map background image, either referenced by url or embedded as a data
/// string. Inline data is bounded by [`crate::MAX_BACKGROUND_BYTES`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapBackground {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridConfig {
    pub size: f32,
    pub visible: bool,
    pub snap: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            size: 50.0,
            visible: true,
            snap: false,
        }
    }
}

/// An ephemeral pointer ping. Swept by the server after a short TTL and never
/// written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pointer {
    pub uid: String,
    pub x: f32,
    pub y: f32,
    pub placed_at: u64,
}

impl Pointer {
    pub fn scene_id(&self) -> String {
        format!("pointer:{}", self.uid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub rotation: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SceneObjectKind {
    Map,
    Token,
    Drawing,
    Prop,
    StagingZone,
    Pointer,
}

/// A positioned, projected entity derived from authoritative domain data.
///
/// Identity is the namespaced `id` (`token:<id>`, `map`, `staging-zone`,
/// `pointer:<uid>`, ...). `locked`, `z_index` and the non-positional transform
/// are the only fields the projection owns authoritatively; everything else is
/// recomputed from the source entity on every rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneObject {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SceneObjectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub locked: bool,
    pub z_index: i32,
    pub transform: Transform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<DrawingPoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
}

impl SceneObject {
    pub fn new(id: &str, kind: SceneObjectKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            owner: None,
            locked: false,
            z_index: 0,
            transform: Transform::default(),
            label: None,
            image: None,
            points: None,
            color: None,
            stroke_width: None,
            width: None,
            height: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    Replace,
    Append,
    Subtract,
}

/// A user's current selection. The "single" view of a multiple-selection is
/// its last id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Selection {
    #[serde(rename_all = "camelCase")]
    Single { object_id: String },
    #[serde(rename_all = "camelCase")]
    Multiple { object_ids: Vec<String> },
}

impl Selection {
    /// The id a single-object consumer should treat as selected.
    pub fn single_view(&self) -> Option<&str> {
        match self {
            Selection::Single { object_id } => Some(object_id),
            Selection::Multiple { object_ids } => object_ids.last().map(|s| s.as_str()),
        }
    }
}

/// The full room shape fanned out to clients and (with pointers stripped)
/// written to disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    #[serde(default)]
    pub players: Vec<Player>,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub tokens: Vec<Token>,
    #[serde(default)]
    pub drawings: Vec<Drawing>,
    #[serde(default)]
    pub props: Vec<Prop>,
    #[serde(default)]
    pub pointers: Vec<Pointer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_background: Option<MapBackground>,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_zone: Option<StagingZone>,
    #[serde(default)]
    pub scene_objects: Vec<SceneObject>,
    #[serde(default)]
    pub selections: HashMap<String, Selection>,
}
