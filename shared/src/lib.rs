//! Types shared between the tabletop server and client: the JSON wire
//! protocol, the replicated world model, and staging-zone geometry.

use serde::{Deserialize, Serialize};

pub mod messages;
pub mod model;
pub mod zone;

pub use messages::{ClientMessage, MessageKind, ServerMessage};
pub use model::{
    Character, Drawing, DrawingPoint, GridConfig, MapBackground, Player, Pointer, Prop,
    RoomSnapshot, SceneObject, SceneObjectKind, Selection, SelectionMode, Token, Transform, Vec2,
};
pub use zone::StagingZone;

/// Hard ceiling for a single inbound wire frame; enforced before parsing.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
/// Ceiling for a stored portrait value (data string or url).
pub const MAX_PORTRAIT_BYTES: usize = 2 * 1024 * 1024;
/// Ceiling for a stored map background value.
pub const MAX_BACKGROUND_BYTES: usize = 10 * 1024 * 1024;
/// Maximum points in a single drawing stroke.
pub const MAX_DRAWING_POINTS: usize = 10_000;
/// Maximum object ids in one select-multiple command.
pub const MAX_SELECTION_IDS: usize = 100;
/// Transform scale bounds; the staging zone is exempt from the upper bound.
pub const MIN_SCALE: f32 = 0.1;
pub const MAX_SCALE: f32 = 10.0;

/// Scene ids that are singletons rather than entity-derived.
pub const MAP_SCENE_ID: &str = "map";
pub const STAGING_ZONE_SCENE_ID: &str = "staging-zone";

/// Client connection state, shared so tooling on either side of the wire and
/// the workspace tests reason about the lifecycle with the same vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}
