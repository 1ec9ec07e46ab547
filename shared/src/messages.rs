//! Wire protocol for the persistent duplex connection.
//!
//! Messages are tagged JSON variants; the discriminant lives in a `"type"`
//! field with kebab-case names, so `TransformObject` travels as
//! `{"type":"transform-object", ...}`. Unknown discriminants fail to parse and
//! the frame is dropped by the server pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{
    Drawing, GridConfig, MapBackground, RoomSnapshot, SelectionMode, Vec2,
};

/// Outbound-discipline classes for client messages.
///
/// Authenticate frames bypass readiness checks entirely; heartbeats are
/// dropped rather than queued when the socket is not sendable; everything
/// else queues into the bounded outbound FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Authenticate,
    Heartbeat,
    Normal,
}

/// Messages a client may send to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Authenticate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<String>,
    },
    Heartbeat,
    #[serde(rename_all = "camelCase")]
    TransformObject {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Vec2>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<Vec2>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rotation: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locked: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<String>,
    },
    /// Drag fast-path for tokens; authority-checked exactly like a transform.
    #[serde(rename_all = "camelCase")]
    MoveToken { id: String, x: f32, y: f32 },
    #[serde(rename_all = "camelCase")]
    SelectObject { uid: String, object_id: String },
    #[serde(rename_all = "camelCase")]
    DeselectObject { uid: String },
    #[serde(rename_all = "camelCase")]
    SelectMultiple {
        uid: String,
        object_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<SelectionMode>,
    },
    #[serde(rename_all = "camelCase")]
    SetPlayerStagingZone {
        zone: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    LoadSession {
        snapshot: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SpawnToken {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        portrait: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RemoveToken {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AddDrawing { drawing: Drawing },
    UndoDrawing,
    RedoDrawing,
    ClearDrawings,
    #[serde(rename_all = "camelCase")]
    PlaceProp {
        name: String,
        x: f32,
        y: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RemoveProp { id: String },
    #[serde(rename_all = "camelCase")]
    SetMapBackground {
        background: Option<MapBackground>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SetGridConfig { grid: GridConfig },
    #[serde(rename_all = "camelCase")]
    UpdatePlayer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hp: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_hp: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        portrait: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mic_level: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_effects: Option<Vec<String>>,
    },
    #[serde(rename_all = "camelCase")]
    RemovePlayer {
        uid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ShowPointer { x: f32, y: f32 },
    /// Opaque peer-to-peer payload relayed to `target` without inspection.
    #[serde(rename_all = "camelCase")]
    Signal { target: String, payload: Value },
    RequestState,
}

impl ClientMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::Authenticate { .. } => MessageKind::Authenticate,
            ClientMessage::Heartbeat => MessageKind::Heartbeat,
            _ => MessageKind::Normal,
        }
    }

    /// The client-supplied ack id, for commands that opted into the ack
    /// channel.
    pub fn ack_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Authenticate { ack_id, .. }
            | ClientMessage::TransformObject { ack_id, .. }
            | ClientMessage::SetPlayerStagingZone { ack_id, .. }
            | ClientMessage::LoadSession { ack_id, .. }
            | ClientMessage::SpawnToken { ack_id, .. }
            | ClientMessage::RemoveToken { ack_id, .. }
            | ClientMessage::SetMapBackground { ack_id, .. }
            | ClientMessage::RemovePlayer { ack_id, .. } => ack_id.as_deref(),
            _ => None,
        }
    }
}

/// Messages the server may send to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Authenticated {
        uid: String,
        #[serde(rename = "isDM")]
        is_dm: bool,
    },
    #[serde(rename_all = "camelCase")]
    HeartbeatAck { timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    RoomSnapshot { state: RoomSnapshot },
    #[serde(rename_all = "camelCase")]
    Signal { from: String, payload: Value },
    #[serde(rename_all = "camelCase")]
    CommandAck {
        ack_id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Kicked { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminant_field_names() {
        let msg = ClientMessage::TransformObject {
            id: "token:t1".to_string(),
            position: Some(Vec2 { x: 1.0, y: 2.0 }),
            scale: None,
            rotation: None,
            locked: None,
            ack_id: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "transform-object");
        assert_eq!(json["position"]["x"], 1.0);
        assert!(json.get("scale").is_none());
    }

    #[test]
    fn test_parse_select_multiple() {
        let raw = r#"{"type":"select-multiple","uid":"u1","objectIds":["a","b"],"mode":"append"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::SelectMultiple {
                uid,
                object_ids,
                mode,
            } => {
                assert_eq!(uid, "u1");
                assert_eq!(object_ids, vec!["a", "b"]);
                assert_eq!(mode, Some(SelectionMode::Append));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_unknown_type_fails_to_parse() {
        let raw = r#"{"type":"warp-reality","amount":9000}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn test_heartbeat_roundtrip() {
        let json = serde_json::to_string(&ClientMessage::Heartbeat).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat"}"#);
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ClientMessage::Heartbeat);
    }

    #[test]
    fn test_message_kinds() {
        let auth = ClientMessage::Authenticate {
            secret: None,
            room_id: None,
            ack_id: None,
        };
        assert_eq!(auth.kind(), MessageKind::Authenticate);
        assert_eq!(ClientMessage::Heartbeat.kind(), MessageKind::Heartbeat);
        assert_eq!(
            ClientMessage::RequestState.kind(),
            MessageKind::Normal
        );
    }

    #[test]
    fn test_ack_id_extraction() {
        let msg = ClientMessage::SpawnToken {
            name: "Goblin".to_string(),
            portrait: None,
            ack_id: Some("req-7".to_string()),
        };
        assert_eq!(msg.ack_id(), Some("req-7"));
        assert_eq!(ClientMessage::Heartbeat.ack_id(), None);
    }

    #[test]
    fn test_server_heartbeat_ack_shape() {
        let msg = ServerMessage::HeartbeatAck { timestamp: 123 };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "heartbeat-ack");
        assert_eq!(json["timestamp"], 123);
    }
}
