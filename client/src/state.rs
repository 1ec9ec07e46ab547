//! Client-side view of the room.
//!
//! Applies server messages to a local copy of the replicated state. The
//! presentation layer reads the scene-object projection, selections, and
//! connection status from here; it never talks to the socket directly.

use log::{debug, warn};
use serde_json::Value;
use shared::{RoomSnapshot, SceneObject, Selection, ServerMessage};
use std::collections::HashSet;

/// Side effects of applying a server message that the embedding application
/// may care about beyond the room state itself.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Signal { from: String, payload: Value },
    Kicked { reason: String },
    CommandRejected { ack_id: String, reason: String },
}

#[derive(Debug)]
pub struct ClientRoomView {
    pub uid: String,
    pub is_dm: bool,
    pub authenticated: bool,
    pub room: Option<RoomSnapshot>,
    /// Milliseconds between the server stamping a heartbeat ack and us
    /// seeing it.
    pub ping_ms: u64,
    pending_acks: HashSet<String>,
}

impl ClientRoomView {
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            is_dm: false,
            authenticated: false,
            room: None,
            ping_ms: 0,
            pending_acks: HashSet::new(),
        }
    }

    /// Applies one server message; returns an event when the application
    /// should react beyond re-rendering.
    pub fn apply(&mut self, message: ServerMessage, now_ms: u64) -> Option<ViewEvent> {
        match message {
            ServerMessage::Authenticated { uid, is_dm } => {
                if uid == self.uid {
                    debug!("authenticated (dm: {})", is_dm);
                    self.authenticated = true;
                    self.is_dm = is_dm;
                }
                None
            }
            ServerMessage::HeartbeatAck { timestamp } => {
                if timestamp > 0 {
                    self.ping_ms = now_ms.saturating_sub(timestamp);
                }
                None
            }
            ServerMessage::RoomSnapshot { state } => {
                self.room = Some(state);
                None
            }
            ServerMessage::Signal { from, payload } => Some(ViewEvent::Signal { from, payload }),
            ServerMessage::CommandAck { ack_id, ok, reason } => {
                self.pending_acks.remove(&ack_id);
                if ok {
                    None
                } else {
                    let reason = reason.unwrap_or_else(|| "rejected".to_string());
                    warn!("command {} rejected: {}", ack_id, reason);
                    Some(ViewEvent::CommandRejected { ack_id, reason })
                }
            }
            ServerMessage::Kicked { reason } => Some(ViewEvent::Kicked { reason }),
        }
    }

    /// Remembers an outstanding ack id before the command goes out.
    pub fn register_ack(&mut self, ack_id: &str) {
        self.pending_acks.insert(ack_id.to_string());
    }

    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks.len()
    }

    pub fn scene_objects(&self) -> &[SceneObject] {
        self.room
            .as_ref()
            .map(|r| r.scene_objects.as_slice())
            .unwrap_or(&[])
    }

    pub fn selection_for(&self, uid: &str) -> Option<&Selection> {
        self.room.as_ref()?.selections.get(uid)
    }

    /// Marks the session unauthenticated again; called when the socket drops
    /// so the next connection re-authenticates before normal traffic flows.
    pub fn reset_session(&mut self) {
        self.authenticated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Player, Token};

    fn snapshot() -> RoomSnapshot {
        let mut snapshot = RoomSnapshot::default();
        snapshot.players.push(Player::new("u1", "Alice", 0));
        snapshot
            .tokens
            .push(Token::new("t1", "Goblin", Some("u1"), 1.0, 2.0));
        snapshot
    }

    #[test]
    fn test_authenticated_only_for_own_uid() {
        let mut view = ClientRoomView::new("u1");
        view.apply(
            ServerMessage::Authenticated {
                uid: "someone-else".to_string(),
                is_dm: true,
            },
            0,
        );
        assert!(!view.authenticated);

        view.apply(
            ServerMessage::Authenticated {
                uid: "u1".to_string(),
                is_dm: false,
            },
            0,
        );
        assert!(view.authenticated);
        assert!(!view.is_dm);
    }

    #[test]
    fn test_heartbeat_ack_updates_ping() {
        let mut view = ClientRoomView::new("u1");
        view.apply(ServerMessage::HeartbeatAck { timestamp: 1_000 }, 1_045);
        assert_eq!(view.ping_ms, 45);
    }

    #[test]
    fn test_snapshot_replaces_room() {
        let mut view = ClientRoomView::new("u1");
        assert!(view.scene_objects().is_empty());

        view.apply(ServerMessage::RoomSnapshot { state: snapshot() }, 0);
        assert!(view.room.is_some());
        assert_eq!(view.room.as_ref().unwrap().tokens.len(), 1);
    }

    #[test]
    fn test_nack_surfaces_event_and_clears_pending() {
        let mut view = ClientRoomView::new("u1");
        view.register_ack("req-1");
        assert_eq!(view.pending_ack_count(), 1);

        let event = view.apply(
            ServerMessage::CommandAck {
                ack_id: "req-1".to_string(),
                ok: false,
                reason: Some("unauthorized".to_string()),
            },
            0,
        );
        assert_eq!(
            event,
            Some(ViewEvent::CommandRejected {
                ack_id: "req-1".to_string(),
                reason: "unauthorized".to_string(),
            })
        );
        assert_eq!(view.pending_ack_count(), 0);
    }

    #[test]
    fn test_ok_ack_is_silent() {
        let mut view = ClientRoomView::new("u1");
        view.register_ack("req-2");
        let event = view.apply(
            ServerMessage::CommandAck {
                ack_id: "req-2".to_string(),
                ok: true,
                reason: None,
            },
            0,
        );
        assert_eq!(event, None);
        assert_eq!(view.pending_ack_count(), 0);
    }

    #[test]
    fn test_reset_session_requires_reauth() {
        let mut view = ClientRoomView::new("u1");
        view.apply(
            ServerMessage::Authenticated {
                uid: "u1".to_string(),
                is_dm: false,
            },
            0,
        );
        assert!(view.authenticated);
        view.reset_session();
        assert!(!view.authenticated);
    }
}
