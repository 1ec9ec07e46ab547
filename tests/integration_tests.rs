//! Integration tests for the tabletop sync protocol.
//!
//! These tests validate cross-component interactions: the full inbound
//! pipeline against room state, reconciliation stickiness, client-side
//! resilience, and a real websocket session against a live server.

use serde_json::json;
use server::authority::{self, TransformPatch};
use server::pipeline::{MessagePipeline, PipelineConfig, PipelineReject};
use server::room::RoomState;
use shared::{ClientMessage, Selection, SelectionMode, ServerMessage, StagingZone, Token, Vec2};
use std::time::Duration;

fn dm_pipeline() -> MessagePipeline {
    MessagePipeline::new(PipelineConfig {
        dm_secret: Some("gm".to_string()),
        ..PipelineConfig::default()
    })
}

fn process(
    pipe: &mut MessagePipeline,
    state: &mut RoomState,
    uid: &str,
    raw: &str,
) -> Result<server::pipeline::HandlerResult, PipelineReject> {
    let (result, _) = pipe.process(state, uid, raw, 0);
    result
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests message serialization round-trip over the JSON wire format
    #[test]
    fn client_message_roundtrip() {
        let messages = vec![
            ClientMessage::Authenticate {
                secret: Some("gm".to_string()),
                room_id: None,
                ack_id: Some("a1".to_string()),
            },
            ClientMessage::Heartbeat,
            ClientMessage::TransformObject {
                id: "token:t1".to_string(),
                position: Some(Vec2 { x: 1.0, y: 2.0 }),
                scale: Some(Vec2 { x: 2.0, y: 2.0 }),
                rotation: Some(45.0),
                locked: Some(true),
                ack_id: None,
            },
            ClientMessage::SelectMultiple {
                uid: "u1".to_string(),
                object_ids: vec!["a".to_string(), "b".to_string()],
                mode: Some(SelectionMode::Append),
            },
            ClientMessage::RequestState,
        ];

        for message in messages {
            let json = serde_json::to_string(&message).unwrap();
            let back: ClientMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(back, message);
        }
    }

    /// Tests that wire discriminants use the kebab-case type field
    #[test]
    fn wire_discriminants() {
        let json = serde_json::to_value(&ClientMessage::SetPlayerStagingZone {
            zone: None,
            ack_id: None,
        })
        .unwrap();
        assert_eq!(json["type"], "set-player-staging-zone");

        let json = serde_json::to_value(&ServerMessage::RoomSnapshot {
            state: Default::default(),
        })
        .unwrap();
        assert_eq!(json["type"], "room-snapshot");
    }

    /// Tests server message round-trip including snapshots
    #[test]
    fn server_snapshot_roundtrip() {
        let mut room = RoomState::new();
        room.ensure_player("u1", 5);
        room.add_token(Token::new("t1", "Goblin", Some("u1"), 3.0, 4.0));
        room.selections.select_one("u1", "token:t1");

        let message = ServerMessage::RoomSnapshot {
            state: room.snapshot(true),
        };
        let json = serde_json::to_string(&message).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }
}

/// INBOUND PIPELINE TESTS
mod pipeline_tests {
    use super::*;

    /// Scenario: a non-DM transform of the map is rejected and nothing moves
    #[test]
    fn non_dm_map_transform_rejected() {
        let mut pipe = dm_pipeline();
        let mut state = RoomState::new();
        process(&mut pipe, &mut state, "gm1", r#"{"type":"authenticate","secret":"gm"}"#).unwrap();
        process(
            &mut pipe,
            &mut state,
            "gm1",
            r#"{"type":"set-map-background","background":{"url":"map.png","width":800.0,"height":600.0}}"#,
        )
        .unwrap();
        process(&mut pipe, &mut state, "u1", r#"{"type":"authenticate"}"#).unwrap();

        let before = state.snapshot(true);
        let raw = r#"{"type":"transform-object","id":"map","position":{"x":1.0,"y":1.0}}"#;
        let result = process(&mut pipe, &mut state, "u1", raw);
        assert!(matches!(result, Err(PipelineReject::Unauthorized(_))));
        assert_eq!(state.snapshot(true), before);

        // The DM is allowed to make the same edit.
        let result = process(&mut pipe, &mut state, "gm1", raw);
        assert!(result.unwrap().broadcast);
        let map = state
            .scene_objects
            .iter()
            .find(|o| o.id == "map")
            .unwrap();
        assert_eq!(map.transform.x, 1.0);
    }

    /// Scenario: an oversized frame is rejected before parsing and before
    /// the rate limiter is ever consulted
    #[test]
    fn oversized_frame_rejected_before_parse() {
        let mut pipe = dm_pipeline();
        let mut state = RoomState::new();

        let frame = "x".repeat(1_048_577);
        let result = process(&mut pipe, &mut state, "u1", &frame);
        match result {
            Err(PipelineReject::Oversized(size)) => assert_eq!(size, 1_048_577),
            other => panic!("expected oversized rejection, got {:?}", other),
        }
        assert_eq!(pipe.limiter().tracked_senders(), 0);
        assert!(state.players.is_empty());
    }

    /// Tests the DM authority gate on load-session plus snapshot validation
    #[test]
    fn load_session_requires_dm_and_core_sections() {
        let mut pipe = dm_pipeline();
        let mut state = RoomState::new();
        process(&mut pipe, &mut state, "u1", r#"{"type":"authenticate"}"#).unwrap();
        process(&mut pipe, &mut state, "gm1", r#"{"type":"authenticate","secret":"gm"}"#).unwrap();

        let snapshot = json!({
            "players": [],
            "tokens": [{"id":"t1","name":"Goblin","x":0.0,"y":0.0}],
            "drawings": []
        });
        let raw = json!({"type":"load-session","snapshot":snapshot}).to_string();

        let result = process(&mut pipe, &mut state, "u1", &raw);
        assert!(matches!(result, Err(PipelineReject::Unauthorized(_))));
        assert!(state.tokens.is_empty());

        process(&mut pipe, &mut state, "gm1", &raw).unwrap();
        assert_eq!(state.tokens.len(), 1);

        // A snapshot without tokens is rejected wholesale.
        let bad = json!({"type":"load-session","snapshot":{"players":[],"drawings":[]}}).to_string();
        let result = process(&mut pipe, &mut state, "gm1", &bad);
        assert!(matches!(result, Err(PipelineReject::Snapshot(_))));
        assert_eq!(state.tokens.len(), 1);
    }

    /// Tests the opt-in ack channel: nacks only when an ackId was supplied
    #[test]
    fn ack_channel_is_opt_in() {
        let mut pipe = dm_pipeline();
        let mut state = RoomState::new();
        process(&mut pipe, &mut state, "u1", r#"{"type":"authenticate"}"#).unwrap();

        let silent = r#"{"type":"set-map-background","background":null}"#;
        let (result, ack) = pipe.process(&mut state, "u1", silent, 0);
        assert!(result.is_err());
        assert!(ack.is_none());

        let loud = r#"{"type":"set-map-background","background":null,"ackId":"r1"}"#;
        let (result, ack) = pipe.process(&mut state, "u1", loud, 0);
        assert!(result.is_err());
        match ack {
            Some(ServerMessage::CommandAck { ack_id, ok, .. }) => {
                assert_eq!(ack_id, "r1");
                assert!(!ok);
            }
            other => panic!("expected nack, got {:?}", other),
        }
    }

    /// Tests spawn-token placement inside the staging zone
    #[test]
    fn spawned_tokens_land_inside_the_zone() {
        let mut pipe = dm_pipeline();
        let mut state = RoomState::new();
        process(&mut pipe, &mut state, "gm1", r#"{"type":"authenticate","secret":"gm"}"#).unwrap();
        process(
            &mut pipe,
            &mut state,
            "gm1",
            r#"{"type":"set-player-staging-zone","zone":{"x":100.0,"y":200.0,"width":60.0,"height":40.0,"rotation":0.0}}"#,
        )
        .unwrap();

        for i in 0..20 {
            let raw = format!(r#"{{"type":"spawn-token","name":"T{}"}}"#, i);
            process(&mut pipe, &mut state, "gm1", &raw).unwrap();
        }

        assert_eq!(state.tokens.len(), 20);
        for token in &state.tokens {
            assert!(token.x >= 70.0 && token.x <= 130.0, "x {} out of zone", token.x);
            assert!(token.y >= 180.0 && token.y <= 220.0, "y {} out of zone", token.y);
        }
    }

    /// Tests drawing undo attribution across two players
    #[test]
    fn undo_only_touches_own_drawings() {
        let mut pipe = dm_pipeline();
        let mut state = RoomState::new();

        let stroke = |owner: &str, id: &str| {
            json!({
                "type": "add-drawing",
                "drawing": {
                    "id": id,
                    "owner": owner,
                    "points": [{"x": 0.0, "y": 0.0}, {"x": 1.0, "y": 1.0}],
                    "color": "#f00",
                    "width": 2.0
                }
            })
            .to_string()
        };

        process(&mut pipe, &mut state, "u1", &stroke("u1", "d1")).unwrap();
        process(&mut pipe, &mut state, "u2", &stroke("u2", "d2")).unwrap();

        let result = process(&mut pipe, &mut state, "u1", r#"{"type":"undo-drawing"}"#).unwrap();
        assert!(result.broadcast);
        assert!(state.drawing("d1").is_none());
        assert!(state.drawing("d2").is_some());

        // Nothing left for u1: a silent no-op, not an error.
        let result = process(&mut pipe, &mut state, "u1", r#"{"type":"undo-drawing"}"#).unwrap();
        assert!(!result.broadcast);
    }
}

/// SELECTION TESTS
mod selection_tests {
    use super::*;

    /// Scenario: append mode unions with the existing multi-selection
    #[test]
    fn append_preserves_existing_order() {
        let mut pipe = dm_pipeline();
        let mut state = RoomState::new();

        let raw = r#"{"type":"select-multiple","uid":"u1","objectIds":["t2","t3"],"mode":"replace"}"#;
        process(&mut pipe, &mut state, "u1", raw).unwrap();

        let raw = r#"{"type":"select-multiple","uid":"u1","objectIds":["t1","t2"],"mode":"append"}"#;
        let result = process(&mut pipe, &mut state, "u1", raw).unwrap();
        assert!(result.broadcast);

        assert_eq!(
            state.selections.selection("u1"),
            Some(&Selection::Multiple {
                object_ids: vec!["t2".to_string(), "t3".to_string(), "t1".to_string()]
            })
        );
    }

    /// Tests idempotent single selection: the repeat emits no broadcast
    #[test]
    fn reselect_same_single_is_silent() {
        let mut pipe = dm_pipeline();
        let mut state = RoomState::new();

        let raw = r#"{"type":"select-object","uid":"u1","objectId":"token:t1"}"#;
        assert!(process(&mut pipe, &mut state, "u1", raw).unwrap().broadcast);
        assert!(!process(&mut pipe, &mut state, "u1", raw).unwrap().broadcast);
    }

    /// Tests that a spoofed uid on a selection message is dropped
    #[test]
    fn selection_for_someone_else_is_invalid() {
        let mut pipe = dm_pipeline();
        let mut state = RoomState::new();

        let raw = r#"{"type":"select-object","uid":"u2","objectId":"token:t1"}"#;
        let result = process(&mut pipe, &mut state, "u1", raw);
        assert!(matches!(result, Err(PipelineReject::Invalid(_))));
        assert!(state.selections.selection("u2").is_none());
    }
}

/// RECONCILIATION TESTS
mod reconciliation_tests {
    use super::*;

    /// Invariant: surviving ids keep locked/zIndex/non-positional transform
    /// across any number of rebuilds
    #[test]
    fn sticky_fields_survive_repeated_rebuilds() {
        let mut state = RoomState::new();
        state.add_token(Token::new("t1", "Goblin", Some("u1"), 10.0, 20.0));
        state.ensure_player("dm", 0).is_dm = true;

        assert!(authority::apply_transform(
            &mut state,
            "token:t1",
            "dm",
            &TransformPatch {
                scale: Some(Vec2 { x: 2.0, y: 3.0 }),
                rotation: Some(90.0),
                locked: Some(true),
                ..TransformPatch::default()
            }
        ));

        for _ in 0..10 {
            state.rebuild_scene();
        }

        let object = state
            .scene_objects
            .iter()
            .find(|o| o.id == "token:t1")
            .unwrap();
        assert!(object.locked);
        assert_eq!(object.transform.scale_x, 2.0);
        assert_eq!(object.transform.scale_y, 3.0);
        assert_eq!(object.transform.rotation, 90.0);
        // Position still mirrors the authoritative token.
        assert_eq!(object.transform.x, 10.0);
        assert_eq!(object.transform.y, 20.0);
    }

    /// Tests that a moved token keeps its authoritative position through a
    /// zone-triggered rebuild
    #[test]
    fn token_moves_survive_unrelated_rebuilds() {
        let mut state = RoomState::new();
        state.ensure_player("u1", 0);
        state.add_token(Token::new("t1", "Goblin", Some("u1"), 0.0, 0.0));

        assert!(authority::apply_transform(
            &mut state,
            "token:t1",
            "u1",
            &TransformPatch::position(42.0, 24.0)
        ));

        // An unrelated structural change forces a rebuild.
        state.set_staging_zone(Some(StagingZone {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            rotation: 0.0,
        }));

        let object = state
            .scene_objects
            .iter()
            .find(|o| o.id == "token:t1")
            .unwrap();
        assert_eq!((object.transform.x, object.transform.y), (42.0, 24.0));
    }
}

/// STAGING ZONE TESTS
mod zone_tests {
    use super::*;

    /// Round-trip: sanitize(sanitize(z)) == sanitize(z)
    #[test]
    fn sanitize_is_idempotent_over_arbitrary_input() {
        let inputs = vec![
            json!({"x": 1, "y": 2, "width": 3, "height": 4}),
            json!({"x": "5.5", "y": "-1", "width": "-20", "height": "0.01", "rotation": 270}),
            json!({"x": 0.0, "y": 0.0, "width": 1e6, "height": 1e-6, "rotation": "bad"}),
        ];

        for raw in inputs {
            let once = StagingZone::sanitize(&raw).unwrap();
            let twice = StagingZone::sanitize(&serde_json::to_value(once).unwrap()).unwrap();
            assert_eq!(once, twice);
        }
    }

    /// Spawn bounds: at rotation 0 every sample falls inside the rectangle
    #[test]
    fn spawn_samples_stay_in_unrotated_bounds() {
        let zone = StagingZone {
            x: 50.0,
            y: -30.0,
            width: 20.0,
            height: 10.0,
            rotation: 0.0,
        };
        let mut rng = rand::thread_rng();

        for _ in 0..2000 {
            let (x, y) = zone.spawn_position(&mut rng);
            assert!((40.0..=60.0).contains(&x));
            assert!((-35.0..=-25.0).contains(&y));
        }
    }
}

/// CLIENT RESILIENCE TESTS
mod client_resilience_tests {
    use super::*;
    use client::connection::{ConnectionLifecycle, TimerEvent};
    use client::outbound::{OutboundQueue, SendError, SendOutcome};
    use shared::ConnectionState;
    use std::time::Instant;

    /// Queue bound: enqueuing 201 messages into a 200-cap FIFO keeps 200,
    /// oldest evicted first
    #[test]
    fn queue_bound_evicts_oldest_first() {
        let mut queue = OutboundQueue::new();
        let mut raw = |_: &ClientMessage| Err(SendError);

        for i in 0..201 {
            let outcome = queue.send(
                ClientMessage::ShowPointer {
                    x: i as f32,
                    y: 0.0,
                },
                false,
                &mut raw,
            );
            assert_eq!(outcome, SendOutcome::Queued);
        }
        assert_eq!(queue.len(), 200);

        let mut first = None;
        let mut count = 0;
        let mut capture = |message: &ClientMessage| {
            if first.is_none() {
                first = Some(message.clone());
            }
            count += 1;
            Ok(())
        };
        queue.flush(true, &mut capture);
        assert_eq!(count, 200);
        match first {
            Some(ClientMessage::ShowPointer { x, .. }) => assert_eq!(x, 1.0),
            other => panic!("unexpected head of queue: {:?}", other),
        }
    }

    /// Backoff: base 2000ms gives 2000, 3000, 4500, ... capped at 30000
    #[test]
    fn reconnect_backoff_progression() {
        let machine = ConnectionLifecycle::new(Duration::from_millis(2000), 0);
        assert_eq!(machine.reconnect_delay(1).as_millis(), 2000);
        assert_eq!(machine.reconnect_delay(2).as_millis(), 3000);
        assert_eq!(machine.reconnect_delay(3).as_millis(), 4500);
        assert_eq!(machine.reconnect_delay(20).as_millis(), 30000);
    }

    /// Scenario: close while connected, wait out the base delay, reconnect,
    /// attempts reset on reopen
    #[test]
    fn disconnect_reconnect_cycle() {
        let mut machine = ConnectionLifecycle::new(Duration::from_millis(2000), 0);
        let t0 = Instant::now();

        machine.connect(t0);
        machine.on_open();
        assert_eq!(machine.state(), ConnectionState::Connected);

        machine.on_close(t0);
        assert_eq!(machine.state(), ConnectionState::Reconnecting);

        assert_eq!(
            machine.poll_timer(t0 + Duration::from_millis(2000)),
            Some(TimerEvent::RetryNow)
        );
        machine.connect(t0 + Duration::from_millis(2000));
        assert_eq!(machine.state(), ConnectionState::Connecting);

        machine.on_open();
        assert_eq!(machine.state(), ConnectionState::Connected);
        assert_eq!(machine.attempts(), 0);
    }

    /// Tests heartbeat discipline around authentication
    #[test]
    fn heartbeats_drop_while_unauthenticated() {
        let mut queue = OutboundQueue::new();
        let mut sent = 0;
        let mut raw = |_: &ClientMessage| {
            sent += 1;
            Ok(())
        };

        // Pre-auth: not sendable, heartbeat dropped, nothing queued.
        assert_eq!(
            queue.send(ClientMessage::Heartbeat, false, &mut raw),
            SendOutcome::Dropped
        );
        assert!(queue.is_empty());

        // Authenticate goes out regardless.
        assert_eq!(
            queue.send(
                ClientMessage::Authenticate {
                    secret: None,
                    room_id: None,
                    ack_id: None
                },
                false,
                &mut raw
            ),
            SendOutcome::Sent
        );
        assert_eq!(sent, 1);
    }
}

/// PERSISTENCE TESTS
mod persistence_tests {
    use super::*;
    use server::persistence;

    /// Tests snapshot round-trip through disk with pointers stripped
    #[test]
    fn snapshot_roundtrip_strips_ephemeral_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut room = RoomState::new();
        room.ensure_player("u1", 0);
        room.add_token(Token::new("t1", "Goblin", Some("u1"), 1.0, 2.0));
        room.upsert_pointer("u1", 9.0, 9.0, 0);

        persistence::save(&path, &room.snapshot(false)).unwrap();
        let loaded = persistence::load(&path).unwrap();

        assert_eq!(loaded.players.len(), 1);
        assert_eq!(loaded.tokens.len(), 1);
        assert!(loaded.pointers.is_empty());

        // Loading into a fresh room reproduces the scene projection.
        let mut restored = RoomState::new();
        restored.apply_snapshot(loaded);
        assert!(restored.scene_objects.iter().any(|o| o.id == "token:t1"));
        assert!(restored.scene_objects.iter().all(|o| o.id != "pointer:u1"));
    }
}

/// LIVE SERVER TESTS
mod live_server_tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use server::network::{Server, ServerOptions};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    async fn start_server() -> std::net::SocketAddr {
        let options = ServerOptions {
            pipeline: PipelineConfig {
                dm_secret: Some("gm".to_string()),
                ..PipelineConfig::default()
            },
            ..ServerOptions::default()
        };
        let mut server = Server::new("127.0.0.1:0", options).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr
    }

    async fn next_server_message<S>(stream: &mut S) -> ServerMessage
    where
        S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("timed out waiting for server frame")
                .expect("stream ended")
                .expect("socket error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).expect("bad server frame");
            }
        }
    }

    /// Tests a real websocket session: connect, snapshot, authenticate, ack
    #[tokio::test]
    async fn websocket_session_round_trip() {
        let addr = start_server().await;
        let url = format!("ws://{}/?uid=u1", addr);
        let (ws, _) = connect_async(url).await.expect("connect failed");
        let (mut sink, mut stream) = ws.split();

        // The newcomer gets the world immediately.
        let first = next_server_message(&mut stream).await;
        assert!(matches!(first, ServerMessage::RoomSnapshot { .. }));

        // Authenticate as DM and wait for the reply.
        sink.send(Message::Text(
            json!({"type":"authenticate","secret":"gm"}).to_string(),
        ))
        .await
        .unwrap();
        loop {
            match next_server_message(&mut stream).await {
                ServerMessage::Authenticated { uid, is_dm } => {
                    assert_eq!(uid, "u1");
                    assert!(is_dm);
                    break;
                }
                ServerMessage::RoomSnapshot { .. } => continue,
                other => panic!("unexpected message {:?}", other),
            }
        }

        // Spawn a token with an ack and watch it appear in the next snapshot.
        sink.send(Message::Text(
            json!({"type":"spawn-token","name":"Goblin","ackId":"r1"}).to_string(),
        ))
        .await
        .unwrap();

        let mut acked = false;
        let mut seen_token = false;
        while !(acked && seen_token) {
            match next_server_message(&mut stream).await {
                ServerMessage::CommandAck { ack_id, ok, .. } => {
                    assert_eq!(ack_id, "r1");
                    assert!(ok);
                    acked = true;
                }
                ServerMessage::RoomSnapshot { state } => {
                    if state.tokens.iter().any(|t| t.name == "Goblin") {
                        seen_token = true;
                    }
                }
                _ => {}
            }
        }
    }

    /// Tests that the handshake is refused without a uid query parameter
    #[tokio::test]
    async fn connection_without_uid_is_refused() {
        let addr = start_server().await;
        let url = format!("ws://{}/", addr);
        assert!(connect_async(url).await.is_err());
    }

    /// Tests heartbeat ack unicast over a live socket
    #[tokio::test]
    async fn heartbeat_gets_acked() {
        let addr = start_server().await;
        let url = format!("ws://{}/?uid=u2", addr);
        let (ws, _) = connect_async(url).await.expect("connect failed");
        let (mut sink, mut stream) = ws.split();

        sink.send(Message::Text(json!({"type":"heartbeat"}).to_string()))
            .await
            .unwrap();

        loop {
            match next_server_message(&mut stream).await {
                ServerMessage::HeartbeatAck { .. } => break,
                ServerMessage::RoomSnapshot { .. } => continue,
                other => panic!("unexpected message {:?}", other),
            }
        }
    }
}
