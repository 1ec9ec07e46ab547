//! Inbound message pipeline: size guard, parse, rate limit, validate,
//! authorized dispatch.
//!
//! Stages run strictly in order and the first failure short-circuits the
//! frame. Handlers mutate `RoomState` synchronously and report what should
//! happen downstream through [`HandlerResult`]; they validate before touching
//! state because there is no transactional rollback. A handler panic is
//! caught here, logged with the offending frame, and never kills the loop.

use log::{debug, error, info, warn};
use shared::{ClientMessage, MessageKind, ServerMessage, StagingZone, Token};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use thiserror::Error;

use crate::authority::{self, TransformPatch};
use crate::persistence::SnapshotError;
use crate::rate_limit::RateLimiter;
use crate::room::RoomState;
use crate::utils::new_id;
use crate::validation::{self, ValidationError};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_frame_bytes: usize,
    pub rate_limit_burst: u32,
    pub rate_limit_refill: Duration,
    pub dm_secret: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: shared::MAX_FRAME_BYTES,
            rate_limit_burst: 60,
            rate_limit_refill: Duration::from_millis(50),
            dm_secret: None,
        }
    }
}

/// What a handler wants the loop to do after a successful mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerResult {
    pub broadcast: bool,
    pub persist: bool,
    pub reply: Option<ServerMessage>,
    pub forward: Option<(String, ServerMessage)>,
}

impl HandlerResult {
    fn silent() -> Self {
        Self::default()
    }

    fn state_change() -> Self {
        Self {
            broadcast: true,
            persist: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineReject {
    #[error("frame of {0} bytes exceeds the size limit")]
    Oversized(usize),
    #[error("unparseable frame: {0}")]
    Unparseable(String),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),
    #[error("unauthorized {0}")]
    Unauthorized(&'static str),
    #[error("invalid session snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("handler panicked")]
    HandlerPanic,
}

pub struct MessagePipeline {
    config: PipelineConfig,
    limiter: RateLimiter,
}

impl MessagePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_burst, config.rate_limit_refill);
        Self { config, limiter }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.limiter
    }

    /// Runs one raw frame through the pipeline.
    ///
    /// Returns the handler result (or the stage that rejected the frame) plus
    /// the opt-in ack/nack for commands that carried an `ackId`.
    pub fn process(
        &mut self,
        state: &mut RoomState,
        sender_uid: &str,
        raw: &str,
        now_ms: u64,
    ) -> (Result<HandlerResult, PipelineReject>, Option<ServerMessage>) {
        let (result, ack_id) = self.run(state, sender_uid, raw, now_ms);

        let ack = ack_id.map(|ack_id| match &result {
            Ok(_) => ServerMessage::CommandAck {
                ack_id,
                ok: true,
                reason: None,
            },
            Err(reject) => ServerMessage::CommandAck {
                ack_id,
                ok: false,
                reason: Some(reject.to_string()),
            },
        });

        (result, ack)
    }

    fn run(
        &mut self,
        state: &mut RoomState,
        sender_uid: &str,
        raw: &str,
        now_ms: u64,
    ) -> (Result<HandlerResult, PipelineReject>, Option<String>) {
        // 1. Size guard, before any parsing cost.
        if raw.len() > self.config.max_frame_bytes {
            warn!(
                "dropping oversized frame from {}: {} bytes",
                sender_uid,
                raw.len()
            );
            return (Err(PipelineReject::Oversized(raw.len())), None);
        }

        // 2. Parse. Unparseable frames are logged distinctly from frames
        // that parse but fail schema checks.
        let message: ClientMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("dropping unparseable frame from {}: {}", sender_uid, err);
                return (Err(PipelineReject::Unparseable(err.to_string())), None);
            }
        };
        let ack_id = message.ack_id().map(String::from);

        // 3. Rate limit, before validation cost is paid. Authenticate
        // bypasses the bucket by design.
        if message.kind() != MessageKind::Authenticate && !self.limiter.check(sender_uid) {
            debug!("rate limited {}", sender_uid);
            return (Err(PipelineReject::RateLimited), ack_id);
        }

        // 4. Per-type schema and limits.
        if let Err(err) = validation::validate(sender_uid, &message) {
            warn!("dropping invalid {:?} frame from {}: {}", message.kind(), sender_uid, err);
            return (Err(PipelineReject::Invalid(err)), ack_id);
        }

        // 5. Authorized dispatch, fenced against handler panics.
        let config = &self.config;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            dispatch(config, state, sender_uid, message, now_ms)
        }));

        match outcome {
            Ok(result) => (result, ack_id),
            Err(_) => {
                let context: String = raw.chars().take(256).collect();
                error!(
                    "handler panicked processing frame from {}: {}",
                    sender_uid, context
                );
                (Err(PipelineReject::HandlerPanic), ack_id)
            }
        }
    }
}

fn require_dm(
    state: &RoomState,
    sender_uid: &str,
    action: &'static str,
) -> Result<(), PipelineReject> {
    if state.is_dm(sender_uid) {
        Ok(())
    } else {
        warn!("blocked DM-only action {:?} from {}", action, sender_uid);
        Err(PipelineReject::Unauthorized(action))
    }
}

fn dispatch(
    config: &PipelineConfig,
    state: &mut RoomState,
    sender_uid: &str,
    message: ClientMessage,
    now_ms: u64,
) -> Result<HandlerResult, PipelineReject> {
    // First contact creates the player; reconnects land in the same seat.
    state.ensure_player(sender_uid, now_ms);

    match message {
        ClientMessage::Authenticate { secret, room_id, .. } => {
            if let Some(room_id) = room_id {
                debug!("{} asked for room {:?}", sender_uid, room_id);
            }
            let granted_dm = matches!(
                (&config.dm_secret, &secret),
                (Some(expected), Some(given)) if expected == given
            );
            let player = state.ensure_player(sender_uid, now_ms);
            if granted_dm && !player.is_dm {
                info!("{} authenticated as DM", sender_uid);
                player.is_dm = true;
            }
            let is_dm = player.is_dm;

            Ok(HandlerResult {
                broadcast: true,
                reply: Some(ServerMessage::Authenticated {
                    uid: sender_uid.to_string(),
                    is_dm,
                }),
                ..HandlerResult::default()
            })
        }
        ClientMessage::Heartbeat => {
            if let Some(player) = state.player_mut(sender_uid) {
                player.last_heartbeat = now_ms;
            }
            Ok(HandlerResult {
                reply: Some(ServerMessage::HeartbeatAck { timestamp: now_ms }),
                ..HandlerResult::default()
            })
        }
        ClientMessage::TransformObject {
            id,
            position,
            scale,
            rotation,
            locked,
            ..
        } => {
            let patch = TransformPatch {
                position,
                scale,
                rotation,
                locked,
            };
            if authority::apply_transform(state, &id, sender_uid, &patch) {
                Ok(HandlerResult::state_change())
            } else {
                Err(PipelineReject::Unauthorized("transform-object"))
            }
        }
        ClientMessage::MoveToken { id, x, y } => {
            let scene_id = format!("token:{}", id);
            if authority::apply_transform(
                state,
                &scene_id,
                sender_uid,
                &TransformPatch::position(x, y),
            ) {
                Ok(HandlerResult::state_change())
            } else {
                Err(PipelineReject::Unauthorized("move-token"))
            }
        }
        ClientMessage::SelectObject { object_id, .. } => {
            let changed = state.selections.select_one(sender_uid, &object_id);
            Ok(HandlerResult {
                broadcast: changed,
                ..HandlerResult::default()
            })
        }
        ClientMessage::DeselectObject { .. } => {
            let changed = state.selections.deselect(sender_uid);
            Ok(HandlerResult {
                broadcast: changed,
                ..HandlerResult::default()
            })
        }
        ClientMessage::SelectMultiple {
            object_ids, mode, ..
        } => {
            let mode = mode.unwrap_or(shared::SelectionMode::Replace);
            let changed = state.selections.select_multiple(sender_uid, object_ids, mode);
            Ok(HandlerResult {
                broadcast: changed,
                ..HandlerResult::default()
            })
        }
        ClientMessage::SetPlayerStagingZone { zone, .. } => {
            require_dm(state, sender_uid, "set-player-staging-zone")?;
            let zone = match zone {
                None => None,
                Some(raw) if raw.is_null() => None,
                Some(raw) => Some(
                    StagingZone::sanitize(&raw)
                        .ok_or(PipelineReject::Invalid(ValidationError::BadZone))?,
                ),
            };
            state.set_staging_zone(zone);
            Ok(HandlerResult::state_change())
        }
        ClientMessage::LoadSession { snapshot, .. } => {
            require_dm(state, sender_uid, "load-session")?;
            state.load_session(&snapshot)?;
            Ok(HandlerResult::state_change())
        }
        ClientMessage::SpawnToken { name, portrait, .. } => {
            let (x, y) = state.spawn_position(&mut rand::thread_rng());
            let mut token = Token::new(&new_id(), &name, Some(sender_uid), x, y);
            token.portrait = portrait;
            state.add_token(token);
            Ok(HandlerResult::state_change())
        }
        ClientMessage::RemoveToken { id, .. } => {
            let allowed = state.is_dm(sender_uid)
                || state
                    .token(&id)
                    .map(|t| t.owner.as_deref() == Some(sender_uid))
                    .unwrap_or(false);
            if !allowed {
                return Err(PipelineReject::Unauthorized("remove-token"));
            }
            if state.remove_token(&id) {
                Ok(HandlerResult::state_change())
            } else {
                Ok(HandlerResult::silent())
            }
        }
        ClientMessage::AddDrawing { mut drawing } => {
            if drawing.id.is_empty() {
                drawing.id = new_id();
            }
            // Attribution always follows the sender.
            drawing.owner = sender_uid.to_string();
            state.add_drawing(drawing);
            Ok(HandlerResult::state_change())
        }
        ClientMessage::UndoDrawing => {
            if state.undo_drawing(sender_uid) {
                Ok(HandlerResult::state_change())
            } else {
                Ok(HandlerResult::silent())
            }
        }
        ClientMessage::RedoDrawing => {
            if state.redo_drawing(sender_uid) {
                Ok(HandlerResult::state_change())
            } else {
                Ok(HandlerResult::silent())
            }
        }
        ClientMessage::ClearDrawings => {
            require_dm(state, sender_uid, "clear-drawings")?;
            state.clear_drawings();
            Ok(HandlerResult::state_change())
        }
        ClientMessage::PlaceProp {
            name,
            x,
            y,
            image,
            owner,
        } => {
            // Only the DM may attribute a prop to someone else.
            let owner = match owner {
                Some(o) if o == sender_uid || state.is_dm(sender_uid) => Some(o),
                Some(_) => Some(sender_uid.to_string()),
                None => None,
            };
            state.add_prop(shared::Prop {
                id: new_id(),
                name,
                owner,
                x,
                y,
                image,
            });
            Ok(HandlerResult::state_change())
        }
        ClientMessage::RemoveProp { id } => {
            let allowed = state.is_dm(sender_uid)
                || state
                    .prop(&id)
                    .map(|p| p.owner.is_none() || p.owner.as_deref() == Some(sender_uid))
                    .unwrap_or(false);
            if !allowed {
                return Err(PipelineReject::Unauthorized("remove-prop"));
            }
            if state.remove_prop(&id) {
                Ok(HandlerResult::state_change())
            } else {
                Ok(HandlerResult::silent())
            }
        }
        ClientMessage::SetMapBackground { background, .. } => {
            require_dm(state, sender_uid, "set-map-background")?;
            state.set_map_background(background);
            Ok(HandlerResult::state_change())
        }
        ClientMessage::SetGridConfig { grid } => {
            require_dm(state, sender_uid, "set-grid-config")?;
            state.set_grid(grid);
            Ok(HandlerResult::state_change())
        }
        ClientMessage::UpdatePlayer {
            name,
            hp,
            max_hp,
            portrait,
            mic_level,
            status_effects,
        } => {
            let player = state.ensure_player(sender_uid, now_ms);
            if let Some(name) = name {
                player.name = name;
            }
            if let Some(hp) = hp {
                player.hp = hp;
            }
            if let Some(max_hp) = max_hp {
                player.max_hp = max_hp;
            }
            if let Some(portrait) = portrait {
                player.portrait = Some(portrait);
            }
            if let Some(mic_level) = mic_level {
                player.mic_level = Some(mic_level);
            }
            if let Some(status_effects) = status_effects {
                player.status_effects = status_effects;
            }
            Ok(HandlerResult::state_change())
        }
        ClientMessage::RemovePlayer { uid, .. } => {
            if uid != sender_uid {
                require_dm(state, sender_uid, "remove-player")?;
            }
            if state.remove_player(&uid) {
                Ok(HandlerResult::state_change())
            } else {
                Ok(HandlerResult::silent())
            }
        }
        ClientMessage::ShowPointer { x, y } => {
            state.upsert_pointer(sender_uid, x, y, now_ms);
            Ok(HandlerResult {
                broadcast: true,
                ..HandlerResult::default()
            })
        }
        ClientMessage::Signal { target, payload } => Ok(HandlerResult {
            forward: Some((
                target,
                ServerMessage::Signal {
                    from: sender_uid.to_string(),
                    payload,
                },
            )),
            ..HandlerResult::default()
        }),
        ClientMessage::RequestState => Ok(HandlerResult {
            reply: Some(ServerMessage::RoomSnapshot {
                state: state.snapshot(true),
            }),
            ..HandlerResult::default()
        }),
    }
}
