//! Per-type schema and limit checks on parsed messages.
//!
//! serde already enforces the tagged-union shape; this layer enforces the
//! ranges and ceilings a well-formed frame can still violate: finiteness,
//! length limits, scale bounds, and sender/uid agreement. Any failure drops
//! the message wholesale before a handler runs.

use shared::{
    ClientMessage, MAX_BACKGROUND_BYTES, MAX_DRAWING_POINTS, MAX_PORTRAIT_BYTES,
    MAX_SCALE, MAX_SELECTION_IDS, MIN_SCALE, STAGING_ZONE_SCENE_ID,
};
use thiserror::Error;

const MAX_ID_LEN: usize = 256;
const MAX_NAME_LEN: usize = 128;
const MAX_COLOR_LEN: usize = 64;
const MAX_URL_LEN: usize = 2048;
const MAX_STATUS_EFFECTS: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing or empty field: {0}")]
    MissingField(&'static str),
    #[error("field {0} is too long")]
    FieldTooLong(&'static str),
    #[error("non-finite number in {0}")]
    NonFinite(&'static str),
    #[error("{field} exceeds limit of {limit}")]
    LimitExceeded { field: &'static str, limit: usize },
    #[error("scale out of range")]
    ScaleOutOfRange,
    #[error("width must be positive and finite")]
    BadStrokeWidth,
    #[error("unusable staging zone")]
    BadZone,
    #[error("uid does not match sender")]
    UidMismatch,
}

/// Validates a parsed message from `sender_uid`.
pub fn validate(sender_uid: &str, message: &ClientMessage) -> Result<(), ValidationError> {
    match message {
        ClientMessage::Authenticate { secret, room_id, .. } => {
            check_opt_len(secret.as_deref(), MAX_NAME_LEN, "secret")?;
            check_opt_len(room_id.as_deref(), MAX_NAME_LEN, "roomId")?;
            Ok(())
        }
        ClientMessage::Heartbeat
        | ClientMessage::UndoDrawing
        | ClientMessage::RedoDrawing
        | ClientMessage::ClearDrawings
        | ClientMessage::RequestState => Ok(()),
        ClientMessage::TransformObject {
            id,
            position,
            scale,
            rotation,
            ..
        } => {
            check_id(id, "id")?;
            if let Some(position) = position {
                check_finite(position.x, "position.x")?;
                check_finite(position.y, "position.y")?;
            }
            if let Some(scale) = scale {
                check_finite(scale.x, "scale.x")?;
                check_finite(scale.y, "scale.y")?;
                // The staging zone resizes through scale alone, so it is
                // exempt from the clamp range.
                if id != STAGING_ZONE_SCENE_ID {
                    for value in [scale.x, scale.y] {
                        if !(MIN_SCALE..=MAX_SCALE).contains(&value) {
                            return Err(ValidationError::ScaleOutOfRange);
                        }
                    }
                }
            }
            if let Some(rotation) = rotation {
                check_finite(*rotation, "rotation")?;
            }
            Ok(())
        }
        ClientMessage::MoveToken { id, x, y } => {
            check_id(id, "id")?;
            check_finite(*x, "x")?;
            check_finite(*y, "y")
        }
        ClientMessage::SelectObject { uid, object_id } => {
            check_sender(uid, sender_uid)?;
            check_id(object_id, "objectId")
        }
        ClientMessage::DeselectObject { uid } => check_sender(uid, sender_uid),
        ClientMessage::SelectMultiple {
            uid, object_ids, ..
        } => {
            check_sender(uid, sender_uid)?;
            if object_ids.is_empty() {
                return Err(ValidationError::MissingField("objectIds"));
            }
            if object_ids.len() > MAX_SELECTION_IDS {
                return Err(ValidationError::LimitExceeded {
                    field: "objectIds",
                    limit: MAX_SELECTION_IDS,
                });
            }
            for id in object_ids {
                check_id(id, "objectIds")?;
            }
            Ok(())
        }
        ClientMessage::SetPlayerStagingZone { .. } => Ok(()),
        ClientMessage::LoadSession { snapshot, .. } => {
            if !snapshot.is_object() {
                return Err(ValidationError::MissingField("snapshot"));
            }
            Ok(())
        }
        ClientMessage::SpawnToken { name, portrait, .. } => {
            check_name(name, "name")?;
            check_opt_limit(portrait.as_deref(), MAX_PORTRAIT_BYTES, "portrait")
        }
        ClientMessage::RemoveToken { id, .. } => check_id(id, "id"),
        ClientMessage::AddDrawing { drawing } => {
            check_id(&drawing.id, "drawing.id")?;
            if !drawing.owner.is_empty() && drawing.owner != sender_uid {
                return Err(ValidationError::UidMismatch);
            }
            if drawing.points.is_empty() {
                return Err(ValidationError::MissingField("drawing.points"));
            }
            if drawing.points.len() > MAX_DRAWING_POINTS {
                return Err(ValidationError::LimitExceeded {
                    field: "drawing.points",
                    limit: MAX_DRAWING_POINTS,
                });
            }
            for point in &drawing.points {
                check_finite(point.x, "drawing.points")?;
                check_finite(point.y, "drawing.points")?;
            }
            if drawing.color.len() > MAX_COLOR_LEN {
                return Err(ValidationError::FieldTooLong("drawing.color"));
            }
            if !drawing.width.is_finite() || drawing.width <= 0.0 {
                return Err(ValidationError::BadStrokeWidth);
            }
            Ok(())
        }
        ClientMessage::PlaceProp {
            name, x, y, image, ..
        } => {
            check_name(name, "name")?;
            check_finite(*x, "x")?;
            check_finite(*y, "y")?;
            check_opt_limit(image.as_deref(), MAX_PORTRAIT_BYTES, "image")
        }
        ClientMessage::RemoveProp { id } => check_id(id, "id"),
        ClientMessage::SetMapBackground { background, .. } => {
            if let Some(background) = background {
                check_finite(background.width, "background.width")?;
                check_finite(background.height, "background.height")?;
                check_opt_limit(background.data.as_deref(), MAX_BACKGROUND_BYTES, "background.data")?;
                check_opt_len(background.url.as_deref(), MAX_URL_LEN, "background.url")?;
            }
            Ok(())
        }
        ClientMessage::SetGridConfig { grid } => {
            if !grid.size.is_finite() || grid.size <= 0.0 {
                return Err(ValidationError::NonFinite("grid.size"));
            }
            Ok(())
        }
        ClientMessage::UpdatePlayer {
            name,
            hp,
            max_hp,
            portrait,
            mic_level,
            status_effects,
        } => {
            if let Some(name) = name {
                check_name(name, "name")?;
            }
            for value in [hp, max_hp].into_iter().flatten() {
                if !(-1_000_000..=1_000_000).contains(value) {
                    return Err(ValidationError::LimitExceeded {
                        field: "hp",
                        limit: 1_000_000,
                    });
                }
            }
            check_opt_limit(portrait.as_deref(), MAX_PORTRAIT_BYTES, "portrait")?;
            if let Some(level) = mic_level {
                check_finite(*level, "micLevel")?;
            }
            if let Some(effects) = status_effects {
                if effects.len() > MAX_STATUS_EFFECTS {
                    return Err(ValidationError::LimitExceeded {
                        field: "statusEffects",
                        limit: MAX_STATUS_EFFECTS,
                    });
                }
                for effect in effects {
                    if effect.len() > MAX_COLOR_LEN {
                        return Err(ValidationError::FieldTooLong("statusEffects"));
                    }
                }
            }
            Ok(())
        }
        ClientMessage::RemovePlayer { uid, .. } => check_id(uid, "uid"),
        ClientMessage::ShowPointer { x, y } => {
            check_finite(*x, "x")?;
            check_finite(*y, "y")
        }
        ClientMessage::Signal { target, .. } => check_id(target, "target"),
    }
}

fn check_sender(uid: &str, sender_uid: &str) -> Result<(), ValidationError> {
    if uid != sender_uid {
        return Err(ValidationError::UidMismatch);
    }
    Ok(())
}

fn check_id(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ValidationError::FieldTooLong(field));
    }
    Ok(())
}

fn check_name(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(ValidationError::FieldTooLong(field));
    }
    Ok(())
}

fn check_finite(value: f32, field: &'static str) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite(field))
    }
}

fn check_opt_len(
    value: Option<&str>,
    max: usize,
    field: &'static str,
) -> Result<(), ValidationError> {
    match value {
        Some(v) if v.len() > max => Err(ValidationError::FieldTooLong(field)),
        _ => Ok(()),
    }
}

fn check_opt_limit(
    value: Option<&str>,
    limit: usize,
    field: &'static str,
) -> Result<(), ValidationError> {
    match value {
        Some(v) if v.len() > limit => Err(ValidationError::LimitExceeded { field, limit }),
        _ => Ok(()),
    }
}
