//! Per-object-type write authority for transforms.
//!
//! Every transform edit funnels through [`apply_transform`], which either
//! applies the whole patch (returning `true`) or rejects it with zero
//! mutation (returning `false`). Callers must not broadcast on `false`.

use log::debug;
use shared::{SceneObjectKind, Vec2};

use crate::room::RoomState;

/// A partial transform edit from the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransformPatch {
    pub position: Option<Vec2>,
    pub scale: Option<Vec2>,
    pub rotation: Option<f32>,
    pub locked: Option<bool>,
}

impl TransformPatch {
    pub fn position(x: f32, y: f32) -> Self {
        Self {
            position: Some(Vec2 { x, y }),
            ..Self::default()
        }
    }
}

/// Applies `patch` to the scene object `object_id` on behalf of `actor_uid`.
///
/// Policy:
/// - a `locked` change is always DM-only, regardless of type;
/// - an already-locked object rejects every non-DM edit outright;
/// - map and staging zone are DM-only; token and drawing accept the DM or
///   their owner; props accept the DM, their owner, or anyone when ownerless;
/// - a pointer accepts only its own uid, and only position;
/// - token and prop position edits write back to the authoritative entity
///   coordinates; staging-zone position/rotation write back to the canonical
///   zone while scale stays projection-only.
pub fn apply_transform(
    state: &mut RoomState,
    object_id: &str,
    actor_uid: &str,
    patch: &TransformPatch,
) -> bool {
    let index = match state.scene_objects.iter().position(|o| o.id == object_id) {
        Some(index) => index,
        None => {
            debug!("transform rejected: unknown object {:?}", object_id);
            return false;
        }
    };

    let (kind, owner, locked) = {
        let object = &state.scene_objects[index];
        (object.kind, object.owner.clone(), object.locked)
    };
    let is_dm = state.is_dm(actor_uid);
    let is_owner = owner.as_deref() == Some(actor_uid);

    // Pointers sit outside the generic lock gate: they are permanently
    // locked against everyone, yet their own uid may still move them.
    if kind == SceneObjectKind::Pointer {
        if !is_owner
            || patch.scale.is_some()
            || patch.rotation.is_some()
            || patch.locked.is_some()
        {
            debug!("transform rejected: pointer {:?} accepts only its own position", object_id);
            return false;
        }
        if let Some(position) = patch.position {
            state.scene_objects[index].transform.x = position.x;
            state.scene_objects[index].transform.y = position.y;
            let raw_uid = object_id.trim_start_matches("pointer:");
            if let Some(pointer) = state.pointers.iter_mut().find(|p| p.uid == raw_uid) {
                pointer.x = position.x;
                pointer.y = position.y;
            }
        }
        return true;
    }

    if patch.locked.is_some() && !is_dm {
        debug!("transform rejected: lock change by non-DM {}", actor_uid);
        return false;
    }
    if locked && !is_dm {
        debug!("transform rejected: {:?} is locked", object_id);
        return false;
    }

    let allowed = match kind {
        SceneObjectKind::Map => is_dm,
        SceneObjectKind::StagingZone => is_dm,
        SceneObjectKind::Token => is_dm || is_owner,
        SceneObjectKind::Drawing => is_dm || is_owner,
        SceneObjectKind::Prop => is_dm || owner.is_none() || is_owner,
        // Handled above.
        SceneObjectKind::Pointer => false,
    };
    if !allowed {
        debug!(
            "transform rejected: {} has no authority over {:?}",
            actor_uid, object_id
        );
        return false;
    }

    {
        let object = &mut state.scene_objects[index];
        if let Some(position) = patch.position {
            object.transform.x = position.x;
            object.transform.y = position.y;
        }
        if let Some(scale) = patch.scale {
            object.transform.scale_x = scale.x;
            object.transform.scale_y = scale.y;
        }
        if let Some(rotation) = patch.rotation {
            object.transform.rotation = rotation;
        }
        if let Some(locked) = patch.locked {
            object.locked = locked;
        }
    }

    match kind {
        SceneObjectKind::Token => {
            if let Some(position) = patch.position {
                let raw_id = object_id.trim_start_matches("token:");
                if let Some(token) = state.token_mut(raw_id) {
                    token.x = position.x;
                    token.y = position.y;
                }
            }
        }
        SceneObjectKind::Prop => {
            if let Some(position) = patch.position {
                let raw_id = object_id.trim_start_matches("prop:");
                if let Some(prop) = state.prop_mut(raw_id) {
                    prop.x = position.x;
                    prop.y = position.y;
                }
            }
        }
        SceneObjectKind::StagingZone => {
            if let Some(zone) = state.staging_zone.as_mut() {
                if let Some(position) = patch.position {
                    zone.x = position.x;
                    zone.y = position.y;
                }
                if let Some(rotation) = patch.rotation {
                    zone.rotation = rotation;
                }
            }
        }
        SceneObjectKind::Map | SceneObjectKind::Drawing | SceneObjectKind::Pointer => {}
    }

    true
}
