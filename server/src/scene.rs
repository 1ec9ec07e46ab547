//! Scene-graph reconciliation.
//!
//! Projects the authoritative room lists into the positioned scene-object
//! collection. Rebuilds run after every structural change, so the merge rules
//! here are the single place deciding which fields persist by id across
//! rebuilds (locked, z-index, the non-positional transform) and which are
//! recomputed from the source entity every pass. One merge function per
//! object type keeps that policy auditable.

use log::error;
use shared::{
    Drawing, MapBackground, Pointer, Prop, SceneObject, SceneObjectKind, StagingZone, Token,
    MAP_SCENE_ID, STAGING_ZONE_SCENE_ID,
};
use std::collections::{HashMap, HashSet};

use crate::room::RoomState;

const MAP_Z: i32 = -100;
const STAGING_ZONE_Z: i32 = 1;
const DRAWING_Z: i32 = 5;
const PROP_Z: i32 = 8;
const TOKEN_Z: i32 = 10;
const POINTER_Z: i32 = 20;

/// Rebuilds the scene-object list from the room's source collections.
pub fn rebuild(state: &mut RoomState) {
    let prior: HashMap<String, SceneObject> = std::mem::take(&mut state.scene_objects)
        .into_iter()
        .map(|object| (object.id.clone(), object))
        .collect();

    let mut next = Vec::new();

    if let Some(background) = &state.map_background {
        next.push(merge_map(prior.get(MAP_SCENE_ID), background));
    }
    for prop in &state.props {
        next.push(merge_prop(prior.get(&prop.scene_id()), prop));
    }
    for drawing in &state.drawings {
        next.push(merge_drawing(prior.get(&drawing.scene_id()), drawing));
    }
    if let Some(zone) = &state.staging_zone {
        next.push(merge_staging_zone(prior.get(STAGING_ZONE_SCENE_ID), zone));
    }
    for token in &state.tokens {
        next.push(merge_token(prior.get(&token.scene_id()), token));
    }
    for pointer in &state.pointers {
        next.push(merge_pointer(prior.get(&pointer.scene_id()), pointer));
    }

    // Duplicate ids signal a reconciliation bug, not user error: log and keep
    // the first occurrence rather than crash the session.
    let mut seen = HashSet::new();
    next.retain(|object| {
        if seen.insert(object.id.clone()) {
            true
        } else {
            error!("duplicate scene object id {:?} after rebuild", object.id);
            false
        }
    });

    state.scene_objects = next;
}

/// Map: position, scale and rotation all live on the projection (the
/// background itself has no coordinates), so the whole transform is sticky.
/// First appearance is locked at the back of the stack.
fn merge_map(prior: Option<&SceneObject>, background: &MapBackground) -> SceneObject {
    let mut object = match prior {
        Some(existing) => existing.clone(),
        None => {
            let mut fresh = SceneObject::new(MAP_SCENE_ID, SceneObjectKind::Map);
            fresh.locked = true;
            fresh.z_index = MAP_Z;
            fresh
        }
    };

    object.kind = SceneObjectKind::Map;
    object.owner = None;
    object.image = background.data.clone().or_else(|| background.url.clone());
    object.width = Some(background.width);
    object.height = Some(background.height);
    object
}

/// Token: position is never sticky; it is overwritten from the authoritative
/// token coordinates on every pass. Scale, rotation and lock persist.
fn merge_token(prior: Option<&SceneObject>, token: &Token) -> SceneObject {
    let mut object = match prior {
        Some(existing) => existing.clone(),
        None => {
            let mut fresh = SceneObject::new(&token.scene_id(), SceneObjectKind::Token);
            fresh.z_index = TOKEN_Z;
            fresh
        }
    };

    object.kind = SceneObjectKind::Token;
    object.owner = token.owner.clone();
    object.transform.x = token.x;
    object.transform.y = token.y;
    object.label = Some(token.name.clone());
    object.image = token.portrait.clone();
    object
}

/// Drawing: geometry is recomputed from the stroke; the transform (including
/// position, which acts as a drag offset) is sticky.
fn merge_drawing(prior: Option<&SceneObject>, drawing: &Drawing) -> SceneObject {
    let mut object = match prior {
        Some(existing) => existing.clone(),
        None => {
            let mut fresh = SceneObject::new(&drawing.scene_id(), SceneObjectKind::Drawing);
            fresh.z_index = DRAWING_Z;
            fresh
        }
    };

    object.kind = SceneObjectKind::Drawing;
    object.owner = Some(drawing.owner.clone());
    object.points = Some(drawing.points.clone());
    object.color = Some(drawing.color.clone());
    object.stroke_width = Some(drawing.width);
    object
}

/// Prop: like a token, position comes from the entity each pass.
fn merge_prop(prior: Option<&SceneObject>, prop: &Prop) -> SceneObject {
    let mut object = match prior {
        Some(existing) => existing.clone(),
        None => {
            let mut fresh = SceneObject::new(&prop.scene_id(), SceneObjectKind::Prop);
            fresh.z_index = PROP_Z;
            fresh
        }
    };

    object.kind = SceneObjectKind::Prop;
    object.owner = prop.owner.clone();
    object.transform.x = prop.x;
    object.transform.y = prop.y;
    object.label = Some(prop.name.clone());
    object.image = prop.image.clone();
    object
}

/// Staging zone: position and rotation mirror the canonical zone; only scale
/// is projection-local, so the canonical base size stays reversible.
fn merge_staging_zone(prior: Option<&SceneObject>, zone: &StagingZone) -> SceneObject {
    let mut object = match prior {
        Some(existing) => existing.clone(),
        None => {
            let mut fresh = SceneObject::new(STAGING_ZONE_SCENE_ID, SceneObjectKind::StagingZone);
            fresh.z_index = STAGING_ZONE_Z;
            fresh
        }
    };

    object.kind = SceneObjectKind::StagingZone;
    object.owner = None;
    object.transform.x = zone.x;
    object.transform.y = zone.y;
    object.transform.rotation = zone.rotation;
    object.width = Some(zone.width);
    object.height = Some(zone.height);
    object
}

/// Pointer: always locked, position from the canonical pointer.
fn merge_pointer(prior: Option<&SceneObject>, pointer: &Pointer) -> SceneObject {
    let mut object = match prior {
        Some(existing) => existing.clone(),
        None => {
            let mut fresh = SceneObject::new(&pointer.scene_id(), SceneObjectKind::Pointer);
            fresh.z_index = POINTER_Z;
            fresh
        }
    };

    object.kind = SceneObjectKind::Pointer;
    object.owner = Some(pointer.uid.clone());
    object.locked = true;
    object.transform.x = pointer.x;
    object.transform.y = pointer.y;
    object
}
