//! Staging zone geometry: sanitization of untrusted zone input and uniform
//! spawn sampling inside the rotated rectangle.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A rectangular spawn region for new tokens. `x`/`y` are the zone center;
/// `width`/`height` are the canonical base size and are never baked by scale
/// (scale lives only in the scene projection, so the base stays reversible).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingZone {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
}

impl StagingZone {
    /// Coerces an untrusted value into a zone.
    ///
    /// Numeric fields accept numbers or numeric strings. Non-finite or missing
    /// `x`/`y`/`width`/`height` reject the whole zone; `width`/`height` are
    /// forced positive with a floor of 1; a missing or non-finite rotation
    /// defaults to 0. Idempotent: sanitizing a sanitized zone is a no-op.
    pub fn sanitize(raw: &Value) -> Option<StagingZone> {
        let x = coerce_finite(raw.get("x"))?;
        let y = coerce_finite(raw.get("y"))?;
        let width = coerce_finite(raw.get("width"))?.abs().max(1.0);
        let height = coerce_finite(raw.get("height"))?.abs().max(1.0);
        let rotation = coerce_finite(raw.get("rotation")).unwrap_or(0.0);

        Some(StagingZone {
            x,
            y,
            width,
            height,
            rotation,
        })
    }

    /// Samples a uniform point inside the rotated rectangle.
    ///
    /// Samples the local axis-aligned box, rotates by `rotation` (degrees)
    /// with the standard 2x2 rotation matrix, then translates by the zone
    /// center.
    pub fn spawn_position<R: Rng>(&self, rng: &mut R) -> (f32, f32) {
        let local_x = (rng.gen::<f32>() - 0.5) * self.width;
        let local_y = (rng.gen::<f32>() - 0.5) * self.height;

        let theta = self.rotation.to_radians();
        let (sin, cos) = theta.sin_cos();
        let rotated_x = local_x * cos - local_y * sin;
        let rotated_y = local_x * sin + local_y * cos;

        (self.x + rotated_x, self.y + rotated_y)
    }
}

fn coerce_finite(value: Option<&Value>) -> Option<f32> {
    let number = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };

    let number = number as f32;
    if number.is_finite() {
        Some(number)
    } else {
        None
    }
}
