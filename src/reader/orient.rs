use std::f64::consts::{FRAC_PI_2, PI, TAU};

use image::GrayImage;

use super::locate::DetectedGeometry;
use super::sample::bilinear;

// Orientation resolver
//------------------------------------------------------------------------------

/// Resolves the pattern rotation from the orientation fin. Samples the
/// four cardinal directions half a ring width beyond the anchor, inside
/// the band reserved for the fin; the darkest direction is where the fin
/// sits and the data sequence starts opposite it. Defaults to 0 when no
/// sample lands in bounds.
pub(crate) fn resolve_orientation(gray: &GrayImage, geom: &DetectedGeometry) -> f64 {
    let radius = geom.anchor_radius + geom.ring_width * 0.5;

    let mut darkest: Option<(f64, f32)> = None;
    for k in 0..4 {
        let dir = k as f64 * FRAC_PI_2;
        let x = geom.center.0 + radius * dir.cos() as f32;
        let y = geom.center.1 + radius * dir.sin() as f32;
        if let Some(v) = bilinear(gray, x, y) {
            if darkest.is_none_or(|(_, best)| v < best) {
                darkest = Some((dir, v));
            }
        }
    }

    match darkest {
        Some((dir, _)) => (dir + PI) % TAU,
        None => 0.0,
    }
}
