use std::f64::consts::TAU;

use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use log::debug;
use rayon::prelude::*;

use crate::common::metadata::{ScanParameters, MAX_RINGS};

use super::prepare::PreparedImage;
use super::sample::bilinear;

// Detected geometry
//------------------------------------------------------------------------------

/// Geometry of a located code on the working surface. Created fresh per
/// decode attempt and discarded when the call returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedGeometry {
    pub center: (f32, f32),
    pub anchor_radius: f32,
    pub outer_radius: f32,
    /// Rotation of the pattern in radians; filled by the orientation
    /// resolver after localization
    pub orientation: f64,
    pub ring_width: f32,
    pub rings: u32,
}

// Hough circle transform
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct HoughParams {
    /// Accumulator downscale factor
    dp: u32,
    /// Minimum distance between candidate centers
    min_dist: f32,
    /// Gradient magnitude needed for an edge to vote
    edge_thresh: f32,
    /// Minimum accumulator votes for a candidate center
    accum_thresh: u32,
}

// Sensitivity sets, most to least permissive in the order they are tried
const PARAM_SETS: [HoughParams; 3] = [
    HoughParams { dp: 1, min_dist: 50.0, edge_thresh: 50.0, accum_thresh: 30 },
    HoughParams { dp: 1, min_dist: 30.0, edge_thresh: 40.0, accum_thresh: 25 },
    HoughParams { dp: 2, min_dist: 40.0, edge_thresh: 60.0, accum_thresh: 35 },
];

const MAX_CENTERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Circle {
    x: f32,
    y: f32,
    r: f32,
    votes: u32,
}

/// Gradient Hough transform for circles: every edge pixel votes for
/// centers along its gradient direction at every radius in range, then
/// each strong center is scanned for supported radii. A center may yield
/// several circles; the anchor and the distortion ring are concentric.
fn detect_circles(binary: &GrayImage, p: &HoughParams, min_r: u32, max_r: u32) -> Vec<Circle> {
    let (w, h) = binary.dimensions();
    if w < 16 || h < 16 || min_r >= max_r {
        return Vec::new();
    }

    let gx = horizontal_sobel(binary);
    let gy = vertical_sobel(binary);

    let mut edges: Vec<(f32, f32, f32, f32)> = Vec::new();
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let dx = gx.get_pixel(x, y)[0] as f32;
            let dy = gy.get_pixel(x, y)[0] as f32;
            let mag = (dx * dx + dy * dy).sqrt();
            if mag > p.edge_thresh {
                edges.push((x as f32, y as f32, dx / mag, dy / mag));
            }
        }
    }
    if edges.is_empty() {
        return Vec::new();
    }

    // Vote along both gradient directions; dark-on-bright and
    // bright-on-dark edges then support the same center
    let dp = p.dp.max(1);
    let (aw, ah) = (w.div_ceil(dp) as usize, h.div_ceil(dp) as usize);
    let mut acc = vec![0u32; aw * ah];
    for &(x, y, ux, uy) in &edges {
        for r in min_r..=max_r {
            let rf = r as f32;
            for sign in [-1.0f32, 1.0] {
                let cx = x + sign * rf * ux;
                let cy = y + sign * rf * uy;
                if cx >= 0.0 && cx < w as f32 && cy >= 0.0 && cy < h as f32 {
                    acc[(cy as u32 / dp) as usize * aw + (cx as u32 / dp) as usize] += 1;
                }
            }
        }
    }

    // Strong local maxima become candidate centers, separated by min_dist
    let mut peaks: Vec<(u32, usize, usize)> = Vec::new();
    for cy in 0..ah {
        for cx in 0..aw {
            let v = acc[cy * aw + cx];
            if v < p.accum_thresh {
                continue;
            }
            let mut is_max = true;
            for ny in cy.saturating_sub(1)..=(cy + 1).min(ah - 1) {
                for nx in cx.saturating_sub(1)..=(cx + 1).min(aw - 1) {
                    if acc[ny * aw + nx] > v {
                        is_max = false;
                    }
                }
            }
            if is_max {
                peaks.push((v, cx, cy));
            }
        }
    }
    peaks.sort_unstable_by(|a, b| b.0.cmp(&a.0));

    let half = (dp as f32 - 1.0) / 2.0;
    let mut centers: Vec<(f32, f32)> = Vec::new();
    for &(_, cx, cy) in &peaks {
        let x = (cx as u32 * dp) as f32 + half;
        let y = (cy as u32 * dp) as f32 + half;
        if centers.iter().all(|&(ox, oy)| (x - ox).hypot(y - oy) >= p.min_dist) {
            centers.push((x, y));
            if centers.len() == MAX_CENTERS {
                break;
            }
        }
    }

    let mut circles = Vec::new();
    for &(cx, cy) in &centers {
        collect_radii(&edges, cx, cy, min_r, max_r, p.accum_thresh, &mut circles);
    }
    circles
}

/// Histogram of edge distances from a candidate center; every well
/// supported peak is one circle. Support must cover at least a quarter of
/// the circumference to discard accidental alignments.
fn collect_radii(
    edges: &[(f32, f32, f32, f32)],
    cx: f32,
    cy: f32,
    min_r: u32,
    max_r: u32,
    accum_thresh: u32,
    out: &mut Vec<Circle>,
) {
    let mut hist = vec![0u32; max_r as usize + 3];
    for &(x, y, _, _) in edges {
        let d = (x - cx).hypot(y - cy).round() as usize;
        if d >= min_r as usize && d <= max_r as usize + 1 {
            hist[d] += 1;
        }
    }

    let mut peaks: Vec<(u32, usize)> = Vec::new();
    for r in min_r as usize..=max_r as usize {
        let v = hist[r];
        if v == 0 || v < hist[r - 1] || v < hist[r + 1] {
            continue;
        }
        let support = hist[r - 1] + v + hist[r + 1];
        let needed = (0.25 * TAU * r as f64) as u32;
        if support >= accum_thresh.max(needed) {
            peaks.push((support, r));
        }
    }
    peaks.sort_unstable_by(|a, b| b.0.cmp(&a.0));

    for &(support, r) in &peaks {
        let rf = r as f32;
        if out.iter().any(|c| {
            (c.x - cx).hypot(c.y - cy) < 4.0 && (c.r - rf).abs() < (0.15 * c.r).max(4.0)
        }) {
            continue;
        }
        // Sub-bin refinement from the three supporting bins
        let (l, m, h) = (hist[r - 1] as f32, hist[r] as f32, hist[r + 1] as f32);
        let refined = ((r as f32 - 1.0) * l + r as f32 * m + (r as f32 + 1.0) * h) / (l + m + h);
        out.push(Circle { x: cx, y: cy, r: refined, votes: support });
    }
}

// Localization
//------------------------------------------------------------------------------

/// Runs the parameter sets against the binary surface and distills the
/// candidate circles into a verified code geometry.
///
/// Multithreaded mode evaluates all sets concurrently and combines them
/// with the same order-deterministic rule the sequential walk uses, so
/// both modes yield the same geometry for the same surface.
pub(crate) fn localize(surface: &PreparedImage, scan: &ScanParameters) -> Option<DetectedGeometry> {
    let (w, h) = surface.binary.dimensions();
    let min_r = scan.min_anchor_radius;
    let max_r = (w.min(h) / 2).saturating_sub(1);
    if max_r <= min_r {
        return None;
    }

    let results: Vec<Vec<Circle>> = if scan.enable_multithreading {
        PARAM_SETS.par_iter().map(|p| detect_circles(&surface.binary, p, min_r, max_r)).collect()
    } else {
        let mut out = Vec::new();
        for p in &PARAM_SETS {
            let circles = detect_circles(&surface.binary, p, min_r, max_r);
            let enough = circles.len() >= 2;
            out.push(circles);
            if enough {
                break;
            }
        }
        out
    };

    // First set with at least an outer ring and an anchor wins; otherwise
    // fall through to the last set that found anything
    let circles = results
        .iter()
        .find(|c| c.len() >= 2)
        .or_else(|| results.iter().rev().find(|c| !c.is_empty()))?;
    debug!("{} candidate circles", circles.len());

    select_geometry(circles, surface, scan)
}

fn select_geometry(
    circles: &[Circle],
    surface: &PreparedImage,
    scan: &ScanParameters,
) -> Option<DetectedGeometry> {
    let (w, h) = surface.binary.dimensions();
    let (half_w, half_h) = (w as f32 / 2.0, h as f32 / 2.0);
    let limit = w.min(h) as f32 * 0.4;

    // Background clutter is rarely centered in the frame
    let centered: Vec<Circle> = circles
        .iter()
        .filter(|c| (c.x - half_w).abs() < limit && (c.y - half_h).abs() < limit)
        .copied()
        .collect();

    let outer = *centered.iter().max_by(|a, b| a.r.total_cmp(&b.r))?;

    let anchor = *centered
        .iter()
        .filter(|c| {
            let dist = (c.x - outer.x).hypot(c.y - outer.y);
            dist < 0.3 * outer.r
                && c.r <= 0.3 * outer.r
                && c.r >= scan.min_anchor_radius as f32
                && c.r <= scan.max_anchor_radius as f32
        })
        .min_by(|a, b| {
            let da = (a.x - outer.x).hypot(a.y - outer.y);
            let db = (b.x - outer.x).hypot(b.y - outer.y);
            a.r.total_cmp(&b.r).then(da.total_cmp(&db))
        })?;

    let center = (anchor.x, anchor.y);
    let outer_radius = snap_outer(&surface.gray, center, outer.r);
    let (ring_width, rings) = refine_rings(&surface.gray, center, anchor.r, outer_radius);
    debug!(
        "Outer r {outer_radius:.1} ({} votes), anchor r {:.1} ({} votes), {} rings of width {ring_width:.1}",
        outer.votes, anchor.r, anchor.votes, rings
    );

    let geom = DetectedGeometry {
        center,
        anchor_radius: anchor.r,
        outer_radius,
        orientation: 0.0,
        ring_width,
        rings,
    };
    verify_geometry(&surface.gray, &geom).then_some(geom)
}

// Outer radius snapping and verification
//------------------------------------------------------------------------------

/// Fraction of samples along a circle that read dark. Out of bounds
/// samples count as bright.
fn dark_fraction(gray: &GrayImage, center: (f32, f32), radius: f32) -> f32 {
    const SAMPLES: u32 = 72;
    let mut dark = 0u32;
    for i in 0..SAMPLES {
        let a = i as f64 * TAU / SAMPLES as f64;
        let x = center.0 + radius * a.cos() as f32;
        let y = center.1 + radius * a.sin() as f32;
        if bilinear(gray, x, y).is_some_and(|v| v < 128.0) {
            dark += 1;
        }
    }
    dark as f32 / SAMPLES as f32
}

// The radius histogram may lock onto the inner edge of the distortion
// band; walk outward to its outer edge so the ring span is consistent
fn snap_outer(gray: &GrayImage, center: (f32, f32), mut radius: f32) -> f32 {
    for _ in 0..10 {
        if dark_fraction(gray, center, radius + 1.0) >= 0.5 {
            radius += 1.0;
        } else {
            break;
        }
    }
    radius
}

/// Structural crosscheck before the geometry is trusted: the distortion
/// ring must trace dark (a quarter may be occluded), the anchor interior
/// must be solid dark, and the reserved band between anchor and data must
/// contrast against it. Random clutter fails these overwhelmingly.
fn verify_geometry(gray: &GrayImage, geom: &DetectedGeometry) -> bool {
    if dark_fraction(gray, geom.center, geom.outer_radius - 1.0) < 0.75 {
        return false;
    }

    let anchor_mean = circle_mean(gray, geom.center, geom.anchor_radius / 2.0, &anchor_angles());
    let band_mean = circle_mean(
        gray,
        geom.center,
        geom.anchor_radius + geom.ring_width / 2.0,
        &band_angles(),
    );
    anchor_mean < 128.0 && band_mean - anchor_mean >= 60.0
}

fn anchor_angles() -> Vec<f64> {
    (0..16).map(|i| i as f64 * TAU / 16.0).collect()
}

// Four arcs between the cardinal directions, clear of wherever the fin sits
fn band_angles() -> Vec<f64> {
    let mut angles = Vec::with_capacity(16);
    for q in 0..4 {
        let base = TAU / 8.0 + q as f64 * TAU / 4.0;
        for j in [-1.5, -0.5, 0.5, 1.5] {
            angles.push(base + j * TAU / 48.0);
        }
    }
    angles
}

fn circle_mean(gray: &GrayImage, center: (f32, f32), radius: f32, angles: &[f64]) -> f32 {
    let mut sum = 0.0;
    let mut count = 0u32;
    for &a in angles {
        let x = center.0 + radius * a.cos() as f32;
        let y = center.1 + radius * a.sin() as f32;
        if let Some(v) = bilinear(gray, x, y) {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        255.0
    } else {
        sum / count as f32
    }
}

// Ring count refinement
//------------------------------------------------------------------------------

// Angular dark/bright signature at every integer radius of the data
// annulus; ring boundaries show up as Hamming jumps between adjacent
// radii. Each candidate ring count predicts boundary radii; the count
// whose predictions line up with the observed jumps (and leave little
// jump energy elsewhere) wins. Falls back to the coarse span/10 estimate
// when the annulus is too thin to score.
fn refine_rings(gray: &GrayImage, center: (f32, f32), anchor_r: f32, outer_r: f32) -> (f32, u32) {
    let span = outer_r - anchor_r;
    let coarse_w = (span / 10.0).max(1.0);
    let coarse_n = ((span / coarse_w) as u32).clamp(1, MAX_RINGS);

    let r_start = anchor_r + 2.0;
    let r_end = outer_r - 2.0;
    let rows = (r_end - r_start) as usize;
    if span < 8.0 || rows < 4 {
        return (coarse_w, coarse_n);
    }

    const ANGLES: usize = 128;
    let signature = |radius: f32| -> Vec<bool> {
        (0..ANGLES)
            .map(|t| {
                let a = t as f64 * TAU / ANGLES as f64;
                let x = center.0 + radius * a.cos() as f32;
                let y = center.1 + radius * a.sin() as f32;
                bilinear(gray, x, y).is_some_and(|v| v < 128.0)
            })
            .collect()
    };

    let sigs: Vec<Vec<bool>> = (0..=rows).map(|i| signature(r_start + i as f32)).collect();
    let jumps: Vec<f32> = (0..rows)
        .map(|i| sigs[i].iter().zip(&sigs[i + 1]).filter(|(a, b)| a != b).count() as f32)
        .collect();

    let mut best: Option<(f32, u32)> = None;
    for n in 1..=MAX_RINGS {
        let w_n = span / (n + 1) as f32;
        if w_n < 2.0 {
            break;
        }
        let tol = (w_n / 6.0).max(2.0);

        let mut on_boundary = vec![false; rows];
        let mut on_score = 0.0;
        for k in 1..=n {
            // jumps[i] sits between radii r_start+i and r_start+i+1
            let ci = (anchor_r + k as f32 * w_n) - r_start - 0.5;
            let lo = ((ci - tol).ceil().max(0.0) as usize).min(rows - 1);
            let hi = ((ci + tol).floor().max(0.0) as usize).min(rows - 1);
            let mut peak = 0.0f32;
            for (i, flag) in on_boundary.iter_mut().enumerate().take(hi + 1).skip(lo) {
                peak = peak.max(jumps[i]);
                *flag = true;
            }
            on_score += peak;
        }
        on_score /= n as f32;

        let off: Vec<f32> =
            jumps.iter().zip(&on_boundary).filter(|(_, b)| !**b).map(|(j, _)| *j).collect();
        let off_score = if off.is_empty() { 0.0 } else { off.iter().sum::<f32>() / off.len() as f32 };

        let score = on_score - off_score;
        if best.is_none_or(|(s, _)| score > s) {
            best = Some((score, n));
        }
    }

    match best {
        Some((score, n)) if score > 0.0 => (span / (n + 1) as f32, n),
        _ => (coarse_w, coarse_n),
    }
}

#[cfg(test)]
mod locate_tests {

    use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};

    use crate::builder::KDBuilder;
    use crate::common::metadata::ScanParameters;
    use crate::reader::prepare::PreparedImage;

    use super::*;

    fn as_prepared(gray: GrayImage) -> PreparedImage {
        let binary = imageproc::contrast::threshold(
            &gray,
            128,
            imageproc::contrast::ThresholdType::Binary,
        );
        PreparedImage { gray, binary, scale: 1.0 }
    }

    fn synthetic_rings() -> PreparedImage {
        let mut img = GrayImage::from_pixel(400, 400, image::Luma([255]));
        draw_filled_circle_mut(&mut img, (200, 200), 30, image::Luma([0]));
        for j in 0..4 {
            draw_hollow_circle_mut(&mut img, (200, 200), 150 - j, image::Luma([0]));
        }
        as_prepared(img)
    }

    #[test]
    fn test_detect_concentric_circles() {
        let surface = synthetic_rings();
        let circles = detect_circles(&surface.binary, &PARAM_SETS[0], 5, 199);
        assert!(circles.len() >= 2, "found {} circles", circles.len());

        let outer = circles.iter().max_by(|a, b| a.r.total_cmp(&b.r)).unwrap();
        let inner = circles.iter().min_by(|a, b| a.r.total_cmp(&b.r)).unwrap();
        assert!((outer.r - 149.0).abs() < 3.0, "outer radius {}", outer.r);
        assert!((inner.r - 30.0).abs() < 3.0, "inner radius {}", inner.r);
        assert!((outer.x - 200.0).abs() < 3.0 && (outer.y - 200.0).abs() < 3.0);
    }

    #[test]
    fn test_localize_rendered_code() {
        let img = KDBuilder::new("HI").build().unwrap().to_image();
        let surface = as_prepared(img);
        let geom = localize(&surface, &ScanParameters::default()).expect("geometry");

        assert!((geom.center.0 - 250.0).abs() < 3.0);
        assert!((geom.center.1 - 250.0).abs() < 3.0);
        assert!((geom.anchor_radius - 50.0).abs() < 3.0, "anchor {}", geom.anchor_radius);
        assert!((geom.outer_radius - 200.0).abs() < 4.0, "outer {}", geom.outer_radius);
        assert_eq!(geom.rings, 1);
        assert!((geom.ring_width - 75.0).abs() < 5.0, "ring width {}", geom.ring_width);
    }

    #[test]
    fn test_localize_survives_partial_occlusion() {
        let mut img = KDBuilder::new("HI").build().unwrap().to_image();
        // Erase a sixth of the distortion ring
        for y in 0..60 {
            for x in 200..300 {
                img.put_pixel(x, y + 40, image::Luma([255]));
            }
        }
        let surface = as_prepared(img);
        let geom = localize(&surface, &ScanParameters::default());
        assert!(geom.is_some());
    }

    #[test]
    fn test_localize_rejects_blank_surface() {
        let surface = as_prepared(GrayImage::from_pixel(400, 400, image::Luma([255])));
        assert!(localize(&surface, &ScanParameters::default()).is_none());
    }

    #[test]
    fn test_refine_rings_on_rendered_code() {
        // 13 chars on 16 segments: 7 rings
        let img = KDBuilder::new("KD-Code rocks").build().unwrap().to_image();
        let c = (img.width() / 2) as f32;
        let (w, n) = refine_rings(&img, (c, c), 50.0, 50.0 + 8.0 * 75.0);
        assert_eq!(n, 7);
        assert!((w - 75.0).abs() < 2.0, "width {w}");
    }

    #[test]
    fn test_multithreaded_matches_sequential() {
        let img = KDBuilder::new("HI").build().unwrap().to_image();
        let surface = as_prepared(img);
        let seq = localize(&surface, &ScanParameters::default());
        let par = localize(
            &surface,
            &ScanParameters { enable_multithreading: true, ..Default::default() },
        );
        assert_eq!(seq, par);
    }
}
