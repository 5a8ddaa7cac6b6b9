use std::f64::consts::TAU;

use image::GrayImage;

use crate::common::ec::SampledBit;

use super::locate::DetectedGeometry;

// Sub-pixel reads
//------------------------------------------------------------------------------

/// Intensity at a sub-pixel coordinate via bilinear interpolation. None
/// when the coordinate falls outside the image.
pub(crate) fn bilinear(img: &GrayImage, x: f32, y: f32) -> Option<f32> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }

    let x1 = x.floor() as u32;
    let y1 = y.floor() as u32;
    let x2 = (x1 + 1).min(w - 1);
    let y2 = (y1 + 1).min(h - 1);
    let dx = x - x1 as f32;
    let dy = y - y1 as f32;

    let p11 = img.get_pixel(x1, y1)[0] as f32;
    let p21 = img.get_pixel(x2, y1)[0] as f32;
    let p12 = img.get_pixel(x1, y2)[0] as f32;
    let p22 = img.get_pixel(x2, y2)[0] as f32;

    Some(
        p11 * (1.0 - dx) * (1.0 - dy)
            + p21 * dx * (1.0 - dy)
            + p12 * (1.0 - dx) * dy
            + p22 * dx * dy,
    )
}

/// Mean intensity of the clamped square neighborhood around a point.
pub(crate) fn local_average(img: &GrayImage, x: u32, y: u32, radius: u32) -> f32 {
    let (w, h) = img.dimensions();
    let x0 = x.saturating_sub(radius);
    let y0 = y.saturating_sub(radius);
    let x1 = (x + radius + 1).min(w);
    let y1 = (y + radius + 1).min(h);

    let mut sum = 0u64;
    for yy in y0..y1 {
        for xx in x0..x1 {
            sum += img.get_pixel(xx, yy)[0] as u64;
        }
    }
    sum as f32 / ((x1 - x0) * (y1 - y0)) as f32
}

// Central difference gradient magnitude; zero on the border
fn gradient_magnitude(img: &GrayImage, x: u32, y: u32) -> f32 {
    let (w, h) = img.dimensions();
    if x == 0 || y == 0 || x + 1 >= w || y + 1 >= h {
        return 0.0;
    }
    let gx = img.get_pixel(x + 1, y)[0] as f32 - img.get_pixel(x - 1, y)[0] as f32;
    let gy = img.get_pixel(x, y + 1)[0] as f32 - img.get_pixel(x, y - 1)[0] as f32;
    (gx * gx + gy * gy).sqrt()
}

// Ring sampling
//------------------------------------------------------------------------------

/// Reads one sample per (ring, segment) position at the ring mid radius,
/// packaging the local context for the corrector. Out of bounds positions
/// become zero bits with zero confidence; no thresholding happens here.
pub fn sample_rings(gray: &GrayImage, geom: &DetectedGeometry, segments: u32) -> Vec<SampledBit> {
    let (cx, cy) = geom.center;
    let window = ((geom.anchor_radius / 4.0) as u32).max(2);
    let step = TAU / segments as f64;

    let mut samples = Vec::with_capacity((geom.rings * segments) as usize);
    for ring in 0..geom.rings {
        // Mid radius of the ring's annulus; the band next to the anchor is
        // reserved for the fin
        let radius = geom.anchor_radius + (ring as f32 + 1.5) * geom.ring_width;

        for seg in 0..segments {
            let angle = geom.orientation + seg as f64 * step;
            let x = cx + radius * angle.cos() as f32;
            let y = cy + radius * angle.sin() as f32;

            let Some(intensity) = bilinear(gray, x, y) else {
                samples.push(SampledBit::out_of_bounds());
                continue;
            };

            let (xi, yi) = (x.round() as u32, y.round() as u32);
            let local_avg = local_average(gray, xi, yi, window);
            let gradient = gradient_magnitude(gray, xi, yi);
            let confidence = ((intensity - local_avg).abs() / 128.0).min(1.0);

            samples.push(SampledBit { intensity, local_avg, gradient, confidence, in_bounds: true });
        }
    }
    samples
}
