use std::f64::consts::{FRAC_PI_2, TAU};
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageFormat, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_polygon_mut};
use imageproc::point::Point;

use crate::common::{
    bitstream::BitStream,
    error::{KDError, KDResult},
    metadata::{CodeParameters, RasterPlan},
};

const FOREGROUND: Luma<u8> = Luma([0]);
const BACKGROUND: Luma<u8> = Luma([255]);

// Angle of the orientation fin, in the y-down image convention (screen up)
const FIN_ANGLE: f64 = 3.0 * FRAC_PI_2;

/// Center angle of segment `k`. Segments start opposite the fin so the
/// decoder's `orientation + k * step` samples land mid wedge.
fn segment_angle(k: u32, segments: u32) -> f64 {
    (FIN_ANGLE + std::f64::consts::PI) % TAU + k as f64 * TAU / segments as f64
}

// KD-Code
//------------------------------------------------------------------------------

/// A laid out KD-Code, ready to rasterize.
#[derive(Debug, Clone)]
pub struct KDCode {
    bits: BitStream,
    params: CodeParameters,
    plan: RasterPlan,
}

impl KDCode {
    pub(crate) fn new(bits: BitStream, params: CodeParameters, plan: RasterPlan) -> Self {
        debug_assert!(
            bits.len() == (plan.rings_needed * params.segments_per_ring) as usize,
            "Bit count {} doesn't fill {} rings",
            bits.len(),
            plan.rings_needed
        );

        Self { bits, params, plan }
    }

    pub fn bits(&self) -> &BitStream {
        &self.bits
    }

    pub fn params(&self) -> &CodeParameters {
        &self.params
    }

    pub fn plan(&self) -> &RasterPlan {
        &self.plan
    }
}

// Rasterization
//------------------------------------------------------------------------------

impl KDCode {
    /// Renders the code onto a square single channel canvas. Deterministic:
    /// identical input produces an identical buffer.
    pub fn to_image(&self) -> GrayImage {
        let size = self.plan.image_size;
        let scale = self.params.scale_factor;
        let center = (size / 2) as i32;
        let anchor = (self.params.anchor_radius * scale) as i32;
        let ring_w = (self.params.ring_width * scale) as i32;

        let mut img = GrayImage::from_pixel(size, size, BACKGROUND);

        draw_filled_circle_mut(&mut img, (center, center), anchor, FOREGROUND);
        self.draw_fin(&mut img, center, anchor, ring_w);
        self.draw_rings(&mut img, center, anchor, ring_w);
        self.draw_distortion_ring(&mut img, center, scale);

        img
    }

    // Isosceles fin on top of the anchor disk, apex pointing outward. The
    // base dips into the disk so the two shapes stay contiguous.
    fn draw_fin(&self, img: &mut GrayImage, center: i32, anchor: i32, ring_w: i32) {
        let half_base = ring_w / 2;
        let base_y = center - anchor + ring_w / 4;
        let apex = Point::new(center, center - anchor - ring_w);
        let left = Point::new(center - half_base, base_y);
        let right = Point::new(center + half_base, base_y);
        draw_polygon_mut(img, &[apex, left, right], FOREGROUND);
    }

    // Data ring i occupies the annulus between anchor + (i+1)*w and
    // anchor + (i+2)*w; the band directly around the anchor is reserved for
    // the fin. Only 1 bits are drawn, 0 segments stay background.
    fn draw_rings(&self, img: &mut GrayImage, center: i32, anchor: i32, ring_w: i32) {
        let segments = self.params.segments_per_ring;
        let step = TAU / segments as f64;

        for ring in 0..self.plan.rings_needed {
            let inner = (anchor + (ring as i32 + 1) * ring_w) as f64;
            let outer = (anchor + (ring as i32 + 2) * ring_w) as f64;

            for seg in 0..segments {
                let idx = (ring * segments + seg) as usize;
                if !self.bits.get(idx) {
                    continue;
                }
                let mid = segment_angle(seg, segments);
                draw_wedge(img, center as f64, inner, outer, mid - step / 2.0, mid + step / 2.0);
            }
        }
    }

    // Thin outline at the outer radius; localization anchor only, not data
    fn draw_distortion_ring(&self, img: &mut GrayImage, center: i32, scale: u32) {
        let radius = (self.plan.outer_radius * scale) as i32;
        let width = (2 * scale).max(1) as i32;
        for j in 0..width {
            draw_hollow_circle_mut(img, (center, center), radius - j, FOREGROUND);
        }
    }
}

/// Fills an annular wedge by sampling points along the outer arc forward
/// and the inner arc backward, then filling the resulting polygon. Dense
/// enough that sampled bit centers fall unambiguously inside the region.
fn draw_wedge(img: &mut GrayImage, center: f64, inner: f64, outer: f64, start: f64, end: f64) {
    let span_deg = (end - start).to_degrees().abs();
    let steps = ((span_deg * 0.5) as usize).max(10);

    let mut points: Vec<Point<i32>> = Vec::with_capacity(2 * steps + 2);
    for i in 0..=steps {
        let a = start + (end - start) * i as f64 / steps as f64;
        points.push(Point::new(
            (center + outer * a.cos()).round() as i32,
            (center + outer * a.sin()).round() as i32,
        ));
    }
    for i in 0..=steps {
        let a = end - (end - start) * i as f64 / steps as f64;
        points.push(Point::new(
            (center + inner * a.cos()).round() as i32,
            (center + inner * a.sin()).round() as i32,
        ));
    }

    // draw_polygon_mut closes the path itself and rejects duplicate
    // endpoints, so drop rounding duplicates
    points.dedup();
    if points.last() == points.first() {
        points.pop();
    }
    if points.len() >= 3 {
        draw_polygon_mut(img, &points, FOREGROUND);
    }
}

// Image output
//------------------------------------------------------------------------------

impl KDCode {
    /// Lossless PNG bytes; the default output.
    pub fn png_bytes(&self) -> KDResult<Vec<u8>> {
        let img = self.to_image();
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).or(Err(KDError::ImageWrite))?;
        Ok(buf)
    }

    /// Lossy JPEG bytes. Compression artifacts are the main noise source
    /// the decoder tolerates, so lossy output is opt in only.
    pub fn jpeg_bytes(&self, quality: u8) -> KDResult<Vec<u8>> {
        if quality == 0 || quality > 100 {
            return Err(KDError::InvalidQuality(quality));
        }
        let img = self.to_image();
        let mut buf = Vec::new();
        let mut cursor = Cursor::new(&mut buf);
        let encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
        img.write_with_encoder(encoder).or(Err(KDError::ImageWrite))?;
        Ok(buf)
    }
}
