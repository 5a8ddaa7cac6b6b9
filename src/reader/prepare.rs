use image::imageops::FilterType;
use image::GrayImage;
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::gaussian_blur_f32;
use log::debug;

use crate::common::metadata::MAX_SCAN_DIMENSION;

// Prepared surfaces
//------------------------------------------------------------------------------

/// Decode-side working surfaces. `gray` is the resized, unequalized
/// grayscale the sampler reads; `binary` is the combined threshold surface
/// the localizer runs on. `scale` maps working coordinates back to the
/// original image.
#[derive(Debug)]
pub struct PreparedImage {
    pub gray: GrayImage,
    pub binary: GrayImage,
    pub scale: f32,
}

/// Decodes raw bytes into the working surfaces. Returns None when the
/// bytes are not a decodable image; the caller reports that as "no code
/// detected" rather than an error.
pub fn prepare(bytes: &[u8]) -> Option<PreparedImage> {
    let img = image::load_from_memory(bytes).ok()?;

    let (w, h) = (img.width(), img.height());
    let largest = w.max(h);
    let (img, scale) = if largest > MAX_SCAN_DIMENSION {
        let scale = MAX_SCAN_DIMENSION as f32 / largest as f32;
        let nw = ((w as f32 * scale).round() as u32).max(1);
        let nh = ((h as f32 * scale).round() as u32).max(1);
        (img.resize_exact(nw, nh, FilterType::Triangle), scale)
    } else {
        (img, 1.0)
    };

    let gray = img.to_luma8();
    debug!("Prepared {}x{} working surface, scale {scale}", gray.width(), gray.height());

    // Tile equalization compensates uneven lighting, the blur suppresses
    // sensor noise before thresholding
    let equalized = equalize_tiles(&gray, 8, 2.0);
    let blurred = gaussian_blur_f32(&equalized, 1.1);

    // Two candidate binarizations combined with AND: a global Otsu split
    // and a local mean threshold have to agree before a pixel counts
    let global = threshold(&blurred, otsu_level(&blurred), ThresholdType::Binary);
    let local = adaptive_mean_threshold(&blurred, 5, 2);
    let mut binary = global;
    for (p, q) in binary.pixels_mut().zip(local.pixels()) {
        p[0] = p[0].min(q[0]);
    }

    Some(PreparedImage { gray, binary, scale })
}

// Tile equalization
//------------------------------------------------------------------------------

// Contrast limited histogram equalization over a tile grid. Each tile gets
// a clipped-histogram CDF mapping; per-pixel output interpolates the four
// nearest tile mappings bilinearly to avoid tile seams.
fn equalize_tiles(img: &GrayImage, grid: u32, clip_factor: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let tile_w = (w / grid).max(1);
    let tile_h = (h / grid).max(1);
    let tiles_x = w.div_ceil(tile_w);
    let tiles_y = h.div_ceil(tile_h);

    let mut mappings = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[img.get_pixel(x, y)[0] as usize] += 1;
                }
            }

            let total = (x1 - x0) * (y1 - y0);
            let clip = ((clip_factor * total as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let bonus = excess / 256;
            let mapping = &mut mappings[(ty * tiles_x + tx) as usize];
            let mut cdf = 0u64;
            for (v, bin) in hist.iter().enumerate() {
                cdf += (*bin + bonus) as u64;
                mapping[v] = ((cdf * 255) / (total as u64).max(1)).min(255) as u8;
            }
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        // Position relative to tile centers, for mapping interpolation
        let fy = (y as f32 - tile_h as f32 / 2.0) / tile_h as f32;
        let ty0 = (fy.floor().max(0.0) as u32).min(tiles_y - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let wy = if fy < 0.0 { 0.0 } else { fy - fy.floor() };

        for x in 0..w {
            let fx = (x as f32 - tile_w as f32 / 2.0) / tile_w as f32;
            let tx0 = (fx.floor().max(0.0) as u32).min(tiles_x - 1);
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let wx = if fx < 0.0 { 0.0 } else { fx - fx.floor() };

            let v = img.get_pixel(x, y)[0] as usize;
            let m00 = mappings[(ty0 * tiles_x + tx0) as usize][v] as f32;
            let m10 = mappings[(ty0 * tiles_x + tx1) as usize][v] as f32;
            let m01 = mappings[(ty1 * tiles_x + tx0) as usize][v] as f32;
            let m11 = mappings[(ty1 * tiles_x + tx1) as usize][v] as f32;

            let top = m00 * (1.0 - wx) + m10 * wx;
            let bottom = m01 * (1.0 - wx) + m11 * wx;
            let val = top * (1.0 - wy) + bottom * wy;
            out.put_pixel(x, y, image::Luma([val.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

// Local mean threshold
//------------------------------------------------------------------------------

// Mean threshold over a (2r+1)^2 window with a small offset so uniform
// regions binarize to white instead of flickering around their own mean.
// Computed with an integral image, one pass each way.
fn adaptive_mean_threshold(img: &GrayImage, block_radius: u32, offset: u8) -> GrayImage {
    let (w, h) = img.dimensions();
    let (wi, hi) = (w as usize, h as usize);

    let mut integral = vec![0u64; (wi + 1) * (hi + 1)];
    for y in 0..hi {
        let mut row_sum = 0u64;
        for x in 0..wi {
            row_sum += img.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * (wi + 1) + x + 1] = integral[y * (wi + 1) + x + 1] + row_sum;
        }
    }

    let r = block_radius as usize;
    let mut out = GrayImage::new(w, h);
    for y in 0..hi {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r + 1).min(hi);
        for x in 0..wi {
            let x0 = x.saturating_sub(r);
            let x1 = (x + r + 1).min(wi);

            let sum = integral[y1 * (wi + 1) + x1] + integral[y0 * (wi + 1) + x0]
                - integral[y0 * (wi + 1) + x1]
                - integral[y1 * (wi + 1) + x0];
            let mean = sum / ((y1 - y0) * (x1 - x0)) as u64;

            let p = img.get_pixel(x as u32, y as u32)[0];
            let val = if p as u64 + offset as u64 > mean { 255 } else { 0 };
            out.put_pixel(x as u32, y as u32, image::Luma([val]));
        }
    }
    out
}

#[cfg(test)]
mod prepare_tests {

    use std::io::Cursor;

    use image::ImageFormat;

    use crate::builder::KDBuilder;

    use super::*;

    fn png_bytes(img: &GrayImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn test_undecodable_bytes() {
        assert!(prepare(b"definitely not an image").is_none());
        assert!(prepare(&[]).is_none());
    }

    #[test]
    fn test_code_surface() {
        let img = KDBuilder::new("HI").build().unwrap().to_image();
        let prepared = prepare(&png_bytes(&img)).unwrap();
        assert_eq!(prepared.scale, 1.0);
        assert_eq!(prepared.gray.dimensions(), (500, 500));
        // Anchor center is dark on both surfaces, the margin stays bright
        assert_eq!(prepared.binary.get_pixel(250, 250)[0], 0);
        assert!(prepared.gray.get_pixel(250, 250)[0] < 128);
        assert_eq!(prepared.binary.get_pixel(5, 5)[0], 255);
    }

    #[test]
    fn test_oversized_input_downscaled() {
        let img = GrayImage::from_pixel(1200, 900, image::Luma([255]));
        let prepared = prepare(&png_bytes(&img)).unwrap();
        assert_eq!(prepared.gray.dimensions(), (800, 600));
        assert!((prepared.scale - 800.0 / 1200.0).abs() < 1e-6);
    }

    #[test]
    fn test_uniform_regions_binarize_white() {
        let img = GrayImage::from_pixel(64, 64, image::Luma([200]));
        let local = adaptive_mean_threshold(&img, 5, 2);
        assert!(local.pixels().all(|p| p[0] == 255));
    }
}
