use crate::common::error::{KDError, KDResult};

// Global limits
//------------------------------------------------------------------------------

/// Valid segments per ring values
pub const ALLOWED_SEGMENT_COUNTS: [u32; 3] = [8, 16, 32];

/// Maximum number of data rings allowed
pub const MAX_RINGS: u32 = 20;

/// Maximum allowed encoded image dimension in pixels
pub const MAX_IMAGE_SIZE: u32 = 2000;

/// Margin around the outermost ring, in unscaled units
pub const IMAGE_MARGIN: u32 = 20;

/// Decode-side working resolution ceiling; larger inputs are downscaled
pub const MAX_SCAN_DIMENSION: u32 = 800;

/// Maximum characters accepted in input, before ring capacity checks
pub const MAX_ALLOWED_CHARS: usize = 1024;

/// Upper bound on payload bits a bit stream must be able to hold
pub const MAX_PAYLOAD_BITS: usize = MAX_ALLOWED_CHARS * 8;

// Code parameters
//------------------------------------------------------------------------------

/// Geometry and capacity parameters for generating a KD-Code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeParameters {
    pub segments_per_ring: u32,
    pub anchor_radius: u32,
    pub ring_width: u32,
    pub scale_factor: u32,
    pub max_chars: usize,
}

impl Default for CodeParameters {
    fn default() -> Self {
        Self { segments_per_ring: 16, anchor_radius: 10, ring_width: 15, scale_factor: 5, max_chars: 128 }
    }
}

impl CodeParameters {
    pub fn validate(&self) -> KDResult<()> {
        if !ALLOWED_SEGMENT_COUNTS.contains(&self.segments_per_ring) {
            return Err(KDError::InvalidSegmentCount(self.segments_per_ring));
        }
        if self.anchor_radius == 0 {
            return Err(KDError::NonPositiveParameter("anchor_radius"));
        }
        if self.ring_width == 0 {
            return Err(KDError::NonPositiveParameter("ring_width"));
        }
        if self.scale_factor == 0 {
            return Err(KDError::NonPositiveParameter("scale_factor"));
        }
        if self.max_chars == 0 {
            return Err(KDError::NonPositiveParameter("max_chars"));
        }
        Ok(())
    }
}

// Scan parameters
//------------------------------------------------------------------------------

/// Expectations and switches for decoding a KD-Code from an image.
///
/// The anchor radius bounds apply in the working surface's pixel space,
/// after any downscale to [`MAX_SCAN_DIMENSION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParameters {
    pub segments_per_ring: u32,
    pub min_anchor_radius: u32,
    pub max_anchor_radius: u32,
    pub enable_multithreading: bool,
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            segments_per_ring: 16,
            min_anchor_radius: 5,
            max_anchor_radius: 100,
            enable_multithreading: false,
        }
    }
}

impl ScanParameters {
    pub fn validate(&self) -> KDResult<()> {
        if !ALLOWED_SEGMENT_COUNTS.contains(&self.segments_per_ring) {
            return Err(KDError::InvalidSegmentCount(self.segments_per_ring));
        }
        if self.min_anchor_radius == 0 {
            return Err(KDError::NonPositiveParameter("min_anchor_radius"));
        }
        if self.max_anchor_radius <= self.min_anchor_radius {
            return Err(KDError::InvalidAnchorRange(self.min_anchor_radius, self.max_anchor_radius));
        }
        Ok(())
    }
}

// Raster plan
//------------------------------------------------------------------------------

/// Layout derived from the payload size and code parameters, computed and
/// bounds-checked before any pixel is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterPlan {
    /// Number of data rings
    pub rings_needed: u32,
    /// Radius of the distortion ring, in unscaled units
    pub outer_radius: u32,
    /// Canvas side length in pixels
    pub image_size: u32,
}

impl RasterPlan {
    pub fn compute(total_bits: usize, params: &CodeParameters) -> KDResult<Self> {
        let segments = params.segments_per_ring as usize;
        let rings_needed = total_bits.div_ceil(segments) as u32;

        if rings_needed > MAX_RINGS {
            return Err(KDError::TooManyRings(rings_needed, MAX_RINGS));
        }

        // One extra ring width between anchor and data reserved for the
        // orientation fin; the distortion ring sits at the outer radius.
        let outer_radius = params.anchor_radius + rings_needed * params.ring_width + params.ring_width;
        let image_size = (outer_radius * 2 + IMAGE_MARGIN) * params.scale_factor;

        if image_size > MAX_IMAGE_SIZE {
            return Err(KDError::ImageTooLarge(image_size, MAX_IMAGE_SIZE));
        }

        Ok(Self { rings_needed, outer_radius, image_size })
    }
}
