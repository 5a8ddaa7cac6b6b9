mod kd;

pub use kd::KDCode;

use log::debug;

use crate::common::{
    codec::text_to_bits,
    error::{KDError, KDResult},
    metadata::{CodeParameters, RasterPlan},
};

/// Convenience wrapper: encode `text` straight to lossless PNG bytes.
pub fn encode(text: &str, params: &CodeParameters) -> KDResult<Vec<u8>> {
    KDBuilder::new(text).params(*params).build()?.png_bytes()
}

// KD builder
//------------------------------------------------------------------------------

pub struct KDBuilder<'a> {
    text: &'a str,
    params: CodeParameters,
}

impl<'a> KDBuilder<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, params: CodeParameters::default() }
    }

    pub fn text(&mut self, text: &'a str) -> &mut Self {
        self.text = text;
        self
    }

    pub fn params(&mut self, params: CodeParameters) -> &mut Self {
        self.params = params;
        self
    }

    pub fn segments_per_ring(&mut self, segments: u32) -> &mut Self {
        self.params.segments_per_ring = segments;
        self
    }

    pub fn anchor_radius(&mut self, radius: u32) -> &mut Self {
        self.params.anchor_radius = radius;
        self
    }

    pub fn ring_width(&mut self, width: u32) -> &mut Self {
        self.params.ring_width = width;
        self
    }

    pub fn scale_factor(&mut self, scale: u32) -> &mut Self {
        self.params.scale_factor = scale;
        self
    }

    pub fn max_chars(&mut self, max: usize) -> &mut Self {
        self.params.max_chars = max;
        self
    }

    pub fn metadata(&self) -> String {
        format!(
            "{{ Segments: {}, Anchor: {}, Ring width: {}, Scale: {} }}",
            self.params.segments_per_ring,
            self.params.anchor_radius,
            self.params.ring_width,
            self.params.scale_factor
        )
    }

    pub fn build(&self) -> KDResult<KDCode> {
        debug!("Generating KD-Code {}", self.metadata());

        self.params.validate()?;

        let len = self.text.chars().count();
        if len == 0 {
            return Err(KDError::EmptyText);
        }
        if len > self.params.max_chars {
            return Err(KDError::TextTooLong(len, self.params.max_chars));
        }

        let mut bits = text_to_bits(self.text)?;

        // Bounds-checked before any canvas is allocated
        let plan = RasterPlan::compute(bits.len(), &self.params)?;

        // Zero padding fills the last ring; on decode it reads as a NUL
        // terminator
        bits.pad_to_multiple(self.params.segments_per_ring as usize);

        debug!(
            "Planned {} rings, outer radius {}, canvas {}px",
            plan.rings_needed, plan.outer_radius, plan.image_size
        );

        Ok(KDCode::new(bits, self.params, plan))
    }
}
