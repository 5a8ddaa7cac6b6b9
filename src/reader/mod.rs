pub mod locate;
mod orient;
pub mod prepare;
pub mod sample;

pub use locate::DetectedGeometry;
pub use prepare::{prepare, PreparedImage};

use log::debug;

use crate::common::{
    codec::bits_to_text,
    ec::{correct, CorrectionModel},
    error::KDResult,
    metadata::ScanParameters,
};

// Decode result
//------------------------------------------------------------------------------

/// Outcome of a decode attempt. Absence of a code is an expected, common
/// result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Found(String),
    NotFound,
}

impl Decoded {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn into_option(self) -> Option<String> {
        match self {
            Self::Found(text) => Some(text),
            Self::NotFound => None,
        }
    }
}

// Decode pipeline
//------------------------------------------------------------------------------

/// Decodes a KD-Code from raw image bytes, using the process wide
/// correction model when one is present.
///
/// Returns `Ok(Decoded::NotFound)` whenever no code is visible, including
/// for bytes that don't decode as an image; errors are reserved for
/// invalid scan parameters.
pub fn decode(bytes: &[u8], params: &ScanParameters) -> KDResult<Decoded> {
    decode_with_model(bytes, params, CorrectionModel::shared())
}

/// Same as [`decode`] but with an explicit correction model handle, which
/// callers may share across threads.
pub fn decode_with_model(
    bytes: &[u8],
    params: &ScanParameters,
    model: Option<&CorrectionModel>,
) -> KDResult<Decoded> {
    params.validate()?;

    debug!("Preparing surfaces...");
    let Some(surface) = prepare::prepare(bytes) else {
        return Ok(Decoded::NotFound);
    };

    debug!("Locating code geometry...");
    let Some(mut geom) = locate::localize(&surface, params) else {
        return Ok(Decoded::NotFound);
    };

    debug!("Resolving orientation...");
    geom.orientation = orient::resolve_orientation(&surface.gray, &geom);

    debug!("Sampling ring segments...");
    let samples = sample::sample_rings(&surface.gray, &geom, params.segments_per_ring);

    debug!("Correcting bit stream...");
    let bits = correct(&samples, model);

    let text = bits_to_text(&bits);
    debug!("Decoded {} chars", text.chars().count());
    Ok(Decoded::Found(text))
}

#[cfg(test)]
mod reader_tests {

    use crate::builder::KDBuilder;
    use crate::common::error::KDError;

    use super::*;

    #[test]
    fn test_decode_rendered_code() {
        let png = KDBuilder::new("HI").build().unwrap().png_bytes().unwrap();
        let decoded = decode(&png, &ScanParameters::default()).unwrap();
        assert_eq!(decoded, Decoded::Found("HI".into()));
    }

    #[test]
    fn test_undecodable_bytes_are_not_found() {
        let decoded = decode(b"not an image", &ScanParameters::default()).unwrap();
        assert_eq!(decoded, Decoded::NotFound);
        assert_eq!(decoded.into_option(), None);
    }

    #[test]
    fn test_invalid_scan_parameters() {
        let png = KDBuilder::new("HI").build().unwrap().png_bytes().unwrap();

        let params = ScanParameters { segments_per_ring: 15, ..Default::default() };
        assert_eq!(decode(&png, &params), Err(KDError::InvalidSegmentCount(15)));

        let params =
            ScanParameters { min_anchor_radius: 50, max_anchor_radius: 10, ..Default::default() };
        assert_eq!(decode(&png, &params), Err(KDError::InvalidAnchorRange(50, 10)));
    }
}
