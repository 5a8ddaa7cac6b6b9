use std::fmt::{Debug, Display, Error, Formatter};

// Error
//------------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum KDError {
    // Encode validation
    EmptyText,
    TextTooLong(usize, usize),
    InvalidSegmentCount(u32),
    NonPositiveParameter(&'static str),
    InvalidQuality(u8),

    // Encoding
    UnencodableChar(char),

    // Capacity, derived from the raster plan rather than a single field
    TooManyRings(u32, u32),
    ImageTooLarge(u32, u32),

    // Scan parameter validation
    InvalidAnchorRange(u32, u32),

    // Infrastructure
    ImageWrite,
}

impl KDError {
    /// True for errors the caller can fix by changing a single input field.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyText
                | Self::TextTooLong(..)
                | Self::InvalidSegmentCount(_)
                | Self::NonPositiveParameter(_)
                | Self::InvalidQuality(_)
                | Self::InvalidAnchorRange(..)
        )
    }

    /// True for errors that depend on the derived layout, not a single field.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::TooManyRings(..) | Self::ImageTooLarge(..))
    }
}

impl Display for KDError {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        match *self {
            Self::EmptyText => f.write_str("Input text cannot be empty"),
            Self::TextTooLong(len, max) => {
                write!(f, "Input text of {len} chars exceeds maximum length of {max}")
            }
            Self::InvalidSegmentCount(n) => {
                write!(f, "segments_per_ring {n} must be one of 8, 16 or 32")
            }
            Self::NonPositiveParameter(field) => {
                write!(f, "{field} must be a positive integer")
            }
            Self::InvalidQuality(q) => {
                write!(f, "Compression quality {q} must be between 1 and 100")
            }
            Self::UnencodableChar(c) => {
                write!(f, "Character {c:?} is outside the 8-bit range")
            }
            Self::TooManyRings(needed, max) => {
                write!(f, "Input text requires {needed} rings, maximum allowed is {max}")
            }
            Self::ImageTooLarge(size, max) => {
                write!(f, "Calculated image size {size} exceeds maximum allowed size {max}")
            }
            Self::InvalidAnchorRange(min, max) => {
                write!(f, "max_anchor_radius {max} must be greater than min_anchor_radius {min}")
            }
            Self::ImageWrite => f.write_str("Failed to serialize image"),
        }
    }
}

impl std::error::Error for KDError {}

pub type KDResult<T> = Result<T, KDError>;

#[cfg(test)]
mod error_tests {

    use super::KDError;

    #[test]
    fn test_classification() {
        assert!(KDError::EmptyText.is_validation());
        assert!(KDError::InvalidSegmentCount(15).is_validation());
        assert!(KDError::InvalidAnchorRange(100, 5).is_validation());
        assert!(KDError::TooManyRings(25, 20).is_capacity());
        assert!(KDError::ImageTooLarge(4000, 2000).is_capacity());
        assert!(!KDError::UnencodableChar('€').is_validation());
        assert!(!KDError::TooManyRings(25, 20).is_validation());
    }

    #[test]
    fn test_display_carries_offending_values() {
        let msg = KDError::NonPositiveParameter("ring_width").to_string();
        assert!(msg.contains("ring_width"));
        let msg = KDError::TextTooLong(200, 128).to_string();
        assert!(msg.contains("200") && msg.contains("128"));
    }
}
