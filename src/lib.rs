//! # kdcode
//!
//! A Rust library for generating and reading KD-Codes: a circular,
//! ring-segmented barcode format. Text is transcoded into a flat bit
//! sequence and drawn as concentric rings of annular wedges around a solid
//! anchor disk; a triangular orientation fin marks the rotation reference
//! and a thin outer distortion ring anchors localization. The decoder runs
//! a multi-stage computer-vision pipeline built to survive real-world
//! camera noise, rotation and partial occlusion.
//!
//! ## Features
//!
//! - **Code Generation**: deterministic rasterization with configurable
//!   ring geometry, lossless PNG output and opt-in JPEG compression
//! - **Code Reading**: adaptive preprocessing, Hough circle localization,
//!   orientation resolution and sub-pixel ring sampling
//! - **Error Correction**: contextual bit correction with a deterministic
//!   neighbor rule and an optional trained model, degrading gracefully to
//!   plain thresholding when no model is present
//!
//! ## Quick Start
//!
//! ### Generating a KD-Code
//!
//! ```rust
//! use kdcode::KDBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let code = KDBuilder::new("Hello, KD-Code!")
//!     .segments_per_ring(16)  // 8, 16 or 32 bits per ring
//!     .build()?;
//!
//! let png = code.png_bytes()?;
//! std::fs::write("hello.png", png)?;
//! # std::fs::remove_file("hello.png").ok();
//! # Ok(())
//! # }
//! ```
//!
//! ### Reading a KD-Code
//!
//! ```rust
//! use kdcode::{decode, Decoded, KDBuilder, ScanParameters};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let bytes = KDBuilder::new("Hello, KD-Code!").build()?.png_bytes()?;
//! match decode(&bytes, &ScanParameters::default())? {
//!     Decoded::Found(text) => println!("Decoded: {text}"),
//!     Decoded::NotFound => println!("No code visible"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Format Anatomy
//!
//! - **Anchor**: solid central disk, the rotation and scale reference
//! - **Orientation fin**: triangle on the anchor's edge marking 0°; the
//!   band it occupies carries no data
//! - **Data rings**: each ring encodes `segments_per_ring` bits as drawn
//!   (1) or background (0) wedges
//! - **Distortion ring**: thin outermost outline, used only to localize
//!
//! Both encode and decode are stateless per call; the only shared state is
//! the lazily loaded, read-only correction model, safe for concurrent
//! decodes.

pub mod builder;
pub(crate) mod common;
pub mod reader;

pub use builder::{encode, KDBuilder, KDCode};
pub use common::bitstream::BitStream;
pub use common::ec::{CorrectionModel, SampledBit};
pub use common::error::{KDError, KDResult};
pub use common::metadata::{CodeParameters, RasterPlan, ScanParameters};
pub use reader::{decode, decode_with_model, Decoded};
