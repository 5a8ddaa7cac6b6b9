pub mod bitstream;
pub mod codec;
pub mod ec;
pub mod error;
pub mod metadata;

pub use bitstream::*;
pub use codec::*;
pub use ec::*;
pub use error::*;
pub use metadata::*;
