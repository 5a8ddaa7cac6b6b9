use crate::common::{
    bitstream::BitStream,
    error::{KDError, KDResult},
    metadata::MAX_ALLOWED_CHARS,
};

// Text to bits
//------------------------------------------------------------------------------

/// Transcodes text into a flat bit sequence, 8 bits per character in big
/// endian order. Every character must have a code point of 255 or below.
pub fn text_to_bits(text: &str) -> KDResult<BitStream> {
    if text.chars().count() > MAX_ALLOWED_CHARS {
        return Err(KDError::TextTooLong(text.chars().count(), MAX_ALLOWED_CHARS));
    }

    // Round the capacity up so the stream can later be padded to a whole
    // number of rings for any allowed segment count
    let mut bs = BitStream::new((text.chars().count() * 8).next_multiple_of(32));
    for c in text.chars() {
        let val = u32::from(c);
        if val > 255 {
            return Err(KDError::UnencodableChar(c));
        }
        bs.push_bits(val as u8, 8);
    }
    Ok(bs)
}

// Bits to text
//------------------------------------------------------------------------------

/// Reconstructs text from a bit sequence in 8-bit groups, zero padding an
/// incomplete trailing group.
///
/// A zero byte terminates the walk; tab, line feed and carriage return are
/// kept; any other byte outside the printable ASCII window is skipped
/// silently. The asymmetry is part of the format: encoded zero padding in
/// the final ring self-terminates the text.
pub fn bits_to_text(bits: &BitStream) -> String {
    let mut bits = bits.clone();
    bits.rewind();

    let mut text = String::new();
    while let Some(byte) = bits.take_byte() {
        match byte {
            0 => break,
            9 => text.push('\t'),
            10 => text.push('\n'),
            13 => text.push('\r'),
            32..=126 => text.push(byte as char),
            _ => (),
        }
    }
    text
}
