//! Tar header decoding.
//!
//! Only the two fields the walker needs are decoded: the entry name and the
//! payload size. Checksums, type flags and permissions are ignored; any
//! entry with a non-empty name is treated as a regular file.

use std::ops::Range;

use crate::error::{Error, Result};
use crate::text::{Encoding, TextDecoder};

/// Size of a tar header block, and the alignment of every entry payload.
pub const HEADER_SIZE: usize = 512;

const NAME_FIELD: Range<usize> = 0..100;
const SIZE_FIELD: Range<usize> = 124..136;

/// Leading size byte of the GNU base-256 encoding.
const BASE256_MARKER: u8 = 0x80;

/// A decoded tar header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarHeader {
    /// Entry name, truncated at the first NUL.
    pub name: String,
    /// Payload size in bytes, excluding block padding.
    pub size: u64,
}

/// Decodes one 512-byte header block.
///
/// Returns `Ok(None)` for the end-of-archive marker, which is any block whose
/// name field is empty (a zeroed block in well-formed archives).
///
/// # Errors
///
/// Returns [`Error::MalformedContainer`] if the block is not exactly
/// [`HEADER_SIZE`] bytes or the size field cannot be decoded.
pub fn parse_tar_header(block: &[u8], decode: TextDecoder) -> Result<Option<TarHeader>> {
    if block.len() != HEADER_SIZE {
        return Err(Error::container(format!(
            "header block is {} bytes, expected {}",
            block.len(),
            HEADER_SIZE
        )));
    }

    let mut name = decode(&block[NAME_FIELD], Encoding::Ascii)?;
    if let Some(nul) = name.find('\0') {
        name.truncate(nul);
    }
    if name.is_empty() {
        return Ok(None);
    }

    let size = parse_size(&block[SIZE_FIELD], decode)
        .map_err(|e| Error::container(format!("entry '{}': {}", name, e)))?;
    if padded_size(size).is_none() {
        return Err(Error::container(format!(
            "entry '{}': size {} cannot be padded to a block boundary",
            name, size
        )));
    }

    Ok(Some(TarHeader { name, size }))
}

/// Rounds a payload size up to the next block boundary.
///
/// Returns `None` if the padded size does not fit in a `u64`.
pub fn padded_size(size: u64) -> Option<u64> {
    size.div_ceil(HEADER_SIZE as u64)
        .checked_mul(HEADER_SIZE as u64)
}

/// Decodes the 12-byte size field.
fn parse_size(field: &[u8], decode: TextDecoder) -> std::result::Result<u64, String> {
    if field[0] == BASE256_MARKER {
        // GNU extension: the remaining 11 bytes are a big-endian unsigned integer.
        return field[1..].iter().try_fold(0u64, |size, &byte| {
            size.checked_mul(256)
                .and_then(|size| size.checked_add(byte as u64))
                .ok_or_else(|| "base-256 size overflows 64 bits".to_string())
        });
    }

    let text = decode(&field[..11], Encoding::Ascii).map_err(|e| e.to_string())?;
    parse_octal(&text)
}

/// Parses a leading run of octal digits, skipping leading whitespace.
///
/// Trailing NULs or spaces after the digits are ignored.
fn parse_octal(text: &str) -> std::result::Result<u64, String> {
    let digits: String = text
        .trim_start()
        .chars()
        .take_while(|c| ('0'..='7').contains(c))
        .collect();

    if digits.is_empty() {
        return Err(format!("invalid octal size field {:?}", text));
    }

    u64::from_str_radix(&digits, 8).map_err(|e| format!("invalid octal size {:?}: {}", digits, e))
}
