//! Byte-to-string decoding used for header names and descriptor payloads.

use crate::error::{Error, Result};

/// The encoding a caller expects a byte slice to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Tar header text fields.
    Ascii,
    /// OVF descriptor payloads.
    Utf8,
}

/// A pluggable string decoder.
pub type TextDecoder = fn(&[u8], Encoding) -> Result<String>;

/// Default decoder.
///
/// ASCII fields decode leniently since archivers routinely store UTF-8 names
/// in them. Descriptors must be valid UTF-8.
pub fn decode_text(bytes: &[u8], encoding: Encoding) -> Result<String> {
    match encoding {
        Encoding::Ascii => Ok(String::from_utf8_lossy(bytes).into_owned()),
        Encoding::Utf8 => String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::descriptor(format!("descriptor is not valid UTF-8: {}", e))),
    }
}
