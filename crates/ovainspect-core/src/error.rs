//! Error types for the OVA inspection library.

use std::path::PathBuf;

/// The main error type for OVA inspection.
///
/// Every variant is fatal: the walk stops and no partial result is returned.
/// Recoverable conditions are reported as [`crate::Diagnostic`]s instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from a byte source, with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// A tar header block could not be decoded into a sane record.
    #[error("malformed container: {message}")]
    MalformedContainer { message: String },

    /// The OVF descriptor is missing required structure or holds invalid values.
    #[error("malformed descriptor: {message}")]
    MalformedDescriptor { message: String },

    /// The OVF descriptor is not well-formed XML.
    #[error("XML syntax error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A memory allocation unit matches no known notation.
    #[error("unsupported allocation unit: '{unit}'")]
    UnsupportedAllocationUnit { unit: String },

    /// The grain-table decoder rejected a disk image.
    #[error("VMDK error: {message}")]
    Vmdk { message: String },
}

/// A specialized Result type for OVA inspection.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create a malformed container error.
    pub fn container(message: impl Into<String>) -> Self {
        Self::MalformedContainer {
            message: message.into(),
        }
    }

    /// Create a malformed descriptor error.
    pub fn descriptor(message: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            message: message.into(),
        }
    }

    /// Create an unsupported allocation unit error.
    pub fn allocation_unit(unit: impl Into<String>) -> Self {
        Self::UnsupportedAllocationUnit { unit: unit.into() }
    }

    /// Create a VMDK error.
    pub fn vmdk(message: impl Into<String>) -> Self {
        Self::Vmdk {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}
