//! OVAInspect Core Library
//!
//! This crate extracts virtual machine metadata from OVA archives without
//! loading them into memory.
//!
//! # Overview
//!
//! An OVA is a tar archive holding an OVF descriptor and one or more VMDK
//! disk images. The main entry point is [`parse_ova`], which walks the
//! archive once through any [`ByteSource`], parses the descriptor, and
//! collects a grain table for every disk image.
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`source`] - Range-addressable byte sources (memory, mmap, async file)
//! - [`text`] - Pluggable byte-to-string decoding
//! - [`tar`] - Tar header decoding
//! - [`xml`] - Loose XML tree used by the descriptor parser
//! - [`ovf`] - OVF descriptor parsing
//! - [`diagnostics`] - Non-fatal problems reported during a parse
//! - [`ova`] - Archive walker coordinating the full pass
//! - [`vmdk`] - Default sparse VMDK grain-table decoder
//!
//! # Quick Start
//!
//! ```no_run
//! use ovainspect_core::{parse_ova, MmapSource, ParseOptions};
//! use std::path::Path;
//!
//! # async fn run() -> ovainspect_core::Result<()> {
//! let source = MmapSource::open(Path::new("/path/to/appliance.ova"))?;
//! let result = parse_ova(&source, ParseOptions::default(), None).await?;
//! println!("{} disk images", result.tables.len());
//! # Ok(())
//! # }
//! ```

pub mod diagnostics;
pub mod error;
pub mod ova;
pub mod ovf;
pub mod source;
pub mod tar;
pub mod text;
pub mod vmdk;
pub mod xml;

pub use error::{Error, Result};

// Re-export the archive walker for convenience
pub use ova::{
    parse_ova, parse_ova_with_decoder, ArchiveEntry, EntryReader, GrainTableDecoder,
    ParseOptions, ParseResult, DEFAULT_MAX_DESCRIPTOR_BYTES,
};

pub use diagnostics::{Diagnostic, DiagnosticCallback};
pub use ovf::{DiskRecord, VmDescriptor};
pub use source::{ByteSource, FileSource, MemorySource, MmapSource};
pub use text::{Encoding, TextDecoder};
pub use vmdk::{GrainTable, SparseGrainTableDecoder};
