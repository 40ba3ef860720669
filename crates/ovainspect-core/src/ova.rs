//! OVA archive walking.
//!
//! This module drives a single sequential pass over an OVA (a tar archive):
//! 1. Read and decode each 512-byte header
//! 2. Parse `.ovf` entries into a [`VmDescriptor`]
//! 3. Hand `.vmdk` entries to a [`GrainTableDecoder`] through an entry-scoped reader
//! 4. Skip to the next block-aligned header
//!
//! Each entry's offset depends on the padded size of the one before it, so
//! entries are visited strictly in archive order. At most one header block
//! and one descriptor or grain table are held in memory at a time.
//!
//! # Example
//!
//! ```no_run
//! use ovainspect_core::ova::{parse_ova, ParseOptions};
//! use ovainspect_core::source::FileSource;
//!
//! # async fn run() -> ovainspect_core::Result<()> {
//! let source = FileSource::open("/path/to/appliance.ova").await?;
//! let result = parse_ova(&source, ParseOptions::default(), None).await?;
//!
//! if let Some(vm) = result.descriptor {
//!     println!("{}: {:?} vCPUs", vm.name_label, vm.n_cpus);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::future::Future;

use log::{debug, trace};

use crate::diagnostics::{Diagnostic, DiagnosticCallback, DiagnosticSink};
use crate::error::{Error, Result};
use crate::ovf::{parse_ovf, VmDescriptor};
use crate::source::ByteSource;
use crate::tar::{padded_size, parse_tar_header, TarHeader, HEADER_SIZE};
use crate::text::{decode_text, Encoding, TextDecoder};
use crate::vmdk::{GrainTable, SparseGrainTableDecoder};

/// Default upper bound on the size of a descriptor entry (64 MB).
pub const DEFAULT_MAX_DESCRIPTOR_BYTES: u64 = 64 * 1024 * 1024;

/// Options for parsing an archive.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Skip grain-table extraction for `.vmdk` entries.
    pub skip_grain_tables: bool,
    /// Largest `.ovf` entry that will be read into memory.
    pub max_descriptor_bytes: u64,
    /// Decoder for header names and descriptor text.
    pub decode_text: TextDecoder,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            skip_grain_tables: false,
            max_descriptor_bytes: DEFAULT_MAX_DESCRIPTOR_BYTES,
            decode_text,
        }
    }
}

impl ParseOptions {
    /// Create parse options with specified settings.
    pub fn new(skip_grain_tables: bool, max_descriptor_bytes: u64) -> Self {
        Self {
            skip_grain_tables,
            max_descriptor_bytes,
            decode_text,
        }
    }

    /// Create options that read only the descriptor.
    pub fn metadata_only() -> Self {
        Self {
            skip_grain_tables: true,
            ..Self::default()
        }
    }
}

/// An entry discovered in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Entry name from the header.
    pub name: String,
    /// Offset of the entry's payload within the archive.
    pub offset: u64,
    /// Payload size in bytes.
    pub size: u64,
}

/// Everything extracted from one archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult<T> {
    /// The VM descriptor, if the archive holds one.
    pub descriptor: Option<VmDescriptor>,
    /// Grain tables keyed by `.vmdk` entry name.
    pub tables: BTreeMap<String, T>,
    /// Every entry in archive order.
    pub entries: Vec<ArchiveEntry>,
}

impl<T> Default for ParseResult<T> {
    fn default() -> Self {
        Self {
            descriptor: None,
            tables: BTreeMap::new(),
            entries: Vec::new(),
        }
    }
}

/// A reader scoped to one entry's payload.
///
/// Offsets are relative to the start of the entry and clamped to its size.
pub struct EntryReader<'a, S> {
    source: &'a S,
    offset: u64,
    len: u64,
}

impl<'a, S: ByteSource> EntryReader<'a, S> {
    /// Scopes `source` to `[offset, offset + len)`.
    pub fn new(source: &'a S, offset: u64, len: u64) -> Self {
        Self {
            source,
            offset,
            len,
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads `[start, end)` of the entry.
    pub async fn read(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let start = start.min(self.len);
        let end = end.min(self.len).max(start);
        self.source
            .slice(self.offset + start, self.offset + end)
            .read()
            .await
    }
}

/// Decodes the grain table of a virtual disk entry.
///
/// The walker never inspects the table; it only stores it under the entry name.
pub trait GrainTableDecoder {
    /// The decoded table.
    type Table;

    /// Decodes one `.vmdk` entry.
    fn decode<S: ByteSource>(
        &self,
        reader: &EntryReader<'_, S>,
    ) -> impl Future<Output = Result<Self::Table>>;
}

/// Parse an OVA archive with the bundled sparse-extent grain-table decoder.
///
/// # Arguments
///
/// * `source` - Byte source over the whole archive.
/// * `options` - Parse options.
/// * `diagnostics` - Optional callback for non-fatal problems; they are
///   logged when no callback is given.
///
/// # Errors
///
/// Any fatal error aborts the walk; no partial result is returned.
pub async fn parse_ova<S: ByteSource>(
    source: &S,
    options: ParseOptions,
    diagnostics: Option<DiagnosticCallback>,
) -> Result<ParseResult<GrainTable>> {
    parse_ova_with_decoder(source, &SparseGrainTableDecoder, options, diagnostics).await
}

/// Parse an OVA archive with a caller-supplied grain-table decoder.
pub async fn parse_ova_with_decoder<S, D>(
    source: &S,
    decoder: &D,
    options: ParseOptions,
    diagnostics: Option<DiagnosticCallback>,
) -> Result<ParseResult<D::Table>>
where
    S: ByteSource,
    D: GrainTableDecoder,
{
    let sink = DiagnosticSink::new(diagnostics);
    let mut result = ParseResult::default();
    let mut offset = 0u64;

    loop {
        let block = source
            .slice(offset, offset + HEADER_SIZE as u64)
            .read()
            .await?;
        if block.is_empty() {
            debug!("archive ends at offset {} without an end-of-archive block", offset);
            break;
        }
        let Some(header) = parse_tar_header(&block, options.decode_text)? else {
            break;
        };
        offset += HEADER_SIZE as u64;

        debug!(
            "entry '{}' ({} bytes) at offset {}",
            header.name, header.size, offset
        );

        let name = header.name.to_ascii_lowercase();
        if name.ends_with(".ovf") {
            let descriptor = read_descriptor(source, offset, &header, &options, &sink).await?;
            if result.descriptor.replace(descriptor).is_some() {
                sink.emit(Diagnostic::DuplicateDescriptor {
                    entry_name: header.name.clone(),
                });
            }
        } else if name.ends_with(".vmdk") && !options.skip_grain_tables {
            let reader = EntryReader::new(source, offset, header.size);
            let table = decoder.decode(&reader).await?;
            result.tables.insert(header.name.clone(), table);
        } else {
            trace!("skipping entry '{}'", header.name);
        }

        result.entries.push(ArchiveEntry {
            name: header.name,
            offset,
            size: header.size,
        });

        offset = padded_size(header.size)
            .and_then(|padded| offset.checked_add(padded))
            .ok_or_else(|| Error::container("entry size overflows the archive offset"))?;
    }

    Ok(result)
}

async fn read_descriptor<S: ByteSource>(
    source: &S,
    offset: u64,
    header: &TarHeader,
    options: &ParseOptions,
    sink: &DiagnosticSink,
) -> Result<VmDescriptor> {
    if header.size > options.max_descriptor_bytes {
        return Err(Error::descriptor(format!(
            "descriptor '{}' is {} bytes, over the {} byte limit",
            header.name, header.size, options.max_descriptor_bytes
        )));
    }

    let bytes = source.slice(offset, offset + header.size).read().await?;
    if (bytes.len() as u64) < header.size {
        return Err(Error::container(format!(
            "entry '{}' is truncated: expected {} bytes, found {}",
            header.name,
            header.size,
            bytes.len()
        )));
    }

    let xml = (options.decode_text)(&bytes, Encoding::Utf8)?;
    parse_ovf(xml.strip_prefix('\u{feff}').unwrap_or(&xml), sink)
}
