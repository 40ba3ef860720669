//! Sparse VMDK grain-table decoding.
//!
//! This module reads the grain directory and grain tables of a hosted sparse
//! or streamOptimized VMDK through an entry-scoped reader, without touching
//! grain data. Only the header, the directory, and one grain table at a time
//! are held in memory.

use crate::error::{Error, Result};
use crate::ova::{EntryReader, GrainTableDecoder};
use crate::source::ByteSource;

/// VMDK magic number ("KDMV" as little-endian u32).
pub const VMDK_MAGIC: u32 = 0x564D444B;

/// Size of a sector in bytes.
pub const SECTOR_SIZE: u64 = 512;

/// Grain directory offset meaning "see the footer" (streamOptimized).
const GD_AT_END: u64 = u64::MAX;

/// Distance of the footer header from the end of a streamOptimized stream:
/// footer (512) followed by the end-of-stream marker (512).
const FOOTER_FROM_END: u64 = 2 * SECTOR_SIZE;

/// Parsed sparse extent header.
#[derive(Debug, Clone)]
struct SparseHeader {
    version: u32,
    capacity: u64,
    grain_size: u64,
    num_gtes_per_gt: u32,
    gd_offset: u64,
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

impl SparseHeader {
    /// Parse header from bytes.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < SECTOR_SIZE as usize {
            return Err(Error::vmdk("Sparse header too short"));
        }

        let magic = le_u32(&data[0..4]);
        if magic != VMDK_MAGIC {
            return Err(Error::vmdk(format!(
                "Invalid VMDK magic: expected 0x{:X}, got 0x{:X}",
                VMDK_MAGIC, magic
            )));
        }

        let header = Self {
            version: le_u32(&data[4..8]),
            capacity: le_u64(&data[12..20]),
            grain_size: le_u64(&data[20..28]),
            num_gtes_per_gt: le_u32(&data[44..48]),
            // rgdOffset at 48..56 is not needed
            gd_offset: le_u64(&data[56..64]),
        };

        if header.version > 3 {
            return Err(Error::vmdk(format!(
                "Unsupported sparse VMDK version: {}",
                header.version
            )));
        }
        if header.grain_size == 0 || header.num_gtes_per_gt == 0 {
            return Err(Error::vmdk("Sparse header has zero grain geometry"));
        }

        Ok(header)
    }

    /// Number of grain directory entries needed to cover the capacity.
    fn num_gd_entries(&self) -> u64 {
        self.capacity
            .div_ceil(self.grain_size)
            .div_ceil(self.num_gtes_per_gt as u64)
    }
}

/// An allocated grain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grain {
    /// First virtual-disk sector covered by the grain.
    pub logical_sector: u64,
    /// Sector of the grain's data within the disk image.
    pub file_sector: u64,
}

/// The allocation map of a sparse disk image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrainTable {
    /// Virtual capacity in sectors.
    pub capacity_sectors: u64,
    /// Grain size in sectors.
    pub grain_size_sectors: u64,
    /// Allocated grains ordered by position in the image.
    pub grains: Vec<Grain>,
}

impl GrainTable {
    /// Returns the virtual disk capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_sectors.saturating_mul(SECTOR_SIZE)
    }
}

/// Decodes the grain directory of hosted sparse and streamOptimized VMDKs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SparseGrainTableDecoder;

impl GrainTableDecoder for SparseGrainTableDecoder {
    type Table = GrainTable;

    async fn decode<S: ByteSource>(&self, reader: &EntryReader<'_, S>) -> Result<GrainTable> {
        let mut header = SparseHeader::from_bytes(&reader.read(0, SECTOR_SIZE).await?)?;

        if header.gd_offset == GD_AT_END {
            let len = reader.len();
            if len < FOOTER_FROM_END + SECTOR_SIZE {
                return Err(Error::vmdk("StreamOptimized VMDK too short for a footer"));
            }
            let footer_start = len - FOOTER_FROM_END;
            let footer = reader.read(footer_start, footer_start + SECTOR_SIZE).await?;
            header = SparseHeader::from_bytes(&footer)?;
            if header.gd_offset == GD_AT_END {
                return Err(Error::vmdk("Footer does not locate the grain directory"));
            }
        }

        if header.capacity.checked_mul(SECTOR_SIZE).is_none() {
            return Err(Error::vmdk(format!(
                "Capacity of {} sectors overflows",
                header.capacity
            )));
        }

        let gtes_per_gt = header.num_gtes_per_gt as u64;
        let grain_directory = read_table(
            reader,
            header.gd_offset,
            header.num_gd_entries(),
            "Grain directory",
        )
        .await?;

        let mut grains = Vec::new();
        for (gt_index, gt_entry) in grain_directory.chunks_exact(4).map(le_u32).enumerate() {
            // Grain table not allocated
            if gt_entry == 0 {
                continue;
            }

            let grain_table =
                read_table(reader, gt_entry as u64, gtes_per_gt, "Grain table").await?;
            for (gte_index, gte) in grain_table.chunks_exact(4).map(le_u32).enumerate() {
                if gte == 0 {
                    continue;
                }
                let logical_sector = (gt_index as u64)
                    .checked_mul(gtes_per_gt)
                    .and_then(|first| first.checked_add(gte_index as u64))
                    .and_then(|grain_index| grain_index.checked_mul(header.grain_size))
                    .ok_or_else(|| {
                        Error::vmdk(format!(
                            "Logical sector of grain {} in table {} overflows",
                            gte_index, gt_index
                        ))
                    })?;
                grains.push(Grain {
                    logical_sector,
                    file_sector: gte as u64,
                });
            }
        }

        grains.sort_by_key(|grain| grain.file_sector);

        Ok(GrainTable {
            capacity_sectors: header.capacity,
            grain_size_sectors: header.grain_size,
            grains,
        })
    }
}

/// Reads `entries` little-endian u32 values starting at `sector`.
async fn read_table<S: ByteSource>(
    reader: &EntryReader<'_, S>,
    sector: u64,
    entries: u64,
    what: &str,
) -> Result<Vec<u8>> {
    let start = sector
        .checked_mul(SECTOR_SIZE)
        .ok_or_else(|| Error::vmdk(format!("{} offset overflows", what)))?;
    let end = entries
        .checked_mul(4)
        .and_then(|len| start.checked_add(len))
        .filter(|&end| end <= reader.len())
        .ok_or_else(|| Error::vmdk(format!("{} extends beyond file", what)))?;

    reader.read(start, end).await
}
