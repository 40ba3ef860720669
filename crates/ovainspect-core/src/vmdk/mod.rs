//! VMDK disk handling.
//!
//! This module provides the default grain-table decoder for the virtual disk
//! images carried in an OVA.

pub mod sparse;

pub use sparse::{Grain, GrainTable, SparseGrainTableDecoder, SECTOR_SIZE, VMDK_MAGIC};
