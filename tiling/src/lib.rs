// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Genome-to-tile-path conversion: stream FASTA records, locate tag hits,
// optionally discard out-of-order hits, cut the record into tiles, and
// register each tile with the library.

pub mod fasta;
pub mod import;
pub mod lis;
pub mod tiler;

pub use crate::fasta::{FastaReader, FastaRecord};
pub use crate::import::{import_genome, import_reference, sample_name_and_phase, ImportOpts};
pub use crate::lis::longest_increasing_hits;
pub use crate::tiler::{TileStats, Tiler};
