// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Cut one FASTA record into tiles at its tag hits and register each tile
// with the library.  A tile runs from its tag's start through the end of
// the next tag; the first tile is anchored at byte 0 of the record and the
// last runs to the end, so concatenating tiles with overlap L reconstructs
// the record.

use crate::fasta::FastaRecord;
use crate::lis::longest_increasing_hits;
use log::warn;
use rayon::prelude::*;
use tag_index::TagIndex;
use tile_lib::TileLibrary;
use tile_types::{Result, TileLibRef};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileStats {
    pub input_len: usize,
    pub canonical_bases: usize,
    pub path_len: usize,
    pub skipped: usize,
}

pub struct Tiler<'a> {
    index: &'a TagIndex,
    skip_ooo: bool,
}

impl<'a> Tiler<'a> {
    pub fn new(index: &'a TagIndex, skip_ooo: bool) -> Tiler<'a> {
        Tiler { index, skip_ooo }
    }

    /// Tile one record, returning the tag-ordered path and per-record
    /// statistics.  mark_ref flags every registered tile as a reference
    /// tile.
    pub fn tile_record(
        &self,
        lib: &TileLibrary,
        rec: &FastaRecord,
        mark_ref: bool,
    ) -> Result<(Vec<TileLibRef>, TileStats)> {
        let seq = &rec.seq;
        let tag_len = self.index.tag_len();
        let hits = self.index.find_all_hits(seq);
        let retained: Vec<usize> = if self.skip_ooo {
            longest_increasing_hits(&hits)
        } else {
            (0..hits.len()).collect()
        };
        let mut stats = TileStats {
            input_len: seq.len(),
            canonical_bases: seq
                .iter()
                .filter(|c| matches!(**c, b'a' | b'c' | b'g' | b't'))
                .count(),
            path_len: retained.len(),
            skipped: hits.len() - retained.len(),
        };
        if retained.is_empty() {
            warn!("{}: no tag hits, empty path", rec.name);
            stats.path_len = 0;
            return Ok((Vec::new(), stats));
        }

        // Tile boundaries for each retained hit.  get_ref is thread-safe
        // per tag, so hashing proceeds concurrently across hits.
        let path: Vec<TileLibRef> = (0..retained.len())
            .into_par_iter()
            .map(|k| -> Result<TileLibRef> {
                let (pos, tag) = hits[retained[k]];
                let start = if k == 0 { 0 } else { pos };
                let end = if k + 1 < retained.len() {
                    hits[retained[k + 1]].0 + tag_len
                } else {
                    seq.len()
                };
                let tile = &seq[start..end];
                let variant = if mark_ref {
                    lib.get_ref_marked(tag, tile)?
                } else {
                    lib.get_ref(tag, tile)?
                };
                Ok(TileLibRef { tag, variant })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((path, stats))
    }
}
