// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Core data model for the pan-genome tiling engine: tags, tile variants,
// compact genomes, reference tile paths, sample metadata, and the error
// taxonomy shared by every crate in the workspace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓
// SCALAR IDS
// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓

/// Identifies one tag (seed) in a tag set.  Tags are globally ordered 0..T-1.
pub type TagId = u32;

/// Identifies one observed sequence for a tag.  Unique only within a tag.
/// Zero is reserved: it never names a variant and in a genome path it means
/// "no call / coverage gap".
pub type TileVariantId = u16;

/// 256-bit BLAKE2b digest of the lowercase-normalised tile sequence.
pub type TileHash = [u8; 32];

/// A (tag, variant) pair naming one specific tile sequence in a library.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileLibRef {
    pub tag: TagId,
    pub variant: TileVariantId,
}

// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓
// TAG SET
// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓

// The ordered set of equal-length seeds that partitions genomes into tiles.
// Immutable once a library is written; merging libraries with differing tag
// sets fails.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    tags: Vec<Vec<u8>>,
}

impl TagSet {
    /// Build a tag set from seeds.  All seeds must be the same length and
    /// consist of canonical bases.  Seeds are lowercased on the way in.
    pub fn new(tags: Vec<Vec<u8>>) -> Result<TagSet> {
        if tags.is_empty() {
            return Err(Error::invalid_input("tagset", 0, "empty tag set"));
        }
        let len = tags[0].len();
        let mut lower = Vec::<Vec<u8>>::with_capacity(tags.len());
        for (i, t) in tags.iter().enumerate() {
            if t.len() != len {
                return Err(Error::invalid_input(
                    "tagset",
                    i + 1,
                    format!("tag has length {} but expected {}", t.len(), len),
                ));
            }
            let mut x = t.clone();
            for c in x.iter_mut() {
                *c = c.to_ascii_lowercase();
                if !matches!(*c, b'a' | b'c' | b'g' | b't') {
                    return Err(Error::invalid_input(
                        "tagset",
                        i + 1,
                        format!("tag contains non-acgt byte 0x{:02x}", *c),
                    ));
                }
            }
            lower.push(x);
        }
        Ok(TagSet { tags: lower })
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Shared length of every seed in the set.
    pub fn tag_len(&self) -> usize {
        self.tags[0].len()
    }

    pub fn tag(&self, id: TagId) -> &[u8] {
        &self.tags[id as usize]
    }

    pub fn tags(&self) -> &[Vec<u8>] {
        &self.tags
    }
}

// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓
// TILE VARIANTS
// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓

/// One distinct observed sequence for a tag.  The sequence may be empty if
/// the library did not retain it (no-call tile); the hash is always present.
/// Invariant: for a fixed tag, hash uniquely determines variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileVariant {
    pub tag: TagId,
    pub variant: TileVariantId,
    pub hash: TileHash,
    pub sequence: Vec<u8>,
    pub is_ref: bool,
}

// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓
// COMPACT GENOMES AND REFERENCE SEQUENCES
// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓

// A sample laid out as diploid tile paths over a contiguous tag range.
// variants has length 2*(end_tag - start_tag); the two phases of tag t live
// at 2*(t - start_tag) and 2*(t - start_tag) + 1.  Zero means no call.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactGenome {
    pub name: String,
    pub start_tag: TagId,
    pub end_tag: TagId,
    pub variants: Vec<TileVariantId>,
}

impl CompactGenome {
    pub fn new(name: String, start_tag: TagId, end_tag: TagId) -> CompactGenome {
        assert!(end_tag >= start_tag);
        CompactGenome {
            name,
            start_tag,
            end_tag,
            variants: vec![0; 2 * (end_tag - start_tag) as usize],
        }
    }

    /// Variant for (tag, phase), or 0 if the tag is outside this genome's range.
    pub fn get(&self, tag: TagId, phase: usize) -> TileVariantId {
        assert!(phase < 2);
        if tag < self.start_tag || tag >= self.end_tag {
            return 0;
        }
        self.variants[2 * (tag - self.start_tag) as usize + phase]
    }

    pub fn set(&mut self, tag: TagId, phase: usize, v: TileVariantId) {
        assert!(phase < 2);
        assert!(tag >= self.start_tag && tag < self.end_tag);
        self.variants[2 * (tag - self.start_tag) as usize + phase] = v;
    }
}

/// A named reference genome laid out as one ordered tile path per chromosome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactSequence {
    pub name: String,
    pub tile_sequences: BTreeMap<String, Vec<TileLibRef>>,
}

// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓
// SAMPLE METADATA
// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓

// One row of the samples CSV.  Drives the statistical filter and row
// ordering in output matrices.  is_case is None when the case/control field
// is blank (sample excluded from association testing).

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleInfo {
    pub id: String,
    pub is_case: Option<bool>,
    pub is_training: bool,
    pub pca: Vec<f64>,
}

impl SampleInfo {
    pub fn is_control(&self) -> bool {
        self.is_case == Some(false)
    }

    pub fn is_validation(&self) -> bool {
        !self.is_training
    }
}

// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓
// ERROR TAXONOMY
// ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{file}:{line}: {msg}")]
    InvalidInput {
        file: String,
        line: usize,
        msg: String,
    },

    #[error("incompatible tag sets: cannot merge libraries built from different tag sets")]
    IncompatibleTagSet,

    #[error("genome {genome} references tag {tag} variant {variant}, absent from its shard")]
    DanglingVariantRef {
        genome: String,
        tag: TagId,
        variant: TileVariantId,
    },

    #[error("reference path references tag {tag} with no recorded sequence")]
    MissingReferenceTile { tag: TagId },

    #[error("tag {tag} exceeded the per-tag variant limit")]
    TooManyVariants { tag: TagId },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(String),
}

impl Error {
    pub fn invalid_input(file: impl Into<String>, line: usize, msg: impl fmt::Display) -> Error {
        Error::InvalidInput {
            file: file.into(),
            line,
            msg: msg.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagset_validation() {
        let t = TagSet::new(vec![b"ACGT".to_vec(), b"tttt".to_vec()]).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.tag_len(), 4);
        assert_eq!(t.tag(0), b"acgt");
        assert!(TagSet::new(vec![b"acgt".to_vec(), b"acg".to_vec()]).is_err());
        assert!(TagSet::new(vec![b"acgn".to_vec()]).is_err());
        assert!(TagSet::new(Vec::new()).is_err());
    }

    #[test]
    fn test_compact_genome_layout() {
        let mut g = CompactGenome::new("s1".to_string(), 10, 13);
        assert_eq!(g.variants.len(), 6);
        g.set(11, 1, 7);
        assert_eq!(g.get(11, 1), 7);
        assert_eq!(g.get(11, 0), 0);
        assert_eq!(g.get(9, 0), 0);
        assert_eq!(g.get(13, 0), 0);
    }
}
