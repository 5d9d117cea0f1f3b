// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// The in-memory tile library.  A read-mostly RwLock holds one Mutex-guarded
// shard per tag; the reader path takes the read lock plus the per-tag mutex
// and linear-scans the tag's hash list (typically very short).  Growing the
// shard vector to admit a previously unseen tag id takes the write lock,
// which waits out every reader and so keeps observers consistent.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use tile_types::{
    CompactGenome, CompactSequence, Error, Result, TagId, TagSet, TileHash, TileLibRef,
    TileVariant, TileVariantId,
};

type Blake2b256 = Blake2b<U32>;

/// BLAKE2b-256 of the lowercase-normalised tile sequence.
pub fn hash_tile(seq: &[u8]) -> TileHash {
    let mut h = Blake2b256::new();
    let mut chunk = [0u8; 256];
    let mut i = 0;
    while i < seq.len() {
        let n = std::cmp::min(chunk.len(), seq.len() - i);
        for j in 0..n {
            chunk[j] = seq[i + j].to_ascii_lowercase();
        }
        h.update(&chunk[0..n]);
        i += n;
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&h.finalize());
    out
}

fn is_canonical(seq: &[u8]) -> bool {
    seq.iter()
        .all(|c| matches!(c.to_ascii_lowercase(), b'a' | b'c' | b'g' | b't'))
}

#[derive(Clone, Copy, Debug)]
pub struct LibraryOpts {
    /// Keep tile sequences (not just hashes).
    pub retain_sequences: bool,
    /// Keep sequences that contain non-acgt bases.  When false such tiles
    /// record the hash only and render as -1 in the dense matrix.
    pub retain_no_calls: bool,
}

impl Default for LibraryOpts {
    fn default() -> LibraryOpts {
        LibraryOpts {
            retain_sequences: true,
            retain_no_calls: false,
        }
    }
}

#[derive(Default)]
pub(crate) struct TagShard {
    pub hashes: Vec<TileHash>,
    pub sequences: Vec<Option<Vec<u8>>>,
    pub is_ref: Vec<bool>,
}

pub struct TileLibrary {
    tagset: TagSet,
    opts: LibraryOpts,
    shards: RwLock<Vec<Mutex<TagShard>>>,
    count: AtomicUsize,
    genomes: Mutex<Vec<CompactGenome>>,
    refseqs: Mutex<Vec<CompactSequence>>,
}

impl TileLibrary {
    pub fn new(tagset: TagSet, opts: LibraryOpts) -> TileLibrary {
        let mut shards = Vec::<Mutex<TagShard>>::new();
        for _ in 0..tagset.len() {
            shards.push(Mutex::new(TagShard::default()));
        }
        TileLibrary {
            tagset,
            opts,
            shards: RwLock::new(shards),
            count: AtomicUsize::new(0),
            genomes: Mutex::new(Vec::new()),
            refseqs: Mutex::new(Vec::new()),
        }
    }

    pub fn tagset(&self) -> &TagSet {
        &self.tagset
    }

    pub fn opts(&self) -> LibraryOpts {
        self.opts
    }

    /// Total variant count across all tags.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the variant id for (tag, seq), adding it if new.
    pub fn get_ref(&self, tag: TagId, seq: &[u8]) -> Result<TileVariantId> {
        self.insert(tag, hash_tile(seq), Some(seq), false)
    }

    /// Same, but mark the variant as a reference tile.
    pub fn get_ref_marked(&self, tag: TagId, seq: &[u8]) -> Result<TileVariantId> {
        self.insert(tag, hash_tile(seq), Some(seq), true)
    }

    /// Register a variant by hash, with the sequence if the source retained
    /// it.  Used by merge, where shard records may be hash-only.
    pub fn insert(
        &self,
        tag: TagId,
        hash: TileHash,
        seq: Option<&[u8]>,
        mark_ref: bool,
    ) -> Result<TileVariantId> {
        loop {
            {
                let shards = self.shards.read().unwrap();
                if (tag as usize) < shards.len() {
                    let mut sh = shards[tag as usize].lock().unwrap();
                    for i in 0..sh.hashes.len() {
                        if sh.hashes[i] == hash {
                            if mark_ref {
                                sh.is_ref[i] = true;
                            }
                            if sh.sequences[i].is_none() {
                                if let Some(s) = seq {
                                    if self.keep_sequence(s) {
                                        sh.sequences[i] = Some(lowercase(s));
                                    }
                                }
                            }
                            return Ok((i + 1) as TileVariantId);
                        }
                    }
                    if sh.hashes.len() >= TileVariantId::MAX as usize {
                        return Err(Error::TooManyVariants { tag });
                    }
                    sh.hashes.push(hash);
                    sh.sequences.push(match seq {
                        Some(s) if self.keep_sequence(s) => Some(lowercase(s)),
                        _ => None,
                    });
                    sh.is_ref.push(mark_ref);
                    self.count.fetch_add(1, Ordering::Relaxed);
                    return Ok(sh.hashes.len() as TileVariantId);
                }
            }
            self.grow(tag);
        }
    }

    fn keep_sequence(&self, seq: &[u8]) -> bool {
        self.opts.retain_sequences && (self.opts.retain_no_calls || is_canonical(seq))
    }

    // Grow the shard vector to cover tag.  Rare: once per previously unseen
    // upper tag bound.

    fn grow(&self, tag: TagId) {
        let mut shards = self.shards.write().unwrap();
        while shards.len() <= tag as usize {
            shards.push(Mutex::new(TagShard::default()));
        }
    }

    /// Number of variants recorded for one tag.
    pub fn variant_count(&self, tag: TagId) -> usize {
        let shards = self.shards.read().unwrap();
        if (tag as usize) >= shards.len() {
            return 0;
        }
        let sh = shards[tag as usize].lock().unwrap();
        sh.hashes.len()
    }

    /// The retained sequence for a lib ref, if any.
    pub fn tile_variant_sequence(&self, libref: TileLibRef) -> Option<Vec<u8>> {
        assert!(libref.variant > 0);
        let shards = self.shards.read().unwrap();
        if (libref.tag as usize) >= shards.len() {
            return None;
        }
        let sh = shards[libref.tag as usize].lock().unwrap();
        let i = (libref.variant - 1) as usize;
        if i >= sh.sequences.len() {
            return None;
        }
        sh.sequences[i].clone()
    }

    pub fn tile_variant_hash(&self, libref: TileLibRef) -> Option<TileHash> {
        assert!(libref.variant > 0);
        let shards = self.shards.read().unwrap();
        if (libref.tag as usize) >= shards.len() {
            return None;
        }
        let sh = shards[libref.tag as usize].lock().unwrap();
        let i = (libref.variant - 1) as usize;
        if i >= sh.hashes.len() {
            return None;
        }
        Some(sh.hashes[i])
    }

    /// Snapshot the variants of one tag as records, in variant-id order.
    pub fn tag_variants(&self, tag: TagId) -> Vec<TileVariant> {
        let shards = self.shards.read().unwrap();
        if (tag as usize) >= shards.len() {
            return Vec::new();
        }
        let sh = shards[tag as usize].lock().unwrap();
        let mut out = Vec::<TileVariant>::with_capacity(sh.hashes.len());
        for i in 0..sh.hashes.len() {
            out.push(TileVariant {
                tag,
                variant: (i + 1) as TileVariantId,
                hash: sh.hashes[i],
                sequence: sh.sequences[i].clone().unwrap_or_default(),
                is_ref: sh.is_ref[i],
            });
        }
        out
    }

    pub fn add_genome(&self, g: CompactGenome) {
        self.genomes.lock().unwrap().push(g);
    }

    pub fn add_refseq(&self, r: CompactSequence) {
        self.refseqs.lock().unwrap().push(r);
    }

    pub fn genomes(&self) -> std::sync::MutexGuard<'_, Vec<CompactGenome>> {
        self.genomes.lock().unwrap()
    }

    pub fn refseqs(&self) -> std::sync::MutexGuard<'_, Vec<CompactSequence>> {
        self.refseqs.lock().unwrap()
    }

    pub(crate) fn reset_count(&mut self, n: usize) {
        *self.count.get_mut() = n;
    }

    // Exclusive access for tidy, which rewrites shards in place with all
    // consumers quiescent.

    pub(crate) fn parts_mut(
        &mut self,
    ) -> (
        &mut Vec<Mutex<TagShard>>,
        &mut Vec<CompactGenome>,
        &mut Vec<CompactSequence>,
    ) {
        (
            self.shards.get_mut().unwrap(),
            self.genomes.get_mut().unwrap(),
            self.refseqs.get_mut().unwrap(),
        )
    }
}

fn lowercase(s: &[u8]) -> Vec<u8> {
    s.iter().map(|c| c.to_ascii_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn tagset(n: usize) -> TagSet {
        // n distinct 4-base tags; content is irrelevant to the library.
        let bases = [b'a', b'c', b'g', b't'];
        let tags: Vec<Vec<u8>> = (0..n)
            .map(|i| {
                vec![
                    bases[i % 4],
                    bases[(i / 4) % 4],
                    bases[(i / 16) % 4],
                    bases[(i / 64) % 4],
                ]
            })
            .collect();
        TagSet::new(tags).unwrap()
    }

    #[test]
    fn test_get_ref_dedup() {
        let lib = TileLibrary::new(tagset(4), LibraryOpts::default());
        let v1 = lib.get_ref(0, b"acgtacgt").unwrap();
        let v2 = lib.get_ref(0, b"ACGTACGT").unwrap();
        let v3 = lib.get_ref(0, b"acgtacga").unwrap();
        let v4 = lib.get_ref(1, b"acgtacgt").unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 1); // case does not matter
        assert_eq!(v3, 2);
        assert_eq!(v4, 1); // ids are per tag
        assert_eq!(lib.len(), 3);
        assert_eq!(
            lib.tile_variant_sequence(TileLibRef { tag: 0, variant: 1 }),
            Some(b"acgtacgt".to_vec())
        );
    }

    #[test]
    fn test_no_call_policy() {
        let lib = TileLibrary::new(tagset(1), LibraryOpts::default());
        let v = lib.get_ref(0, b"acgnacgt").unwrap();
        assert_eq!(v, 1);
        // Hash recorded, sequence not.
        assert_eq!(
            lib.tile_variant_sequence(TileLibRef { tag: 0, variant: v }),
            None
        );
        assert!(lib
            .tile_variant_hash(TileLibRef { tag: 0, variant: v })
            .is_some());

        let lib = TileLibrary::new(
            tagset(1),
            LibraryOpts {
                retain_sequences: true,
                retain_no_calls: true,
            },
        );
        let v = lib.get_ref(0, b"acgnacgt").unwrap();
        assert_eq!(
            lib.tile_variant_sequence(TileLibRef { tag: 0, variant: v }),
            Some(b"acgnacgt".to_vec())
        );
    }

    #[test]
    fn test_grow_beyond_initial_tags() {
        let lib = TileLibrary::new(tagset(2), LibraryOpts::default());
        // Merge can present a tag id the library has not seen.
        let v = lib.insert(100, hash_tile(b"acgt"), Some(b"acgt"), false).unwrap();
        assert_eq!(v, 1);
        assert_eq!(lib.variant_count(100), 1);
        assert_eq!(lib.variant_count(50), 0);
    }

    #[test]
    fn test_concurrent_hash_determinism() {
        // Identical sequences must get one id per tag no matter the
        // insertion interleaving.
        let lib = TileLibrary::new(tagset(16), LibraryOpts::default());
        let seqs: Vec<Vec<u8>> = (0..64)
            .map(|i| format!("acgt{:04}", i % 8).into_bytes())
            .collect();
        let ids: Vec<(TagId, TileVariantId)> = (0..4096usize)
            .into_par_iter()
            .map(|i| {
                let tag = (i % 16) as TagId;
                let seq = &seqs[(i * 7 + i / 16) % seqs.len()];
                (tag, lib.get_ref(tag, seq).unwrap())
            })
            .collect();
        // Per tag there are at most 8 distinct sequences, so at most 8 ids.
        for &(tag, v) in &ids {
            assert!(v >= 1 && v <= 8, "tag {} got variant {}", tag, v);
        }
        assert_eq!(lib.len(), 16 * 8);
        // Re-inserting serially reproduces the same ids.
        for &(tag, _) in ids.iter().take(32) {
            let n = lib.variant_count(tag);
            assert_eq!(n, 8);
        }
    }
}
