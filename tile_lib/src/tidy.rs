// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Tidy: the one-shot global renumber.  For each tag, variants are sorted by
// descending usage over all genome phases with lexicographic hash as the
// tie-breaker, unused non-reference variants are dropped, and dense new ids
// 1..M are assigned.  Every genome and reference path is then rewritten
// through the per-tag remap.  This is the canonical numbering published
// downstream.

use crate::library::TileLibrary;
use rayon::prelude::*;
use tile_types::{Error, Result, TagId, TileVariantId};

/// Per-tag remap produced by tidy (and by merge): map[tag][old_id] is the
/// new id, with 0 meaning dropped (index 0 is always 0: no call maps to no
/// call).
pub struct RemapTable {
    pub map: Vec<Vec<TileVariantId>>,
}

impl RemapTable {
    pub fn lookup(&self, tag: TagId, old: TileVariantId) -> TileVariantId {
        if (tag as usize) < self.map.len() && (old as usize) < self.map[tag as usize].len() {
            self.map[tag as usize][old as usize]
        } else {
            0
        }
    }
}

pub fn tidy(lib: &mut TileLibrary) -> Result<RemapTable> {
    let (shards, genomes, refseqs) = lib.parts_mut();
    let ntags = shards.len();

    // Usage counts per (tag, variant), over both phases of every genome.
    let mut uses = Vec::<Vec<u64>>::with_capacity(ntags);
    for sh in shards.iter_mut() {
        uses.push(vec![0u64; sh.get_mut().unwrap().hashes.len() + 1]);
    }
    for g in genomes.iter() {
        for (i, &v) in g.variants.iter().enumerate() {
            if v == 0 {
                continue;
            }
            let tag = g.start_tag as usize + i / 2;
            if tag >= ntags || (v as usize) >= uses[tag].len() {
                return Err(Error::DanglingVariantRef {
                    genome: g.name.clone(),
                    tag: tag as TagId,
                    variant: v,
                });
            }
            uses[tag][v as usize] += 1;
        }
    }

    // Which variants appear on a reference path.  These survive tidy even
    // when no genome uses them.
    let mut in_ref = Vec::<Vec<bool>>::with_capacity(ntags);
    for u in &uses {
        in_ref.push(vec![false; u.len()]);
    }
    for r in refseqs.iter() {
        for path in r.tile_sequences.values() {
            for lr in path {
                let tag = lr.tag as usize;
                if lr.variant == 0
                    || tag >= ntags
                    || (lr.variant as usize) >= in_ref[tag].len()
                {
                    return Err(Error::DanglingVariantRef {
                        genome: r.name.clone(),
                        tag: lr.tag,
                        variant: lr.variant,
                    });
                }
                in_ref[tag][lr.variant as usize] = true;
            }
        }
    }

    // Sort, drop, renumber, in parallel over tags.
    let map: Vec<Vec<TileVariantId>> = shards
        .par_iter_mut()
        .zip(uses.par_iter())
        .zip(in_ref.par_iter())
        .map(|((sh, uses), in_ref)| {
            let sh = sh.get_mut().unwrap();
            let n = sh.hashes.len();
            let mut order: Vec<usize> = (0..n)
                .filter(|&i| uses[i + 1] > 0 || in_ref[i + 1])
                .collect();
            order.sort_by(|&a, &b| {
                uses[b + 1]
                    .cmp(&uses[a + 1])
                    .then_with(|| sh.hashes[a].cmp(&sh.hashes[b]))
            });
            let mut map = vec![0 as TileVariantId; n + 1];
            let mut hashes = Vec::with_capacity(order.len());
            let mut sequences = Vec::with_capacity(order.len());
            let mut is_ref = Vec::with_capacity(order.len());
            for (new0, &old) in order.iter().enumerate() {
                map[old + 1] = (new0 + 1) as TileVariantId;
                hashes.push(sh.hashes[old]);
                sequences.push(std::mem::replace(&mut sh.sequences[old], None));
                is_ref.push(sh.is_ref[old]);
            }
            sh.hashes = hashes;
            sh.sequences = sequences;
            sh.is_ref = is_ref;
            map
        })
        .collect();

    // Rewrite every consumer through the remap.
    let remap = RemapTable { map };
    genomes.par_iter_mut().for_each(|g| {
        for (i, v) in g.variants.iter_mut().enumerate() {
            if *v != 0 {
                let tag = g.start_tag + (i / 2) as TagId;
                *v = remap.lookup(tag, *v);
            }
        }
    });
    for r in refseqs.iter_mut() {
        for path in r.tile_sequences.values_mut() {
            for lr in path.iter_mut() {
                lr.variant = remap.lookup(lr.tag, lr.variant);
            }
        }
    }

    // Recompute the global count.
    let total: usize = shards
        .iter_mut()
        .map(|sh| sh.get_mut().unwrap().hashes.len())
        .sum();
    lib.reset_count(total);
    Ok(remap)
}
