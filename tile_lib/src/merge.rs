// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Library merge.  Streams N shard files into one output library, remapping
// each shard's variant ids onto the output's numbering as variant records
// arrive, then rewriting genome and reference records through the map.
// Shards must have byte-identical tag sets.

use crate::library::{LibraryOpts, TileLibrary};
use crate::records::{LibRecord, LibraryReader};
use log::info;
use std::path::Path;
use tile_types::{Error, Result, TagId, TileVariantId};

// Per-shard variant map: variantmap[tag][old_id] -> output id.

struct VariantMap {
    map: Vec<Vec<TileVariantId>>,
}

impl VariantMap {
    fn new(ntags: usize) -> VariantMap {
        VariantMap {
            map: vec![Vec::new(); ntags],
        }
    }

    fn set(&mut self, tag: TagId, old: TileVariantId, new: TileVariantId) {
        if self.map.len() <= tag as usize {
            self.map.resize(tag as usize + 1, Vec::new());
        }
        let m = &mut self.map[tag as usize];
        if m.len() <= old as usize {
            m.resize(old as usize + 1, 0);
        }
        m[old as usize] = new;
    }

    fn get(&self, tag: TagId, old: TileVariantId) -> TileVariantId {
        if (tag as usize) < self.map.len() && (old as usize) < self.map[tag as usize].len() {
            self.map[tag as usize][old as usize]
        } else {
            0
        }
    }
}

pub fn merge_libraries<P: AsRef<Path>>(paths: &[P], opts: LibraryOpts) -> Result<TileLibrary> {
    assert!(!paths.is_empty());
    let tagset = LibraryReader::open(&paths[0])?.read_tagset()?;
    let ntags = tagset.len();
    let out = TileLibrary::new(tagset, opts);

    for path in paths {
        let mut r = LibraryReader::open(path)?;
        let shard_tagset = r.read_tagset()?;
        if &shard_tagset != out.tagset() {
            return Err(Error::IncompatibleTagSet);
        }
        let mut vmap = VariantMap::new(ntags);
        let mut nvariants = 0usize;
        let mut ngenomes = 0usize;
        while let Some(rec) = r.read_record()? {
            match rec {
                LibRecord::TagSet(_) => {
                    return Err(Error::invalid_input(
                        path.as_ref().display().to_string(),
                        0,
                        "duplicate tag set record",
                    ));
                }
                LibRecord::TileVariants(vs) => {
                    nvariants += vs.len();
                    for v in &vs {
                        let seq = if v.sequence.is_empty() {
                            None
                        } else {
                            Some(&v.sequence[..])
                        };
                        let new = out.insert(v.tag, v.hash, seq, v.is_ref)?;
                        vmap.set(v.tag, v.variant, new);
                    }
                }
                LibRecord::CompactGenomes(gs) => {
                    ngenomes += gs.len();
                    for mut g in gs {
                        for (i, v) in g.variants.iter_mut().enumerate() {
                            if *v == 0 {
                                continue; // no call passes through unchanged
                            }
                            let tag = g.start_tag + (i / 2) as TagId;
                            let new = vmap.get(tag, *v);
                            if new == 0 {
                                return Err(Error::DanglingVariantRef {
                                    genome: g.name.clone(),
                                    tag,
                                    variant: *v,
                                });
                            }
                            *v = new;
                        }
                        out.add_genome(g);
                    }
                }
                LibRecord::CompactSequences(rs) => {
                    for mut cs in rs {
                        for tpath in cs.tile_sequences.values_mut() {
                            for lr in tpath.iter_mut() {
                                if lr.variant == 0 {
                                    continue;
                                }
                                let new = vmap.get(lr.tag, lr.variant);
                                if new == 0 {
                                    return Err(Error::DanglingVariantRef {
                                        genome: cs.name.clone(),
                                        tag: lr.tag,
                                        variant: lr.variant,
                                    });
                                }
                                lr.variant = new;
                            }
                        }
                        out.add_refseq(cs);
                    }
                }
            }
        }
        info!(
            "merged {}: {} variant records, {} genomes",
            path.as_ref().display(),
            nvariants,
            ngenomes
        );
    }
    Ok(out)
}
