// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Split a merged, tidied library into slice files, each holding a contiguous
// [start_tag, end_tag) range of tags across all genomes.  Slices are the
// unit of work for the matrix builder; chunk-tag-offset.csv records where
// each slice starts.

use crate::library::TileLibrary;
use crate::records::{LibRecord, LibraryWriter};
use io_utils::{fwriteln, open_for_write_new};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tile_types::{CompactGenome, CompactSequence, Result, TagId, TileVariant};

/// Name of the slice file for chunk i.
pub fn slice_file_name(i: usize) -> String {
    format!("library.{:04}.lib", i)
}

/// Tag range covered by chunk i of nchunks over ntags tags.
pub fn slice_range(ntags: usize, nchunks: usize, i: usize) -> (TagId, TagId) {
    let per = (ntags + nchunks - 1) / nchunks;
    let start = std::cmp::min(i * per, ntags);
    let end = std::cmp::min(start + per, ntags);
    (start as TagId, end as TagId)
}

pub fn write_slices(lib: &TileLibrary, dir: &Path, nchunks: usize) -> Result<Vec<PathBuf>> {
    assert!(nchunks > 0);
    let ntags = lib.tagset().len();
    let mut paths = Vec::<PathBuf>::new();
    for i in 0..nchunks {
        let (start, end) = slice_range(ntags, nchunks, i);
        let path = dir.join(slice_file_name(i));
        write_one_slice(lib, &path, start, end)?;
        paths.push(path);
    }

    let offsets = dir.join("chunk-tag-offset.csv");
    let mut f = open_for_write_new![&offsets.display().to_string()];
    fwriteln!(f, "chunk,start_tag");
    for i in 0..nchunks {
        let (start, _) = slice_range(ntags, nchunks, i);
        fwriteln!(f, "{},{}", slice_file_name(i), start);
    }
    Ok(paths)
}

fn write_one_slice(lib: &TileLibrary, path: &Path, start: TagId, end: TagId) -> Result<()> {
    let mut w = LibraryWriter::create(path)?;
    w.write_record(&LibRecord::TagSet(lib.tagset().clone()))?;

    let mut batch = Vec::<TileVariant>::new();
    for tag in start..end {
        batch.extend(lib.tag_variants(tag));
        if batch.len() >= 1000 {
            w.write_record(&LibRecord::TileVariants(std::mem::replace(
                &mut batch,
                Vec::new(),
            )))?;
        }
    }
    if !batch.is_empty() {
        w.write_record(&LibRecord::TileVariants(batch))?;
    }

    let mut genomes = Vec::<CompactGenome>::new();
    for g in lib.genomes().iter() {
        let s = std::cmp::max(g.start_tag, start);
        let e = std::cmp::min(g.end_tag, end);
        if s >= e {
            continue;
        }
        let lo = 2 * (s - g.start_tag) as usize;
        let hi = 2 * (e - g.start_tag) as usize;
        genomes.push(CompactGenome {
            name: g.name.clone(),
            start_tag: s,
            end_tag: e,
            variants: g.variants[lo..hi].to_vec(),
        });
    }
    if !genomes.is_empty() {
        w.write_record(&LibRecord::CompactGenomes(genomes))?;
    }

    let mut refseqs = Vec::<CompactSequence>::new();
    for r in lib.refseqs().iter() {
        let mut out = CompactSequence {
            name: r.name.clone(),
            tile_sequences: Default::default(),
        };
        for (chrom, tpath) in &r.tile_sequences {
            let restricted: Vec<_> = tpath
                .iter()
                .filter(|lr| lr.tag >= start && lr.tag < end)
                .cloned()
                .collect();
            if !restricted.is_empty() {
                out.tile_sequences.insert(chrom.clone(), restricted);
            }
        }
        if !out.tile_sequences.is_empty() {
            refseqs.push(out);
        }
    }
    if !refseqs.is_empty() {
        w.write_record(&LibRecord::CompactSequences(refseqs))?;
    }
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibraryOpts;
    use crate::records::read_library;
    use tile_types::TagSet;

    #[test]
    fn test_slice_ranges() {
        assert_eq!(slice_range(10, 3, 0), (0, 4));
        assert_eq!(slice_range(10, 3, 1), (4, 8));
        assert_eq!(slice_range(10, 3, 2), (8, 10));
        assert_eq!(slice_range(2, 4, 3), (2, 2));
    }

    #[test]
    fn test_write_slices_restricts_genomes() {
        let bases = [b'a', b'c', b'g', b't'];
        let ts = TagSet::new(
            (0..4)
                .map(|i| vec![bases[i % 4], b'a', b'a', b'c'])
                .collect::<Vec<_>>(),
        )
        .unwrap();
        let lib = TileLibrary::new(ts, LibraryOpts::default());
        let mut g = CompactGenome::new("s1".to_string(), 0, 4);
        for tag in 0..4u32 {
            let v = lib.get_ref(tag, format!("seq{}", tag).as_bytes()).unwrap();
            g.set(tag, 0, v);
            g.set(tag, 1, v);
        }
        lib.add_genome(g);

        let dir = tempfile::tempdir().unwrap();
        let paths = write_slices(&lib, dir.path(), 2).unwrap();
        assert_eq!(paths.len(), 2);
        let s1 = read_library(&paths[1], LibraryOpts::default()).unwrap();
        let gs = s1.genomes();
        assert_eq!(gs.len(), 1);
        assert_eq!(gs[0].start_tag, 2);
        assert_eq!(gs[0].end_tag, 4);
        assert_eq!(gs[0].variants.len(), 4);
        assert!(dir.path().join("chunk-tag-offset.csv").exists());
    }
}
