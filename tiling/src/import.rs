// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Genome import: turn FASTA files into CompactGenome rows of the library.
// A file named <sample>.1.fasta[.gz] or <sample>.2.fasta[.gz] carries one
// phase of a diploid sample; any other name is a haploid sample whose path
// fills both phases.  Reference import builds a CompactSequence instead,
// with every tile flagged as a reference tile.

use crate::fasta::FastaReader;
use crate::tiler::{TileStats, Tiler};
use log::{debug, info, warn};
use regex::Regex;
use std::path::Path;
use tag_index::TagIndex;
use tile_lib::TileLibrary;
use tile_types::{CompactGenome, CompactSequence, Result, TagId};

#[derive(Default)]
pub struct ImportOpts {
    /// Only records whose name matches are tiled; others are skipped.
    pub match_chromosome: Option<Regex>,
    /// Drop out-of-order tag hits (longest-increasing-subsequence filter).
    pub skip_ooo: bool,
}

/// Sample name and phase from a FASTA file name.  None means haploid
/// (both phases).
pub fn sample_name_and_phase(path: &Path) -> (String, Option<usize>) {
    let mut name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    for ext in &[".gz", ".fasta", ".fa"] {
        if name.to_ascii_lowercase().ends_with(ext) {
            name.truncate(name.len() - ext.len());
        }
    }
    if name.ends_with(".1") {
        name.truncate(name.len() - 2);
        (name, Some(0))
    } else if name.ends_with(".2") {
        name.truncate(name.len() - 2);
        (name, Some(1))
    } else {
        (name, None)
    }
}

/// Tile one sample FASTA into the library, creating or extending the
/// sample's CompactGenome.  Returns aggregate per-file statistics.
pub fn import_genome<P: AsRef<Path>>(
    lib: &TileLibrary,
    index: &TagIndex,
    path: P,
    opts: &ImportOpts,
) -> Result<TileStats> {
    let (sample, phase) = sample_name_and_phase(path.as_ref());
    let tiler = Tiler::new(index, opts.skip_ooo);
    let ntags = lib.tagset().len() as TagId;
    let mut total = TileStats::default();
    let mut calls = Vec::<(TagId, u16)>::new();
    for rec in FastaReader::open(path.as_ref())? {
        let rec = rec?;
        if let Some(re) = &opts.match_chromosome {
            if !re.is_match(&rec.name) {
                debug!("{}: skipped by chromosome filter", rec.name);
                continue;
            }
        }
        let (tile_path, stats) = tiler.tile_record(lib, &rec, false)?;
        info!(
            "{} {}: {} bases, {} tiles, {} out-of-order hits skipped",
            sample, rec.name, stats.input_len, stats.path_len, stats.skipped
        );
        total.input_len += stats.input_len;
        total.canonical_bases += stats.canonical_bases;
        total.path_len += stats.path_len;
        total.skipped += stats.skipped;
        for lr in tile_path {
            calls.push((lr.tag, lr.variant));
        }
    }

    let mut genomes = lib.genomes();
    let gi = match genomes.iter().position(|g| g.name == sample) {
        Some(i) => i,
        None => {
            genomes.push(CompactGenome::new(sample.clone(), 0, ntags));
            genomes.len() - 1
        }
    };
    let g = &mut genomes[gi];
    for &(tag, variant) in &calls {
        let phases: &[usize] = match phase {
            Some(p) => match p {
                0 => &[0],
                _ => &[1],
            },
            None => &[0, 1],
        };
        for &p in phases {
            if g.get(tag, p) != 0 {
                debug!("{}: tag {} phase {} already called, keeping first", sample, tag, p);
                continue;
            }
            g.set(tag, p, variant);
        }
    }
    Ok(total)
}

/// Tile a reference FASTA into the library as a named CompactSequence,
/// one tile path per chromosome.
pub fn import_reference<P: AsRef<Path>>(
    lib: &TileLibrary,
    index: &TagIndex,
    path: P,
    name: &str,
    opts: &ImportOpts,
) -> Result<()> {
    let tiler = Tiler::new(index, opts.skip_ooo);
    let mut cs = CompactSequence {
        name: name.to_string(),
        tile_sequences: Default::default(),
    };
    for rec in FastaReader::open(path.as_ref())? {
        let rec = rec?;
        if let Some(re) = &opts.match_chromosome {
            if !re.is_match(&rec.name) {
                continue;
            }
        }
        let (tile_path, stats) = tiler.tile_record(lib, &rec, true)?;
        info!(
            "reference {} {}: {} bases, {} tiles",
            name, rec.name, stats.input_len, stats.path_len
        );
        if cs.tile_sequences.contains_key(&rec.name) {
            warn!("reference {}: duplicate chromosome {}, keeping first", name, rec.name);
            continue;
        }
        cs.tile_sequences.insert(rec.name, tile_path);
    }
    lib.add_refseq(cs);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_lib::LibraryOpts;
    use tile_types::TagSet;

    const T0: &str = "aaccaacc";
    const T1: &str = "ccggccgg";

    fn setup() -> (TagSet, TagIndex) {
        let ts = TagSet::new(vec![T0.as_bytes().to_vec(), T1.as_bytes().to_vec()]).unwrap();
        let ix = TagIndex::new(&ts).unwrap();
        (ts, ix)
    }

    #[test]
    fn test_sample_name_and_phase() {
        assert_eq!(
            sample_name_and_phase(Path::new("/x/sample.1.fasta")),
            ("sample".to_string(), Some(0))
        );
        assert_eq!(
            sample_name_and_phase(Path::new("sample.2.fa.gz")),
            ("sample".to_string(), Some(1))
        );
        assert_eq!(
            sample_name_and_phase(Path::new("plain.fasta")),
            ("plain".to_string(), None)
        );
    }

    #[test]
    fn test_haploid_fills_both_phases() {
        let (ts, ix) = setup();
        let lib = TileLibrary::new(ts, LibraryOpts::default());
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("s1.fasta");
        std::fs::write(&p, format!(">chr1\n{}gggg{}tt\n", T0, T1)).unwrap();
        import_genome(&lib, &ix, &p, &ImportOpts::default()).unwrap();
        let gs = lib.genomes();
        assert_eq!(gs.len(), 1);
        assert_eq!(gs[0].name, "s1");
        assert_eq!(gs[0].get(0, 0), gs[0].get(0, 1));
        assert_ne!(gs[0].get(0, 0), 0);
        assert_ne!(gs[0].get(1, 0), 0);
    }

    #[test]
    fn test_diploid_two_files_one_genome() {
        let (ts, ix) = setup();
        let lib = TileLibrary::new(ts, LibraryOpts::default());
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("s.1.fasta");
        let p2 = dir.path().join("s.2.fasta");
        std::fs::write(&p1, format!(">chr1\n{}gggg{}tt\n", T0, T1)).unwrap();
        std::fs::write(&p2, format!(">chr1\n{}cccc{}tt\n", T0, T1)).unwrap();
        import_genome(&lib, &ix, &p1, &ImportOpts::default()).unwrap();
        import_genome(&lib, &ix, &p2, &ImportOpts::default()).unwrap();
        let gs = lib.genomes();
        assert_eq!(gs.len(), 1);
        let g = &gs[0];
        assert_eq!(g.name, "s");
        // Phase 0 and 1 got different tag-0 tiles.
        assert_ne!(g.get(0, 0), g.get(0, 1));
        assert_ne!(g.get(0, 0), 0);
        assert_ne!(g.get(0, 1), 0);
    }

    #[test]
    fn test_chromosome_filter() {
        let (ts, ix) = setup();
        let lib = TileLibrary::new(ts, LibraryOpts::default());
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("s1.fasta");
        std::fs::write(
            &p,
            format!(">chr1\n{}gg\n>chrM\n{}gg\n", T0, T1),
        )
        .unwrap();
        let opts = ImportOpts {
            match_chromosome: Some(Regex::new("^chr1$").unwrap()),
            skip_ooo: false,
        };
        import_genome(&lib, &ix, &p, &opts).unwrap();
        let gs = lib.genomes();
        assert_ne!(gs[0].get(0, 0), 0);
        assert_eq!(gs[0].get(1, 0), 0); // chrM skipped
    }

    #[test]
    fn test_reference_import_marks_tiles() {
        let (ts, ix) = setup();
        let lib = TileLibrary::new(ts, LibraryOpts::default());
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("ref.fasta");
        std::fs::write(&p, format!(">chr1\n{}gggg{}tt\n", T0, T1)).unwrap();
        import_reference(&lib, &ix, &p, "hg-test", &ImportOpts::default()).unwrap();
        let rs = lib.refseqs();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs[0].name, "hg-test");
        let path = &rs[0].tile_sequences["chr1"];
        assert_eq!(path.len(), 2);
        let vars = lib.tag_variants(0);
        assert!(vars[0].is_ref);
    }
}
