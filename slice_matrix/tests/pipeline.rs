// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// End-to-end: tile a reference and four samples, tidy, slice, then build
// matrices and check the dense values, annotations, one-hot filtering, and
// HGVS outputs against hand-computed expectations.

use slice_matrix::{SliceConfig, SliceProcessor};
use std::path::Path;
use tag_index::TagIndex;
use tile_lib::{hash_tile, tidy, write_slices, LibraryOpts, TileLibrary};
use tile_types::{SampleInfo, TagSet};
use tiling::{import_genome, import_reference, ImportOpts};

const T0: &str = "aaccaacc";
const T1: &str = "ccggccgg";
const T2: &str = "ggttggtt";
const T3: &str = "ttaattaa";

fn tagset() -> TagSet {
    TagSet::new(
        [T0, T1, T2, T3]
            .iter()
            .map(|t| t.as_bytes().to_vec())
            .collect(),
    )
    .unwrap()
}

fn ref_chrom() -> String {
    format!("{}aaaa{}cccc{}gggg{}tt", T0, T1, T2, T3)
}

fn var_chrom() -> String {
    // One SNP in the filler between T1 and T2.
    format!("{}aaaa{}ccgc{}gggg{}tt", T0, T1, T2, T3)
}

fn sample(id: &str, case: bool) -> SampleInfo {
    SampleInfo {
        id: id.to_string(),
        is_case: Some(case),
        is_training: true,
        pca: Vec::new(),
    }
}

// Minimal npy reader for the checks below.

fn read_npy(path: &Path) -> ((usize, usize), Vec<i64>) {
    let bytes = std::fs::read(path).unwrap();
    assert_eq!(&bytes[0..6], b"\x93NUMPY");
    let hlen = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let header = std::str::from_utf8(&bytes[10..10 + hlen]).unwrap();
    let width = if header.contains("'<i1'") {
        1
    } else if header.contains("'<i2'") {
        2
    } else {
        assert!(header.contains("'<i4'"), "{}", header);
        4
    };
    let shape_str = header.split("'shape': (").nth(1).unwrap();
    let shape_str = shape_str.split(')').next().unwrap();
    let dims: Vec<usize> = shape_str
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().unwrap())
        .collect();
    let (r, c) = (dims[0], dims[1]);
    let data = &bytes[10 + hlen..];
    assert_eq!(data.len(), r * c * width);
    let mut out = Vec::<i64>::with_capacity(r * c);
    for i in 0..r * c {
        let v = match width {
            1 => data[i] as i8 as i64,
            2 => i16::from_le_bytes([data[2 * i], data[2 * i + 1]]) as i64,
            _ => i32::from_le_bytes([
                data[4 * i],
                data[4 * i + 1],
                data[4 * i + 2],
                data[4 * i + 3],
            ]) as i64,
        };
        out.push(v);
    }
    ((r, c), out)
}

struct Setup {
    _dir: tempfile::TempDir,
    slices: Vec<std::path::PathBuf>,
    samples: Vec<SampleInfo>,
    var_tile1_id_is_1: bool,
}

// Build a tidied, sliced library: reference plus two case samples carrying
// the SNP and two control samples identical to the reference.

fn setup() -> Setup {
    pretty_trace::PrettyTrace::new().on();
    let dir = tempfile::tempdir().unwrap();
    let ts = tagset();
    let ix = TagIndex::new(&ts).unwrap();
    let opts = LibraryOpts {
        retain_sequences: true,
        retain_no_calls: true,
    };
    let mut lib = TileLibrary::new(ts, opts);

    let ref_path = dir.path().join("ref.fasta");
    std::fs::write(&ref_path, format!(">chr1\n{}\n", ref_chrom())).unwrap();
    let iopts = ImportOpts::default();
    import_reference(&lib, &ix, &ref_path, "test-ref", &iopts).unwrap();

    for (name, body) in &[
        ("case1", var_chrom()),
        ("ctrl1", ref_chrom()),
        ("case2", var_chrom()),
        ("ctrl2", ref_chrom()),
    ] {
        let p = dir.path().join(format!("{}.fasta", name));
        std::fs::write(&p, format!(">chr1\n{}\n", body)).unwrap();
        import_genome(&lib, &ix, &p, &iopts).unwrap();
    }

    tidy(&mut lib).unwrap();
    let slices = write_slices(&lib, dir.path(), 2).unwrap();

    // Local renumbering at tag 1 breaks the 4-4 usage tie by hash.
    let tile1_ref = format!("{}cccc{}", T1, T2);
    let tile1_var = format!("{}ccgc{}", T1, T2);
    let var_tile1_id_is_1 = hash_tile(tile1_var.as_bytes()) < hash_tile(tile1_ref.as_bytes());

    let samples = vec![
        sample("case1", true),
        sample("ctrl1", false),
        sample("case2", true),
        sample("ctrl2", false),
    ];
    Setup {
        _dir: dir,
        slices,
        samples,
        var_tile1_id_is_1,
    }
}

fn config() -> SliceConfig {
    SliceConfig {
        threads: 2,
        min_coverage: 0.9,
        include_variant1: true,
        pvalue_min_frequency: 0.1,
        p_threshold: 0.05,
        tile_span_cap: 4,
        emit_dense: true,
        emit_onehot: true,
        emit_hgvs: true,
        merge_output: true,
    }
}

#[test]
fn test_dense_matrix_and_merge() {
    let s = setup();
    let out = tempfile::tempdir().unwrap();
    let sp = SliceProcessor::new(config(), s.samples.clone(), None);
    sp.run(&s.slices, out.path()).unwrap();

    let ((r, c), m) = read_npy(&out.path().join("matrix.0000.npy"));
    assert_eq!((r, c), (4, 4));
    let (va, vr) = if s.var_tile1_id_is_1 { (1, 2) } else { (2, 1) };
    for row in 0..4 {
        // Tag 0: every sample has the single (reference) variant.
        assert_eq!(m[row * 4], 1);
        assert_eq!(m[row * 4 + 1], 1);
        // Tag 1: cases carry the SNP tile, controls the reference tile.
        let expect = if row % 2 == 0 { va } else { vr };
        assert_eq!(m[row * 4 + 2], expect, "row {}", row);
        assert_eq!(m[row * 4 + 3], expect, "row {}", row);
    }

    let ((r, c), _m1) = read_npy(&out.path().join("matrix.0001.npy"));
    assert_eq!((r, c), (4, 4));

    // Merged across both slices.
    let ((r, c), merged) = read_npy(&out.path().join("matrix.npy"));
    assert_eq!((r, c), (4, 8));
    assert_eq!(&merged[0..4], &m[0..4]);

    // Sample metadata echoed.
    assert!(out.path().join("samples.csv").exists());
}

#[test]
fn test_annotations_and_hgvs() {
    let s = setup();
    let out = tempfile::tempdir().unwrap();
    let sp = SliceProcessor::new(config(), s.samples.clone(), None);
    sp.run(&s.slices, out.path()).unwrap();

    let ann = std::fs::read_to_string(out.path().join("matrix.0000.annotations.csv")).unwrap();
    let rows: Vec<&str> = ann.lines().collect();
    // Tag 0 reference row, tag 1 reference row, tag 1 SNP row.
    let va = if s.var_tile1_id_is_1 { 1 } else { 2 };
    let vr = if s.var_tile1_id_is_1 { 2 } else { 1 };
    assert!(rows.iter().any(|r| r.starts_with("0,0,1,=,chr1,1,")), "{}", ann);
    assert!(
        rows.iter().any(|r| r.starts_with(&format!("1,1,{},=,chr1,13,", vr))),
        "{}",
        ann
    );
    // The SNP: tile 1 starts at chr1:13, the edit is 10 bases in.
    let snp = format!("1,1,{},chr1:g.23C>G,chr1,23,C,G,ccggccggcc", va);
    assert!(rows.iter().any(|r| **r == snp), "wanted {:?} in\n{}", snp, ann);

    // HGVS indicator matrix for chr1: one diff, two phase columns.
    let ((r, c), h) = read_npy(&out.path().join("hgvs.chr1.npy"));
    assert_eq!((r, c), (4, 2));
    for row in 0..4 {
        let expect = if row % 2 == 0 { 1 } else { 0 };
        assert_eq!(h[row * 2], expect);
        assert_eq!(h[row * 2 + 1], expect);
    }
    let hann = std::fs::read_to_string(out.path().join("hgvs.chr1.annotations.csv")).unwrap();
    assert!(hann.contains("chr1:g.23C>G"), "{}", hann);
}

#[test]
fn test_onehot_chi2_filtering() {
    let s = setup();

    // At p < 0.05 the case-linked columns (p ~ 0.0455) survive; the hom
    // column for each tag-1 variant is informative, het columns fail the
    // frequency gate.
    let out = tempfile::tempdir().unwrap();
    let sp = SliceProcessor::new(config(), s.samples.clone(), None);
    sp.run(&s.slices, out.path()).unwrap();
    let ((r, ncols), xref) = read_npy(&out.path().join("onehot-columns.0000.npy"));
    assert_eq!(r, 5);
    assert_eq!(ncols, 2, "xref: {:?}", xref);
    // Both columns sit on tag 1.
    assert_eq!(xref[0], 1);
    assert_eq!(xref[1], 1);
    // p ~ 0.0455, stored as p * 1e6.
    assert!((xref[3 * ncols] - 45500).abs() < 1000, "p = {}", xref[3 * ncols]);

    let ((r2, nnz), pairs) = read_npy(&out.path().join("onehot.0000.npy"));
    assert_eq!(r2, 2);
    assert_eq!(nnz, 4); // two columns, two positive samples each
    // Rows of the column for the SNP variant are the two cases (0 and 2).
    let col0_rows: Vec<i64> = (0..nnz)
        .filter(|&i| pairs[nnz + i] == 0)
        .map(|i| pairs[i])
        .collect();
    assert_eq!(col0_rows.len(), 2);
    assert!(col0_rows == vec![0, 2] || col0_rows == vec![1, 3]);

    // Slice 1 has no variation, so no columns pass the frequency gate.
    let ((_, ncols1), _) = read_npy(&out.path().join("onehot-columns.0001.npy"));
    assert_eq!(ncols1, 0);

    // At p < 0.01 everything is dropped.
    let out = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.p_threshold = 0.01;
    let sp = SliceProcessor::new(cfg, s.samples.clone(), None);
    sp.run(&s.slices, out.path()).unwrap();
    let ((_, ncols), _) = read_npy(&out.path().join("onehot-columns.0000.npy"));
    assert_eq!(ncols, 0);
}

#[test]
fn test_duplicate_reference_tag_drops_annotation() {
    // The reference uses tag 0 at two distinct positions; both entries are
    // dropped and tag 0 gets no reference-based annotation.
    let dir = tempfile::tempdir().unwrap();
    let ts = tagset();
    let ix = TagIndex::new(&ts).unwrap();
    let opts = LibraryOpts {
        retain_sequences: true,
        retain_no_calls: true,
    };
    let mut lib = TileLibrary::new(ts, opts);

    let ref_body = format!("{}aaaa{}gggg{}tt", T0, T1, T0);
    let ref_path = dir.path().join("ref.fasta");
    std::fs::write(&ref_path, format!(">chr1\n{}\n", ref_body)).unwrap();
    // skip_ooo off so the out-of-order repeat of tag 0 stays on the path.
    import_reference(&lib, &ix, &ref_path, "dup-ref", &ImportOpts::default()).unwrap();

    let g_path = dir.path().join("g1.fasta");
    std::fs::write(&g_path, format!(">chr1\n{}\n", ref_body)).unwrap();
    import_genome(&lib, &ix, &g_path, &ImportOpts::default()).unwrap();

    tidy(&mut lib).unwrap();
    let slices = write_slices(&lib, dir.path(), 1).unwrap();

    let out = tempfile::tempdir().unwrap();
    let mut cfg = config();
    cfg.min_coverage = 0.5;
    cfg.emit_onehot = false;
    cfg.emit_hgvs = false;
    let samples = vec![sample("g1", false)];
    let sp = SliceProcessor::new(cfg, samples, None);
    sp.run(&slices, out.path()).unwrap();

    let ann = std::fs::read_to_string(out.path().join("matrix.0000.annotations.csv")).unwrap();
    for line in ann.lines() {
        assert!(!line.starts_with("0,"), "unexpected tag-0 annotation: {}", line);
    }
    // Tag 1 still annotates.
    assert!(ann.lines().any(|l| l.starts_with("1,")), "{}", ann);
}
