// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Slice-wise matrix assembly.  Each slice file covers a contiguous tag range
// across all genomes; slices run on a bounded worker pool, and within a
// slice the per-tag work (usage counting, local renumbering, annotation,
// column generation) runs on all available cores.  A second, smaller
// semaphore bounds how many slices hold a dense matrix in memory at once.

use crate::hgvs::{diff, hgvs_notation};
use crate::npy::{write_npy_i16, write_npy_i32, write_npy_i8};
use crate::samples::write_samples_csv;
use crate::sync::{ErrorCell, Semaphore};
use interval_mask::IntervalMask;
use io_utils::{fwriteln, open_for_write_new};
use log::{info, warn};
use rayon::prelude::*;
use stat_test::StatTest;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tile_lib::{hash_tile, read_library, LibraryOpts, TileLibrary};
use tile_types::{Error, Result, SampleInfo, TagId, TileHash, TileVariantId};

#[derive(Clone, Debug)]
pub struct SliceConfig {
    /// Slice worker pool size.
    pub threads: usize,
    /// Fraction of genomes that must have both phases called at a tag.
    pub min_coverage: f64,
    /// Also generate one-hot columns for the most common variant.
    pub include_variant1: bool,
    /// Minimum minor-allele frequency on the training set.
    pub pvalue_min_frequency: f64,
    /// Keep a column iff its p-value is below this; exactly 1.0 means keep
    /// everything without running the test.
    pub p_threshold: f64,
    /// How many reference tiles a spanning variant may extend across.
    pub tile_span_cap: usize,
    pub emit_dense: bool,
    pub emit_onehot: bool,
    pub emit_hgvs: bool,
    /// Also write a matrix merged across all slices.
    pub merge_output: bool,
}

impl Default for SliceConfig {
    fn default() -> SliceConfig {
        SliceConfig {
            threads: 8,
            min_coverage: 0.9,
            include_variant1: false,
            pvalue_min_frequency: 0.01,
            p_threshold: 1.0,
            tile_span_cap: 16,
            emit_dense: true,
            emit_onehot: false,
            emit_hgvs: false,
            merge_output: false,
        }
    }
}

// A variant whose length difference against the reference exceeds this is
// emitted unresolved.

const MAX_LENGTH_DELTA: usize = 1000;

#[derive(Clone, Debug)]
struct AnnRow {
    tag: TagId,
    outcol: usize,
    variant: TileVariantId,
    hgvs: String,
    chrom: String,
    pos: u64,
    refb: String,
    altb: String,
    left: String,
}

struct OneHotCol {
    tag: TagId,
    variant: TileVariantId,
    is_hom: bool,
    p: f64,
    rows: Vec<u32>,
}

struct HgvsCol {
    chrom: String,
    hgvs: String,
    pos: u64,
    refb: String,
    altb: String,
    // Interleaved per sample: entries 2r, 2r+1 are the two phases.
    col: Vec<i8>,
}

// Reference layout shared read-only across all slice workers.

struct RefTileInfo {
    chrom: String,
    pos1: u64, // 1-based genomic position of the tile's first base
    seq: Vec<u8>,
    hash: TileHash,
    path_idx: usize,
}

struct RefInfo {
    tiles: HashMap<TagId, RefTileInfo>,
    chrom_paths: BTreeMap<String, Vec<TagId>>,
    tag_len: usize,
}

struct SliceResult {
    index: usize,
    ntags: usize,
    dense: Option<Vec<i16>>, // kept only when merging
    anns: Vec<AnnRow>,       // kept only when merging
    hgvs: Vec<HgvsCol>,
}

pub struct SliceProcessor {
    config: SliceConfig,
    samples: Vec<SampleInfo>,
    mask: Option<IntervalMask>,
}

impl SliceProcessor {
    pub fn new(
        config: SliceConfig,
        samples: Vec<SampleInfo>,
        mask: Option<IntervalMask>,
    ) -> SliceProcessor {
        SliceProcessor {
            config,
            samples,
            mask,
        }
    }

    pub fn run(&self, slices: &[PathBuf], outdir: &Path) -> Result<()> {
        assert!(!slices.is_empty());
        let read_opts = LibraryOpts {
            retain_sequences: true,
            retain_no_calls: true,
        };

        // Sample rows.  Without a samples file, rows come from the genomes
        // of the first slice, in stored order.
        let samples: Vec<SampleInfo> = if self.samples.is_empty() {
            let first = read_library(&slices[0], read_opts)?;
            let derived = first
                .genomes()
                .iter()
                .map(|g| SampleInfo {
                    id: g.name.clone(),
                    is_case: None,
                    is_training: true,
                    pca: Vec::new(),
                })
                .collect();
            derived
        } else {
            self.samples.clone()
        };
        write_samples_csv(&samples, &outdir.join("samples.csv"))?;
        let stat = StatTest::new(&samples);

        // Reference preload: reconstruct the per-chromosome tile paths and
        // positions from the slice files, in slice order.
        let refinfo = build_ref_info(slices, read_opts)?;
        info!(
            "reference preload: {} tiles over {} chromosomes",
            refinfo.tiles.len(),
            refinfo.chrom_paths.len()
        );

        // Worker pool over slices, with a separate semaphore bounding how
        // many dense matrices are live at once.
        let err = ErrorCell::new();
        let mem_sem = Semaphore::new(self.config.threads / 2 + 1);
        let results = Mutex::new(Vec::<SliceResult>::new());
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<usize>();
        for i in 0..slices.len() {
            job_tx.send(i).unwrap();
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..self.config.threads.max(1) {
                let job_rx = job_rx.clone();
                let (err, mem_sem, results) = (&err, &mem_sem, &results);
                let (samples, stat, refinfo) = (&samples, &stat, &refinfo);
                scope.spawn(move || {
                    while let Ok(i) = job_rx.recv() {
                        if err.is_cancelled() {
                            break;
                        }
                        match self.process_slice(
                            i, &slices[i], outdir, samples, stat, refinfo, read_opts, mem_sem,
                        ) {
                            Ok(res) => results.lock().unwrap().push(res),
                            Err(e) => err.set(e),
                        }
                    }
                });
            }
        });
        if let Some(e) = err.take() {
            return Err(e);
        }

        let mut results = results.into_inner().unwrap();
        results.sort_by_key(|r| r.index);

        if self.config.emit_hgvs {
            self.write_hgvs_outputs(&results, samples.len(), outdir)?;
        }
        if self.config.merge_output && self.config.emit_dense {
            self.write_merged_dense(&results, samples.len(), outdir)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_slice(
        &self,
        index: usize,
        path: &Path,
        outdir: &Path,
        samples: &[SampleInfo],
        stat: &StatTest,
        refinfo: &RefInfo,
        read_opts: LibraryOpts,
        mem_sem: &Semaphore,
    ) -> Result<SliceResult> {
        let cfg = &self.config;
        let lib = read_library(path, read_opts)?;
        let genomes = lib.genomes().clone();
        let nsamples = samples.len();

        // Tag range covered by this slice.
        let start = genomes.iter().map(|g| g.start_tag).min().unwrap_or(0);
        let end = genomes.iter().map(|g| g.end_tag).max().unwrap_or(start);
        let ntags = (end - start) as usize;

        // Map each sample row to its genome in this slice.
        let mut row_genome = Vec::<Option<usize>>::with_capacity(nsamples);
        for s in samples {
            let gi = genomes.iter().position(|g| g.name == s.id);
            if gi.is_none() {
                warn!("sample {} has no genome in slice {}", s.id, index);
            }
            row_genome.push(gi);
        }

        // Per-tag fan-out.  A variant-table inconsistency is fatal for the
        // whole slice.
        let works: Vec<TagWork> = (start..end)
            .into_par_iter()
            .map(|tag| {
                self.tag_work(
                    tag, start, &lib, &genomes, &row_genome, samples, stat, refinfo,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        // Dense assembly, gated by the matrix-memory semaphore.
        let _mem = mem_sem.acquire();
        let mut dense = vec![0i16; nsamples * 2 * ntags];
        for (t, w) in works.iter().enumerate() {
            for r in 0..nsamples {
                dense[r * 2 * ntags + 2 * t] = w.cols[2 * r];
                dense[r * 2 * ntags + 2 * t + 1] = w.cols[2 * r + 1];
            }
        }

        if cfg.emit_dense {
            write_npy_i16(
                outdir.join(format!("matrix.{:04}.npy", index)),
                nsamples,
                2 * ntags,
                &dense,
            )?;
        }

        // Annotations, ascending (tag, outcol).
        let anns: Vec<AnnRow> = works.iter().flat_map(|w| w.anns.iter().cloned()).collect();
        write_annotations(
            &anns,
            0,
            &outdir.join(format!("matrix.{:04}.annotations.csv", index)),
        )?;

        // One-hot columns.
        if cfg.emit_onehot {
            let cols: Vec<&OneHotCol> = works.iter().flat_map(|w| w.onehot.iter()).collect();
            let mut rows_ix = Vec::<i32>::new();
            let mut cols_ix = Vec::<i32>::new();
            let mut xref = vec![0i32; 5 * cols.len()];
            for (j, c) in cols.iter().enumerate() {
                for &r in &c.rows {
                    rows_ix.push(r as i32);
                    cols_ix.push(j as i32);
                }
                xref[j] = c.tag as i32;
                xref[cols.len() + j] = c.variant as i32;
                xref[2 * cols.len() + j] = c.is_hom as i32;
                xref[3 * cols.len() + j] = (c.p * 1e6) as i32;
                xref[4 * cols.len() + j] = if c.p > 0.0 {
                    (-c.p.log10() * 1e6) as i32
                } else {
                    i32::MAX
                };
            }
            let nnz = rows_ix.len();
            let mut onehot = rows_ix;
            onehot.extend_from_slice(&cols_ix);
            write_npy_i32(
                outdir.join(format!("onehot.{:04}.npy", index)),
                2,
                nnz,
                &onehot,
            )?;
            write_npy_i32(
                outdir.join(format!("onehot-columns.{:04}.npy", index)),
                5,
                cols.len(),
                &xref,
            )?;
        }

        info!(
            "slice {:04}: tags [{}, {}), {} annotation rows",
            index, start, end, anns.len()
        );
        let mut hgvs = Vec::<HgvsCol>::new();
        let mut works = works;
        for w in works.iter_mut() {
            hgvs.append(&mut w.hgvs);
        }
        Ok(SliceResult {
            index,
            ntags,
            dense: if cfg.merge_output { Some(dense) } else { None },
            anns: if cfg.merge_output { anns } else { Vec::new() },
            hgvs,
        })
    }

    // All per-tag computation: local renumbering, dense column pair,
    // annotation rows, one-hot candidates, HGVS columns.

    #[allow(clippy::too_many_arguments)]
    fn tag_work(
        &self,
        tag: TagId,
        slice_start: TagId,
        lib: &TileLibrary,
        genomes: &[tile_types::CompactGenome],
        row_genome: &[Option<usize>],
        samples: &[SampleInfo],
        stat: &StatTest,
        refinfo: &RefInfo,
    ) -> Result<TagWork> {
        let cfg = &self.config;
        let nsamples = row_genome.len();
        let outcol = (tag - slice_start) as usize;
        let mut work = TagWork::empty(nsamples);

        // Mask gate on the reference tile of this tag.
        let ref_tile = refinfo.tiles.get(&tag);
        if let Some(mask) = &self.mask {
            match ref_tile {
                Some(rt) => {
                    let a = rt.pos1 - 1;
                    if !mask.check(&rt.chrom, a, a + rt.seq.len() as u64) {
                        return Ok(work);
                    }
                }
                None => return Ok(work),
            }
        }

        // Old variant ids per sample phase.
        let tv = lib.tag_variants(tag);
        let mut phase_old = vec![0 as TileVariantId; 2 * nsamples];
        let mut called = 0usize;
        for r in 0..nsamples {
            if let Some(gi) = row_genome[r] {
                let g = &genomes[gi];
                for p in 0..2 {
                    let v = g.get(tag, p);
                    if v as usize > tv.len() {
                        return Err(Error::DanglingVariantRef {
                            genome: g.name.clone(),
                            tag,
                            variant: v,
                        });
                    }
                    phase_old[2 * r + p] = v;
                }
                if phase_old[2 * r] != 0 && phase_old[2 * r + 1] != 0 {
                    called += 1;
                }
            }
        }
        if nsamples == 0 || (called as f64) < cfg.min_coverage * nsamples as f64 {
            // Below coverage: the tag is zeroed across all samples.
            return Ok(work);
        }

        // Usage counts and the local renumbering.
        let mut counts = vec![0u64; tv.len() + 1];
        for &v in &phase_old {
            if v > 0 {
                counts[v as usize] += 1;
            }
        }
        // (hash, old id) pairs for used variants, plus the reference tile's
        // hash with count 0 so the reference always has a local id.
        let mut entries = Vec::<(TileHash, Option<TileVariantId>, u64)>::new();
        for old in 1..=tv.len() as u16 {
            if counts[old as usize] > 0 {
                entries.push((tv[old as usize - 1].hash, Some(old), counts[old as usize]));
            }
        }
        if let Some(rt) = ref_tile {
            if !entries.iter().any(|e| e.0 == rt.hash) {
                entries.push((rt.hash, tv.iter().position(|v| v.hash == rt.hash).map(|i| (i + 1) as u16), 0));
            }
        }
        entries.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
        let nlocal = entries.len() as u16;
        let mut old_to_new = vec![0 as TileVariantId; tv.len() + 1];
        for (i, e) in entries.iter().enumerate() {
            if let Some(old) = e.1 {
                old_to_new[old as usize] = (i + 1) as TileVariantId;
            }
        }
        let ref_new: Option<TileVariantId> = ref_tile
            .map(|rt| entries.iter().position(|e| e.0 == rt.hash).map(|i| (i + 1) as u16))
            .unwrap_or(None);

        // Dense column pair: new id, 0 (uncalled), or -1 (sequence not
        // retained).
        for r in 0..nsamples {
            for p in 0..2 {
                let old = phase_old[2 * r + p];
                work.cols[2 * r + p] = if old == 0 {
                    0
                } else if tv[old as usize - 1].sequence.is_empty() {
                    -1
                } else {
                    old_to_new[old as usize] as i16
                };
            }
        }

        // Annotations and HGVS columns need the reference sequence.
        let mut variant_diffs: Vec<(TileVariantId, Vec<crate::hgvs::AtomicDiff>, Vec<u8>)> =
            Vec::new();
        if let Some(rt) = ref_tile {
            if let Some(rn) = ref_new {
                work.anns.push(AnnRow {
                    tag,
                    outcol,
                    variant: rn,
                    hgvs: "=".to_string(),
                    chrom: rt.chrom.clone(),
                    pos: rt.pos1,
                    refb: String::new(),
                    altb: String::new(),
                    left: String::new(),
                });
            }
            for (i, e) in entries.iter().enumerate() {
                let new_id = (i + 1) as TileVariantId;
                if e.0 == rt.hash {
                    continue;
                }
                let old = match e.1 {
                    Some(o) => o,
                    None => continue,
                };
                let seq = &tv[old as usize - 1].sequence;
                if seq.is_empty() {
                    continue; // low-quality variant, nothing to diff
                }
                match self.resolve_reference(refinfo, tag, seq) {
                    Resolution::Resolved(refseq) => {
                        let ds = diff(&refseq, seq);
                        for d in &ds {
                            let (hgvs, pos, refb, altb) =
                                hgvs_notation(&rt.chrom, rt.pos1, &refseq, d);
                            work.anns.push(AnnRow {
                                tag,
                                outcol,
                                variant: new_id,
                                hgvs,
                                chrom: rt.chrom.clone(),
                                pos,
                                refb,
                                altb,
                                left: String::from_utf8_lossy(&refseq[..d.ref_start])
                                    .into_owned(),
                            });
                        }
                        variant_diffs.push((new_id, ds, refseq));
                    }
                    Resolution::Unresolved => {
                        work.anns.push(AnnRow {
                            tag,
                            outcol,
                            variant: new_id,
                            hgvs: String::new(),
                            chrom: rt.chrom.clone(),
                            pos: rt.pos1,
                            refb: String::new(),
                            altb: String::new(),
                            left: String::new(),
                        });
                    }
                    Resolution::MaskedOut => {}
                }
            }
        }

        // New variant ids per sample phase, for column generation.
        let new_vals = &work.cols;

        // One-hot candidate columns.
        if cfg.emit_onehot {
            let vstart: u16 = if cfg.include_variant1 { 1 } else { 2 };
            for v in vstart..=nlocal {
                for &is_hom in &[true, false] {
                    let mut col = vec![0i8; nsamples];
                    let mut rows = Vec::<u32>::new();
                    for r in 0..nsamples {
                        let (a, b) = (new_vals[2 * r], new_vals[2 * r + 1]);
                        if a <= 0 || b <= 0 {
                            col[r] = -1;
                            continue;
                        }
                        let na = a as u16 == v;
                        let nb = b as u16 == v;
                        let hit = if is_hom { na && nb } else { na != nb };
                        if hit {
                            col[r] = 1;
                            rows.push(r as u32);
                        }
                    }
                    // Minor-allele frequency on the training set.
                    let mut ncalled = 0usize;
                    let mut npos = 0usize;
                    for (r, s) in samples.iter().enumerate() {
                        if s.is_training && col[r] >= 0 {
                            ncalled += 1;
                            if col[r] == 1 {
                                npos += 1;
                            }
                        }
                    }
                    if ncalled == 0 {
                        continue;
                    }
                    let f = npos as f64 / ncalled as f64;
                    if f.min(1.0 - f) < cfg.pvalue_min_frequency {
                        continue;
                    }
                    let p = if cfg.p_threshold >= 1.0 {
                        1.0
                    } else {
                        let p = stat.pvalue(&col);
                        if !(p < cfg.p_threshold) {
                            continue;
                        }
                        p
                    };
                    work.onehot.push(OneHotCol {
                        tag,
                        variant: v,
                        is_hom,
                        p,
                        rows,
                    });
                }
            }
        }

        // Per-diff HGVS indicator columns.
        if cfg.emit_hgvs {
            if let Some(rt) = ref_tile {
                let mut by_hgvs = BTreeMap::<String, (u64, String, String, Vec<u16>)>::new();
                for (new_id, ds, refseq) in &variant_diffs {
                    for d in ds {
                        let (hgvs, pos, refb, altb) =
                            hgvs_notation(&rt.chrom, rt.pos1, refseq, d);
                        by_hgvs
                            .entry(hgvs)
                            .or_insert_with(|| (pos, refb, altb, Vec::new()))
                            .3
                            .push(*new_id);
                    }
                }
                for (hgvs, (pos, refb, altb, carriers)) in by_hgvs {
                    let mut col = vec![0i8; 2 * nsamples];
                    let mut test = vec![0i8; nsamples];
                    for r in 0..nsamples {
                        let mut any = false;
                        let mut uncalled = 0;
                        for p in 0..2 {
                            let v = new_vals[2 * r + p];
                            col[2 * r + p] = if v <= 0 {
                                uncalled += 1;
                                -1
                            } else if carriers.contains(&(v as u16)) {
                                any = true;
                                1
                            } else {
                                0
                            };
                        }
                        test[r] = if uncalled == 2 {
                            -1
                        } else if any {
                            1
                        } else {
                            0
                        };
                    }
                    if cfg.p_threshold < 1.0 && !(stat.pvalue(&test) < cfg.p_threshold) {
                        continue;
                    }
                    work.hgvs.push(HgvsCol {
                        chrom: rt.chrom.clone(),
                        hgvs,
                        pos,
                        refb,
                        altb,
                        col,
                    });
                }
            }
        }
        Ok(work)
    }

    // Reference sequence a variant diffs against: the tile itself, or the
    // tile extended across following reference tiles until its trailing tag
    // matches the variant's, bounded by tile_span_cap.

    fn resolve_reference(&self, refinfo: &RefInfo, tag: TagId, var: &[u8]) -> Resolution {
        let tl = refinfo.tag_len;
        let rt = match refinfo.tiles.get(&tag) {
            Some(rt) => rt,
            None => return Resolution::Unresolved,
        };
        if var.len() < tl {
            return Resolution::Unresolved;
        }
        let trailing = &var[var.len() - tl..];
        let mut ext = rt.seq.clone();
        if ext.len() >= tl && &ext[ext.len() - tl..] == trailing {
            return finish_resolution(&ext, var);
        }
        let path = match refinfo.chrom_paths.get(&rt.chrom) {
            Some(p) => p,
            None => return Resolution::Unresolved,
        };
        let mut idx = rt.path_idx;
        for _ in 0..self.config.tile_span_cap {
            idx += 1;
            if idx >= path.len() {
                return Resolution::Unresolved;
            }
            let next = match refinfo.tiles.get(&path[idx]) {
                Some(n) => n,
                None => return Resolution::Unresolved, // dropped duplicate
            };
            if let Some(mask) = &self.mask {
                let a = next.pos1 - 1;
                if !mask.check(&next.chrom, a, a + next.seq.len() as u64) {
                    // Spanning across a masked-out boundary: keep the
                    // variant in the dense matrix but not in annotations.
                    return Resolution::MaskedOut;
                }
            }
            if next.seq.len() < tl {
                return Resolution::Unresolved;
            }
            ext.extend_from_slice(&next.seq[tl..]);
            if &ext[ext.len() - tl..] == trailing {
                return finish_resolution(&ext, var);
            }
        }
        Resolution::Unresolved
    }

    fn write_hgvs_outputs(
        &self,
        results: &[SliceResult],
        nsamples: usize,
        outdir: &Path,
    ) -> Result<()> {
        let mut by_chrom = BTreeMap::<String, Vec<&HgvsCol>>::new();
        for r in results {
            for c in &r.hgvs {
                by_chrom.entry(c.chrom.clone()).or_insert_with(Vec::new).push(c);
            }
        }
        for (chrom, cols) in by_chrom {
            let ncols = cols.len();
            let mut m = vec![0i8; nsamples * 2 * ncols];
            for (j, c) in cols.iter().enumerate() {
                for r in 0..nsamples {
                    m[r * 2 * ncols + 2 * j] = c.col[2 * r];
                    m[r * 2 * ncols + 2 * j + 1] = c.col[2 * r + 1];
                }
            }
            write_npy_i8(
                outdir.join(format!("hgvs.{}.npy", chrom)),
                nsamples,
                2 * ncols,
                &m,
            )?;
            let path = outdir.join(format!("hgvs.{}.annotations.csv", chrom));
            let mut f = open_for_write_new![&path.display().to_string()];
            for (j, c) in cols.iter().enumerate() {
                fwriteln!(f, "{},{},{},{},{},{}", j, c.hgvs, chrom, c.pos, c.refb, c.altb);
            }
        }
        Ok(())
    }

    fn write_merged_dense(
        &self,
        results: &[SliceResult],
        nsamples: usize,
        outdir: &Path,
    ) -> Result<()> {
        let total: usize = results.iter().map(|r| r.ntags).sum();
        let mut merged = vec![0i16; nsamples * 2 * total];
        let mut offset = 0usize;
        for r in results {
            if let Some(dense) = &r.dense {
                for row in 0..nsamples {
                    let src = &dense[row * 2 * r.ntags..(row + 1) * 2 * r.ntags];
                    let dst_start = row * 2 * total + 2 * offset;
                    merged[dst_start..dst_start + 2 * r.ntags].copy_from_slice(src);
                }
            }
            offset += r.ntags;
        }
        write_npy_i16(outdir.join("matrix.npy"), nsamples, 2 * total, &merged)?;

        let mut f = open_for_write_new![&outdir.join("matrix.annotations.csv").display().to_string()];
        let mut offset = 0usize;
        for r in results {
            for a in &r.anns {
                fwriteln!(
                    f,
                    "{},{},{},{},{},{},{},{},{}",
                    a.tag,
                    a.outcol + offset,
                    a.variant,
                    a.hgvs,
                    a.chrom,
                    a.pos,
                    a.refb,
                    a.altb,
                    a.left
                );
            }
            offset += r.ntags;
        }
        Ok(())
    }
}

enum Resolution {
    Resolved(Vec<u8>),
    Unresolved,
    MaskedOut,
}

fn finish_resolution(ext: &[u8], var: &[u8]) -> Resolution {
    let delta = if ext.len() > var.len() {
        ext.len() - var.len()
    } else {
        var.len() - ext.len()
    };
    if delta > MAX_LENGTH_DELTA {
        Resolution::Unresolved
    } else {
        Resolution::Resolved(ext.to_vec())
    }
}

struct TagWork {
    cols: Vec<i16>,
    anns: Vec<AnnRow>,
    onehot: Vec<OneHotCol>,
    hgvs: Vec<HgvsCol>,
}

impl TagWork {
    fn empty(nsamples: usize) -> TagWork {
        TagWork {
            cols: vec![0i16; 2 * nsamples],
            anns: Vec::new(),
            onehot: Vec::new(),
            hgvs: Vec::new(),
        }
    }
}

fn write_annotations(anns: &[AnnRow], outcol_offset: usize, path: &Path) -> Result<()> {
    let mut f = open_for_write_new![&path.display().to_string()];
    for a in anns {
        fwriteln!(
            f,
            "{},{},{},{},{},{},{},{},{}",
            a.tag,
            a.outcol + outcol_offset,
            a.variant,
            a.hgvs,
            a.chrom,
            a.pos,
            a.refb,
            a.altb,
            a.left
        );
    }
    Ok(())
}

// Reconstruct the reference layout from the slice files: per-chromosome tag
// paths concatenated in slice order, each tile's sequence, and its 1-based
// start position.  A tag appearing twice on a reference path is dropped
// from annotation (both occurrences) with a warning.

fn build_ref_info(slices: &[PathBuf], read_opts: LibraryOpts) -> Result<RefInfo> {
    let mut chrom_paths = BTreeMap::<String, Vec<TagId>>::new();
    let mut seqs = HashMap::<TagId, Vec<u8>>::new();
    let mut tag_len = 0usize;
    let mut ref_name: Option<String> = None;
    for path in slices {
        let lib = read_library(path, read_opts)?;
        tag_len = lib.tagset().tag_len();
        let refseqs = lib.refseqs();
        for cs in refseqs.iter() {
            match &ref_name {
                None => ref_name = Some(cs.name.clone()),
                Some(n) if *n != cs.name => {
                    warn!("multiple references ({}, {}), using {}", n, cs.name, n);
                    continue;
                }
                _ => {}
            }
            for (chrom, tpath) in &cs.tile_sequences {
                let out = chrom_paths.entry(chrom.clone()).or_insert_with(Vec::new);
                for lr in tpath {
                    let seq = match lib.tile_variant_sequence(*lr) {
                        Some(s) => s,
                        None => return Err(Error::MissingReferenceTile { tag: lr.tag }),
                    };
                    out.push(lr.tag);
                    seqs.insert(lr.tag, seq);
                }
            }
        }
    }

    // Find duplicated tags across all reference paths.
    let mut seen = HashMap::<TagId, usize>::new();
    for tpath in chrom_paths.values() {
        for &t in tpath {
            *seen.entry(t).or_insert(0) += 1;
        }
    }

    let mut tiles = HashMap::<TagId, RefTileInfo>::new();
    for (chrom, tpath) in &chrom_paths {
        let mut pos1 = 1u64;
        for (idx, &t) in tpath.iter().enumerate() {
            let seq = &seqs[&t];
            if seen[&t] > 1 {
                warn!("reference tag {} occurs {} times, dropped from annotation", t, seen[&t]);
            } else {
                tiles.insert(
                    t,
                    RefTileInfo {
                        chrom: chrom.clone(),
                        pos1,
                        seq: seq.clone(),
                        hash: hash_tile(seq),
                        path_idx: idx,
                    },
                );
            }
            if seq.len() >= tag_len {
                pos1 += (seq.len() - tag_len) as u64;
            }
        }
    }
    Ok(RefInfo {
        tiles,
        chrom_paths,
        tag_len,
    })
}
