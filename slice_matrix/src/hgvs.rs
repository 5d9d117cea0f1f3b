// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Minimal edit representation of one DNA string against another, rendered
// in HGVS genomic notation with positions offset by the reference tile's
// start.  Common prefix and suffix are trimmed, the remainder goes through
// a Levenshtein alignment (substitution cost 1, so SNPs align as
// substitutions rather than paired indels), and adjacent non-matching
// operations coalesce into atomic diffs.  A changed region too large to
// diff exactly collapses to one delins covering the region.

/// One atomic edit: ref bytes [ref_start, ref_end) are replaced by alt.
/// Empty alt is a deletion; ref_start == ref_end is an insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicDiff {
    pub ref_start: usize,
    pub ref_end: usize,
    pub alt: Vec<u8>,
}

// Changed regions bigger than this collapse to a single delins rather than
// paying quadratic diff cost.
const MAX_REGION: usize = 2000;

enum RawOp {
    Keep,
    Sub,
    Del,
    Ins,
}

pub fn diff(a: &[u8], b: &[u8]) -> Vec<AtomicDiff> {
    // Trim the common prefix and suffix.
    let mut p = 0usize;
    while p < a.len() && p < b.len() && a[p] == b[p] {
        p += 1;
    }
    let mut s = 0usize;
    while s < a.len() - p && s < b.len() - p && a[a.len() - 1 - s] == b[b.len() - 1 - s] {
        s += 1;
    }
    let ta = &a[p..a.len() - s];
    let tb = &b[p..b.len() - s];
    if ta.is_empty() && tb.is_empty() {
        return Vec::new();
    }
    if ta.len() + tb.len() > MAX_REGION {
        return vec![AtomicDiff {
            ref_start: p,
            ref_end: p + ta.len(),
            alt: tb.to_vec(),
        }];
    }

    let ops = edit_ops(ta, tb);
    let mut out = Vec::<AtomicDiff>::new();
    let mut cur: Option<AtomicDiff> = None;
    let mut i = 0usize;
    let mut j = 0usize;
    for op in ops {
        match op {
            RawOp::Keep => {
                if let Some(d) = cur.take() {
                    out.push(d);
                }
                i += 1;
                j += 1;
            }
            RawOp::Sub => {
                let d = cur.get_or_insert(AtomicDiff {
                    ref_start: p + i,
                    ref_end: p + i,
                    alt: Vec::new(),
                });
                d.ref_end += 1;
                d.alt.push(tb[j]);
                i += 1;
                j += 1;
            }
            RawOp::Del => {
                let d = cur.get_or_insert(AtomicDiff {
                    ref_start: p + i,
                    ref_end: p + i,
                    alt: Vec::new(),
                });
                d.ref_end += 1;
                i += 1;
            }
            RawOp::Ins => {
                cur.get_or_insert(AtomicDiff {
                    ref_start: p + i,
                    ref_end: p + i,
                    alt: Vec::new(),
                })
                .alt
                .push(tb[j]);
                j += 1;
            }
        }
    }
    if let Some(d) = cur {
        out.push(d);
    }
    out
}

// Optimal alignment under unit costs (substitution 1, indel 1), with the
// traceback preferring diagonal moves so isolated mismatches read as
// substitutions.  Quadratic, bounded by MAX_REGION.

fn edit_ops(a: &[u8], b: &[u8]) -> Vec<RawOp> {
    let n = a.len();
    let m = b.len();
    // Traceback codes: 0 diagonal (keep/sub), 1 up (del), 2 left (ins).
    let mut back = vec![0u8; (n + 1) * (m + 1)];
    let mut prev = vec![0u32; m + 1];
    let mut row = vec![0u32; m + 1];
    for j in 0..=m {
        prev[j] = j as u32;
        if j > 0 {
            back[j] = 2;
        }
    }
    for i in 1..=n {
        row[0] = i as u32;
        back[i * (m + 1)] = 1;
        for j in 1..=m {
            let sub = prev[j - 1] + (a[i - 1] != b[j - 1]) as u32;
            let del = prev[j] + 1;
            let ins = row[j - 1] + 1;
            let (cost, code) = if sub <= del && sub <= ins {
                (sub, 0u8)
            } else if del <= ins {
                (del, 1u8)
            } else {
                (ins, 2u8)
            };
            row[j] = cost;
            back[i * (m + 1) + j] = code;
        }
        std::mem::swap(&mut prev, &mut row);
    }

    let mut ops_rev = Vec::<RawOp>::new();
    let mut i = n;
    let mut j = m;
    while i > 0 || j > 0 {
        match back[i * (m + 1) + j] {
            0 => {
                ops_rev.push(if a[i - 1] == b[j - 1] {
                    RawOp::Keep
                } else {
                    RawOp::Sub
                });
                i -= 1;
                j -= 1;
            }
            1 => {
                ops_rev.push(RawOp::Del);
                i -= 1;
            }
            _ => {
                ops_rev.push(RawOp::Ins);
                j -= 1;
            }
        }
    }
    ops_rev.reverse();
    ops_rev
}

/// Render one atomic diff.  tile_start is the 1-based genomic position of
/// the reference tile's first base.  Returns (hgvs, pos, ref, alt), ref and
/// alt uppercased for the annotation row.
pub fn hgvs_notation(
    chrom: &str,
    tile_start: u64,
    refseq: &[u8],
    d: &AtomicDiff,
) -> (String, u64, String, String) {
    let upper = |s: &[u8]| -> String {
        s.iter().map(|c| c.to_ascii_uppercase() as char).collect()
    };
    let rbytes = &refseq[d.ref_start..d.ref_end];
    let rlen = d.ref_end - d.ref_start;
    let pos = tile_start + d.ref_start as u64;
    let end = tile_start + d.ref_end as u64 - 1;
    let hgvs = if rlen == 1 && d.alt.len() == 1 {
        format!(
            "{}:g.{}{}>{}",
            chrom,
            pos,
            upper(rbytes),
            upper(&d.alt)
        )
    } else if d.alt.is_empty() {
        if rlen == 1 {
            format!("{}:g.{}del", chrom, pos)
        } else {
            format!("{}:g.{}_{}del", chrom, pos, end)
        }
    } else if rlen == 0 {
        format!("{}:g.{}_{}ins{}", chrom, pos - 1, pos, upper(&d.alt))
    } else {
        format!("{}:g.{}_{}delins{}", chrom, pos, end, upper(&d.alt))
    };
    (hgvs, pos, upper(rbytes), upper(&d.alt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical() {
        assert!(diff(b"acgtacgt", b"acgtacgt").is_empty());
    }

    #[test]
    fn test_substitution() {
        let ds = diff(b"acgtacgt", b"acgaacgt");
        assert_eq!(ds.len(), 1);
        assert_eq!(
            ds[0],
            AtomicDiff {
                ref_start: 3,
                ref_end: 4,
                alt: b"a".to_vec()
            }
        );
        let (hgvs, pos, r, a) = hgvs_notation("chr2", 158, b"acgtacgt", &ds[0]);
        assert_eq!(hgvs, "chr2:g.161T>A");
        assert_eq!(pos, 161);
        assert_eq!((r.as_str(), a.as_str()), ("T", "A"));
    }

    #[test]
    fn test_delins_scenario() {
        // Reference tile NNNTTT at chr1:1, variant tile GGCTTT.
        let ds = diff(b"nnnttt", b"ggcttt");
        assert_eq!(ds.len(), 1);
        assert_eq!(ds[0].ref_start, 0);
        assert_eq!(ds[0].ref_end, 3);
        let (hgvs, pos, r, a) = hgvs_notation("chr1", 1, b"nnnttt", &ds[0]);
        assert_eq!(hgvs, "chr1:g.1_3delinsGGC");
        assert_eq!(pos, 1);
        assert_eq!((r.as_str(), a.as_str()), ("NNN", "GGC"));
    }

    #[test]
    fn test_deletion_and_insertion() {
        let ds = diff(b"aacgttaa", b"aacttaa");
        assert_eq!(ds.len(), 1);
        assert!(ds[0].alt.is_empty());
        assert_eq!(ds[0].ref_end - ds[0].ref_start, 1);
        let (hgvs, _, _, _) = hgvs_notation("c", 10, b"aacgttaa", &ds[0]);
        assert!(hgvs.contains("del"), "{}", hgvs);

        let ds = diff(b"aacttaa", b"aacgttaa");
        assert_eq!(ds.len(), 1);
        assert_eq!(ds[0].ref_start, ds[0].ref_end);
        assert_eq!(ds[0].alt, b"g".to_vec());
        let (hgvs, _, _, a) = hgvs_notation("c", 10, b"aacttaa", &ds[0]);
        assert!(hgvs.contains("ins"), "{}", hgvs);
        assert_eq!(a, "G");
    }

    #[test]
    fn test_multi_base_deletion_range() {
        let ds = diff(b"aaccggtt", b"aatt");
        assert_eq!(ds.len(), 1);
        let (hgvs, pos, r, _) = hgvs_notation("chr9", 221, b"aaccggtt", &ds[0]);
        assert_eq!(pos, 223);
        assert_eq!(r, "CCGG");
        assert_eq!(hgvs, "chr9:g.223_226del");
    }

    #[test]
    fn test_two_separated_snps_are_two_diffs() {
        let ds = diff(b"aaaaccccgggg", b"ataaccccggcg");
        assert_eq!(ds.len(), 2);
        assert_eq!(ds[0].ref_start, 1);
        assert_eq!(ds[1].ref_start, 10);
    }

    #[test]
    fn test_oversize_region_collapses() {
        let a: Vec<u8> = (0..3000).map(|i| b"acgt"[i % 4]).collect();
        let b: Vec<u8> = (0..3000).map(|i| b"tgca"[i % 4]).collect();
        let ds = diff(&a, &b);
        assert_eq!(ds.len(), 1);
        assert_eq!(ds[0].ref_start, 0);
        assert_eq!(ds[0].ref_end, 3000);
    }
}
