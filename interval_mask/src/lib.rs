// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Region filter: decides whether a genomic interval intersects a set of BED
// regions.  The builder accumulates (chrom, start, end) tuples; freeze()
// sorts per-chromosome intervals by start and lays out a balanced binary
// tree in a flat vector (children of node i at 2i+1 and 2i+2), each node
// annotated with the max end over its subtree.  Query before freeze is a
// type error rather than a runtime state check: only the frozen type has
// check().

use std::collections::HashMap;
use std::io::BufRead;
use tile_types::{Error, Result};

#[derive(Clone, Copy, Debug)]
struct Interval {
    start: u64,
    end: u64,
    // Max end over the subtree rooted here; filled in by freeze.
    max_end: u64,
}

#[derive(Default)]
pub struct MaskBuilder {
    intervals: HashMap<String, Vec<(u64, u64)>>,
    expand: u64,
}

pub struct IntervalMask {
    trees: HashMap<String, Vec<Interval>>,
}

impl MaskBuilder {
    pub fn new() -> MaskBuilder {
        MaskBuilder::default()
    }

    /// Expand every interval by k bases on both sides (clamped at zero).
    pub fn expand(mut self, k: u64) -> MaskBuilder {
        self.expand = k;
        self
    }

    pub fn add(&mut self, chrom: &str, start: u64, end: u64) {
        let start = start.saturating_sub(self.expand);
        let end = end + self.expand;
        self.intervals
            .entry(chrom.to_string())
            .or_insert_with(Vec::new)
            .push((start, end));
    }

    /// Load tab-separated BED rows: chrom, start, end[, name].  Half-open,
    /// zero-based.  Lines starting with '#' and blank lines are skipped.
    pub fn add_bed<R: BufRead>(&mut self, reader: R, file: &str) -> Result<()> {
        for (i, line) in reader.lines().enumerate() {
            let s = line?;
            if s.is_empty() || s.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = s.split('\t').collect();
            if fields.len() < 3 {
                return Err(Error::invalid_input(
                    file,
                    i + 1,
                    "expected at least 3 tab-separated fields",
                ));
            }
            let start = fields[1].parse::<u64>().map_err(|_| {
                Error::invalid_input(file, i + 1, format!("bad start \"{}\"", fields[1]))
            })?;
            let end = fields[2].parse::<u64>().map_err(|_| {
                Error::invalid_input(file, i + 1, format!("bad end \"{}\"", fields[2]))
            })?;
            if end < start {
                return Err(Error::invalid_input(file, i + 1, "end before start"));
            }
            self.add(fields[0], start, end);
        }
        Ok(())
    }

    /// Sort and build the per-chromosome trees.  The builder is consumed;
    /// only the frozen mask answers queries.
    pub fn freeze(self) -> IntervalMask {
        let mut trees = HashMap::<String, Vec<Interval>>::new();
        for (chrom, mut ivs) in self.intervals {
            ivs.sort_unstable();
            let n = ivs.len();
            let mut tree = vec![
                Interval {
                    start: 0,
                    end: 0,
                    max_end: 0
                };
                n
            ];
            // Place the sorted intervals into the flat tree by in-order
            // traversal, then fill max_end bottom-up.
            let mut next = 0usize;
            place(&ivs, &mut tree, 0, &mut next);
            fill_max_end(&mut tree, 0);
            trees.insert(chrom, tree);
        }
        IntervalMask { trees }
    }
}

// In-order placement: node i gets the middle of its range so the tree is
// balanced and an in-order walk visits intervals in start order.

fn place(sorted: &[(u64, u64)], tree: &mut Vec<Interval>, node: usize, next: &mut usize) {
    if node >= tree.len() {
        return;
    }
    place(sorted, tree, 2 * node + 1, next);
    let (start, end) = sorted[*next];
    tree[node] = Interval {
        start,
        end,
        max_end: end,
    };
    *next += 1;
    place(sorted, tree, 2 * node + 2, next);
}

fn fill_max_end(tree: &mut Vec<Interval>, node: usize) -> u64 {
    if node >= tree.len() {
        return 0;
    }
    let left = fill_max_end(tree, 2 * node + 1);
    let right = fill_max_end(tree, 2 * node + 2);
    let m = std::cmp::max(tree[node].end, std::cmp::max(left, right));
    tree[node].max_end = m;
    m
}

impl IntervalMask {
    /// Does [a, b) intersect any stored interval on chrom?  Unknown
    /// chromosome answers false.
    pub fn check(&self, chrom: &str, a: u64, b: u64) -> bool {
        match self.trees.get(chrom) {
            None => false,
            Some(tree) => overlaps(tree, 0, a, b),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

fn overlaps(tree: &[Interval], node: usize, a: u64, b: u64) -> bool {
    if node >= tree.len() || a >= b {
        return false;
    }
    let iv = &tree[node];
    if iv.max_end <= a {
        // Nothing in this subtree reaches a.
        return false;
    }
    if overlaps(tree, 2 * node + 1, a, b) {
        return true;
    }
    if iv.start < b && iv.end > a {
        return true;
    }
    if iv.start >= b {
        // Right subtree starts even later.
        return false;
    }
    overlaps(tree, 2 * node + 2, a, b)
}
