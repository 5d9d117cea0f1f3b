// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Multi-pattern tag matcher.  Given a set of T equal-length seeds, find all
// occurrences of any seed in a query sequence.  An index keyed on the first
// PREFIX_LEN bases, packed two bits per base, is binary-searched per query
// position; candidates are confirmed by full comparison.  Matching is
// case-insensitive and any non-acgt byte breaks every window covering it.

use tile_types::{TagId, TagSet};
use vector_utils::{lower_bound1_2, upper_bound1_2};

/// Number of leading bases folded into the prefix key.
pub const PREFIX_LEN: usize = 12;

// Two-bit code for one base, or None for anything ambiguous.

fn base_code(c: u8) -> Option<u32> {
    match c.to_ascii_lowercase() {
        b'a' => Some(0),
        b'c' => Some(1),
        b'g' => Some(2),
        b't' => Some(3),
        _ => None,
    }
}

pub struct TagIndex {
    tag_len: usize,
    prefix_len: usize,
    // (prefix key, tag id), sorted.
    index: Vec<(u32, u32)>,
    tags: Vec<Vec<u8>>,
}

impl TagIndex {
    /// Build the index.  Fails on duplicate seeds, which would make hit
    /// attribution ambiguous.
    pub fn new(tagset: &TagSet) -> Result<TagIndex, tile_types::Error> {
        let tag_len = tagset.tag_len();
        let prefix_len = std::cmp::min(PREFIX_LEN, tag_len);
        let mut index = Vec::<(u32, u32)>::with_capacity(tagset.len());
        for t in 0..tagset.len() {
            let tag = tagset.tag(t as TagId);
            let mut key: u32 = 0;
            for &c in &tag[0..prefix_len] {
                // TagSet construction guarantees canonical bases.
                key = (key << 2) | base_code(c).unwrap();
            }
            index.push((key, t as u32));
        }
        index.sort_unstable();
        // Duplicate seeds share a prefix key, so only same-key runs need
        // checking.
        let mut lo = 0;
        while lo < index.len() {
            let mut hi = lo + 1;
            while hi < index.len() && index[hi].0 == index[lo].0 {
                hi += 1;
            }
            for i in lo..hi {
                for j in i + 1..hi {
                    let (a, b) = (index[i].1, index[j].1);
                    if tagset.tag(a) == tagset.tag(b) {
                        return Err(tile_types::Error::invalid_input(
                            "tagset",
                            b as usize + 1,
                            format!("tag {} duplicates tag {}", b, a),
                        ));
                    }
                }
            }
            lo = hi;
        }
        Ok(TagIndex {
            tag_len,
            prefix_len,
            index,
            tags: tagset.tags().to_vec(),
        })
    }

    pub fn tag_len(&self) -> usize {
        self.tag_len
    }

    /// Invoke cb(tag_id, position, tag_len) for every occurrence of any tag
    /// in s, in increasing position; ties at one position in increasing tag
    /// id.  Expected O(|s| + hits).
    pub fn find_all<F>(&self, s: &[u8], mut cb: F)
    where
        F: FnMut(TagId, usize, usize),
    {
        if s.len() < self.tag_len {
            return;
        }
        let mask: u32 = if self.prefix_len == 16 {
            u32::MAX
        } else {
            (1u32 << (2 * self.prefix_len)) - 1
        };

        // Rolling prefix key.  valid counts how many consecutive canonical
        // bases end at the current position; a window is usable once
        // valid >= prefix_len.
        let mut key: u32 = 0;
        let mut valid = 0usize;

        // Prime the first prefix_len - 1 bases.
        for &c in &s[0..self.prefix_len - 1] {
            match base_code(c) {
                Some(code) => {
                    key = ((key << 2) | code) & mask;
                    valid += 1;
                }
                None => {
                    valid = 0;
                }
            }
        }

        for pos in 0..s.len() - self.tag_len + 1 {
            let tail = pos + self.prefix_len - 1;
            match base_code(s[tail]) {
                Some(code) => {
                    key = ((key << 2) | code) & mask;
                    valid += 1;
                }
                None => {
                    valid = 0;
                }
            }
            if valid < self.prefix_len {
                continue;
            }
            let low = lower_bound1_2(&self.index, &key);
            let high = upper_bound1_2(&self.index, &key);
            for m in low..high {
                let t = self.index[m as usize].1;
                if self.confirm(s, pos, t) {
                    cb(t, pos, self.tag_len);
                }
            }
        }
    }

    /// Collect all hits as (position, tag) pairs.
    pub fn find_all_hits(&self, s: &[u8]) -> Vec<(usize, TagId)> {
        let mut hits = Vec::<(usize, TagId)>::new();
        self.find_all(s, |t, pos, _| hits.push((pos, t)));
        hits
    }

    // Full comparison of the window at pos against tag t, beyond the prefix.

    fn confirm(&self, s: &[u8], pos: usize, t: TagId) -> bool {
        let tag = &self.tags[t as usize];
        for i in self.prefix_len..self.tag_len {
            if s[pos + i].to_ascii_lowercase() != tag[i] {
                return false;
            }
        }
        true
    }
}
