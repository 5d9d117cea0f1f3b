// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Slice-wise matrix assembly: walk tag-range slices of a tile library,
// locally renumber variants by usage, diff them against the reference in
// HGVS notation, and emit dense int16 matrices, sparse one-hot column sets,
// and per-chromosome HGVS indicator matrices, optionally filtered by a
// chi-squared or logistic-GLM p-value test.

pub mod hgvs;
pub mod npy;
pub mod process;
pub mod samples;
pub mod sync;

pub use crate::hgvs::{diff, hgvs_notation, AtomicDiff};
pub use crate::npy::{write_npy_i16, write_npy_i32, write_npy_i8};
pub use crate::process::{SliceConfig, SliceProcessor};
pub use crate::samples::{read_samples_csv, read_samples_file, write_samples_csv};
