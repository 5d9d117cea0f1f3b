// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Minimal numpy .npy container, version 1.0: magic, little-endian dtype,
// row-major shape in the header dict, raw data.  Layout:
//
// 1. "\x93NUMPY" (6 bytes)
// 2. version 1.0 (2 bytes)
// 3. header length (u16, little-endian)
// 4. "{'descr': '<i2', 'fortran_order': False, 'shape': (r, c), }" padded
//    with spaces to a 64-byte boundary, newline-terminated
// 5. the entries, row-major, little-endian.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tile_types::Result;

fn write_header<W: Write>(w: &mut W, descr: &str, rows: usize, cols: usize) -> Result<()> {
    let dict = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': ({}, {}), }}",
        descr, rows, cols
    );
    // Total header (magic + version + len field + dict + padding + newline)
    // must be a multiple of 64.
    let unpadded = 6 + 2 + 2 + dict.len() + 1;
    let pad = (64 - unpadded % 64) % 64;
    let header_len = dict.len() + pad + 1;
    w.write_all(b"\x93NUMPY")?;
    w.write_all(&[1u8, 0u8])?;
    w.write_all(&(header_len as u16).to_le_bytes())?;
    w.write_all(dict.as_bytes())?;
    for _ in 0..pad {
        w.write_all(b" ")?;
    }
    w.write_all(b"\n")?;
    Ok(())
}

pub fn write_npy_i8<P: AsRef<Path>>(path: P, rows: usize, cols: usize, x: &[i8]) -> Result<()> {
    assert_eq!(x.len(), rows * cols);
    let mut w = BufWriter::new(File::create(path)?);
    write_header(&mut w, "<i1", rows, cols)?;
    for &v in x {
        w.write_all(&v.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_npy_i16<P: AsRef<Path>>(path: P, rows: usize, cols: usize, x: &[i16]) -> Result<()> {
    assert_eq!(x.len(), rows * cols);
    let mut w = BufWriter::new(File::create(path)?);
    write_header(&mut w, "<i2", rows, cols)?;
    for &v in x {
        w.write_all(&v.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_npy_i32<P: AsRef<Path>>(path: P, rows: usize, cols: usize, x: &[i32]) -> Result<()> {
    assert_eq!(x.len(), rows * cols);
    let mut w = BufWriter::new(File::create(path)?);
    write_header(&mut w, "<i4", rows, cols)?;
    for &v in x {
        w.write_all(&v.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}
