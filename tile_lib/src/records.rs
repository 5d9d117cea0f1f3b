// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// The on-disk library format: a stream of framed records, bincode-encoded,
// gzip-compressed when the path ends in .gz.  A library file starts with
// exactly one TagSet record; TileVariants records precede any CompactGenomes
// or CompactSequences record that references them, so a single forward pass
// can rebuild the library.

use crate::library::{LibraryOpts, TileLibrary};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tile_types::{CompactGenome, CompactSequence, Error, Result, TagSet, TileVariant};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum LibRecord {
    TagSet(TagSet),
    TileVariants(Vec<TileVariant>),
    CompactGenomes(Vec<CompactGenome>),
    CompactSequences(Vec<CompactSequence>),
}

enum Sink {
    Plain(BufWriter<File>),
    Gz(GzEncoder<BufWriter<File>>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Sink::Plain(w) => w.write(buf),
            Sink::Gz(w) => w.write(buf),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Sink::Plain(w) => w.flush(),
            Sink::Gz(w) => w.flush(),
        }
    }
}

pub struct LibraryWriter {
    sink: Option<Sink>,
}

impl LibraryWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<LibraryWriter> {
        let gz = path
            .as_ref()
            .extension()
            .map_or(false, |e| e == "gz");
        let w = BufWriter::new(File::create(path.as_ref())?);
        let sink = if gz {
            Sink::Gz(GzEncoder::new(w, Compression::default()))
        } else {
            Sink::Plain(w)
        };
        Ok(LibraryWriter { sink: Some(sink) })
    }

    pub fn write_record(&mut self, rec: &LibRecord) -> Result<()> {
        let sink = self.sink.as_mut().expect("write after finish");
        bincode::serialize_into(sink, rec).map_err(|e| Error::Encode(e.to_string()))
    }

    pub fn finish(mut self) -> Result<()> {
        match self.sink.take().expect("double finish") {
            Sink::Plain(mut w) => w.flush()?,
            Sink::Gz(w) => {
                w.finish()?.flush()?;
            }
        }
        Ok(())
    }
}

pub struct LibraryReader {
    src: BufReader<Box<dyn Read>>,
    path: String,
}

impl LibraryReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<LibraryReader> {
        let gz = path
            .as_ref()
            .extension()
            .map_or(false, |e| e == "gz");
        let f = File::open(path.as_ref())?;
        let src: Box<dyn Read> = if gz {
            Box::new(MultiGzDecoder::new(f))
        } else {
            Box::new(f)
        };
        Ok(LibraryReader {
            src: BufReader::new(src),
            path: path.as_ref().display().to_string(),
        })
    }

    /// Next record, or None at a clean end of stream.
    pub fn read_record(&mut self) -> Result<Option<LibRecord>> {
        match bincode::deserialize_from::<_, LibRecord>(&mut self.src) {
            Ok(rec) => Ok(Some(rec)),
            Err(e) => match *e {
                bincode::ErrorKind::Io(ref io)
                    if io.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    Ok(None)
                }
                _ => Err(Error::Encode(format!("{}: {}", self.path, e))),
            },
        }
    }

    /// The head record of a library file, which must be its tag set.
    pub fn read_tagset(&mut self) -> Result<TagSet> {
        match self.read_record()? {
            Some(LibRecord::TagSet(ts)) => Ok(ts),
            _ => Err(Error::invalid_input(
                &self.path,
                0,
                "library file does not start with a tag set record",
            )),
        }
    }
}

/// Persist a library: tag set, then variants tag by tag, then genomes, then
/// reference sequences.
pub fn write_library<P: AsRef<Path>>(lib: &TileLibrary, path: P) -> Result<()> {
    let mut w = LibraryWriter::create(path)?;
    w.write_record(&LibRecord::TagSet(lib.tagset().clone()))?;
    let ntags = lib.tagset().len();
    let mut batch = Vec::<TileVariant>::new();
    for tag in 0..ntags as u32 {
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
    let genomes = lib.genomes().clone();
    if !genomes.is_empty() {
        w.write_record(&LibRecord::CompactGenomes(genomes))?;
    }
    let refseqs = lib.refseqs().clone();
    if !refseqs.is_empty() {
        w.write_record(&LibRecord::CompactSequences(refseqs))?;
    }
    w.finish()
}

/// Load a library file written by write_library (or by merge/slice).
pub fn read_library<P: AsRef<Path>>(path: P, opts: LibraryOpts) -> Result<TileLibrary> {
    let mut r = LibraryReader::open(&path)?;
    let tagset = r.read_tagset()?;
    let lib = TileLibrary::new(tagset, opts);
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
                for v in &vs {
                    let seq = if v.sequence.is_empty() {
                        None
                    } else {
                        Some(&v.sequence[..])
                    };
                    let assigned = lib.insert(v.tag, v.hash, seq, v.is_ref)?;
                    if assigned != v.variant {
                        return Err(Error::invalid_input(
                            path.as_ref().display().to_string(),
                            0,
                            format!(
                                "tag {} variant {} read out of order (assigned {})",
                                v.tag, v.variant, assigned
                            ),
                        ));
                    }
                }
            }
            LibRecord::CompactGenomes(gs) => {
                for g in gs {
                    lib.add_genome(g);
                }
            }
            LibRecord::CompactSequences(rs) => {
                for r in rs {
                    lib.add_refseq(r);
                }
            }
        }
    }
    Ok(lib)
}
