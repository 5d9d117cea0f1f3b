// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Streaming FASTA reader.  A background thread parses records (plain or
// gzipped) and hands them over a single-slot channel, so a slow consumer
// stalls the reader rather than buffering the genome.

use crossbeam_channel::{bounded, Receiver};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::thread;
use tile_types::{Error, Result};

/// One FASTA record with its body lowercased and concatenated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub name: String,
    pub seq: Vec<u8>,
}

pub struct FastaReader {
    rx: Receiver<Result<FastaRecord>>,
    done: bool,
}

impl FastaReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FastaReader> {
        let gz = path.as_ref().extension().map_or(false, |e| e == "gz");
        let f = File::open(path.as_ref())?;
        let src: Box<dyn Read + Send> = if gz {
            Box::new(MultiGzDecoder::new(f))
        } else {
            Box::new(f)
        };
        let file = path.as_ref().display().to_string();
        let (tx, rx) = bounded::<Result<FastaRecord>>(1);
        thread::spawn(move || {
            let reader = BufReader::new(src);
            let mut name = String::new();
            let mut seq = Vec::<u8>::new();
            let mut seen_header = false;
            for (i, line) in reader.lines().enumerate() {
                let s = match line {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = tx.send(Err(Error::from(e)));
                        return;
                    }
                };
                if s.is_empty() {
                    continue;
                }
                if let Some(h) = s.strip_prefix('>') {
                    if seen_header {
                        let rec = FastaRecord {
                            name: std::mem::replace(&mut name, String::new()),
                            seq: std::mem::replace(&mut seq, Vec::new()),
                        };
                        if tx.send(Ok(rec)).is_err() {
                            return; // consumer gone
                        }
                    }
                    seen_header = true;
                    name = h.split_whitespace().next().unwrap_or("").to_string();
                } else {
                    if !seen_header {
                        let _ = tx.send(Err(Error::invalid_input(
                            &file,
                            i + 1,
                            "fasta format failure: body before first header",
                        )));
                        return;
                    }
                    seq.extend(s.bytes().map(|c| c.to_ascii_lowercase()));
                }
            }
            if seen_header {
                let _ = tx.send(Ok(FastaRecord { name, seq }));
            } else {
                let _ = tx.send(Err(Error::invalid_input(
                    &file,
                    0,
                    "fasta format failure: no records",
                )));
            }
        });
        Ok(FastaReader { rx, done: false })
    }
}

impl Iterator for FastaReader {
    type Item = Result<FastaRecord>;

    fn next(&mut self) -> Option<Result<FastaRecord>> {
        if self.done {
            return None;
        }
        match self.rx.recv() {
            Ok(Ok(rec)) => Some(Ok(rec)),
            Ok(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}
