// Copyright (c) 2021 10x Genomics, Inc. All rights reserved.

// Samples CSV: header Index,SampleID,CaseControl,TrainingValidation with any
// further columns parsed as float PCA covariates.  Rows must appear in index
// order; that order is the row order of every output matrix.

use io_utils::{fwrite, fwriteln, open_for_write_new};
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;
use tile_types::{Error, Result, SampleInfo};

pub fn read_samples_csv<R: BufRead>(reader: R, file: &str) -> Result<Vec<SampleInfo>> {
    let mut samples = Vec::<SampleInfo>::new();
    let mut lines = reader.lines().enumerate();
    let header = match lines.next() {
        Some((_, line)) => line?,
        None => return Err(Error::invalid_input(file, 0, "empty samples file")),
    };
    let hfields: Vec<&str> = header.split(',').collect();
    if hfields.len() < 4
        || hfields[0] != "Index"
        || hfields[1] != "SampleID"
        || hfields[2] != "CaseControl"
        || hfields[3] != "TrainingValidation"
    {
        return Err(Error::invalid_input(
            file,
            1,
            "header must start with Index,SampleID,CaseControl,TrainingValidation",
        ));
    }
    for (i, line) in lines {
        let s = line?;
        if s.is_empty() {
            continue;
        }
        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() < 4 {
            return Err(Error::invalid_input(file, i + 1, "expected at least 4 fields"));
        }
        let index = fields[0]
            .parse::<usize>()
            .map_err(|_| Error::invalid_input(file, i + 1, format!("bad index \"{}\"", fields[0])))?;
        if index != samples.len() {
            return Err(Error::invalid_input(
                file,
                i + 1,
                format!("index {} out of order (expected {})", index, samples.len()),
            ));
        }
        let is_case = match fields[2] {
            "" => None,
            "0" => Some(false),
            "1" => Some(true),
            other => {
                return Err(Error::invalid_input(
                    file,
                    i + 1,
                    format!("CaseControl must be 0, 1 or blank, not \"{}\"", other),
                ));
            }
        };
        let is_training = match fields[3] {
            "0" => false,
            "1" => true,
            other => {
                return Err(Error::invalid_input(
                    file,
                    i + 1,
                    format!("TrainingValidation must be 0 or 1, not \"{}\"", other),
                ));
            }
        };
        let mut pca = Vec::<f64>::new();
        for f in &fields[4..] {
            let v = f.parse::<f64>().map_err(|_| {
                Error::invalid_input(file, i + 1, format!("bad PCA component \"{}\"", f))
            })?;
            pca.push(v);
        }
        samples.push(SampleInfo {
            id: fields[1].to_string(),
            is_case,
            is_training,
            pca,
        });
    }
    Ok(samples)
}

pub fn read_samples_file<P: AsRef<Path>>(path: P) -> Result<Vec<SampleInfo>> {
    let f = std::io::BufReader::new(File::open(path.as_ref())?);
    read_samples_csv(f, &path.as_ref().display().to_string())
}

/// Echo the sample metadata (with covariates) next to the matrices.
pub fn write_samples_csv(samples: &[SampleInfo], path: &Path) -> Result<()> {
    let npca = samples.iter().map(|s| s.pca.len()).max().unwrap_or(0);
    let mut f = open_for_write_new![&path.display().to_string()];
    fwrite!(f, "Index,SampleID,CaseControl,TrainingValidation");
    for j in 0..npca {
        fwrite!(f, ",PCA{}", j);
    }
    fwriteln!(f, "");
    for (i, s) in samples.iter().enumerate() {
        let cc = match s.is_case {
            None => "",
            Some(false) => "0",
            Some(true) => "1",
        };
        fwrite!(f, "{},{},{},{}", i, s.id, cc, s.is_training as u8);
        for j in 0..npca {
            fwrite!(f, ",{}", s.pca.get(j).copied().unwrap_or(0.0));
        }
        fwriteln!(f, "");
    }
    Ok(())
}
