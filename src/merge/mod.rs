//! Cohort tables built from the files a download run extracted.

pub mod expression;
pub mod variants;

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::Serialize;

use crate::error::GdcError;

/// Outcome of one merge. `output` is `None` when no input file was usable and nothing was
/// written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub rows: usize,
    pub columns: usize,
    pub output: Option<String>,
}

/// A tab-separated file held in memory. Lines starting with `#` before or between records
/// are ignored; the first other line is the header.
#[derive(Debug, Clone)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Reads `path`, decompressing on the fly when it ends in `.gz`.
    pub fn read(path: &Path) -> Result<Self, GdcError> {
        let file = File::open(path)
            .map_err(|err| GdcError::Merge(format!("open {}: {err}", path.display())))?;
        let is_gz = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);
        let reader: Box<dyn Read> = if is_gz {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut header: Option<Vec<String>> = None;
        let mut rows = Vec::new();
        for line in BufReader::new(reader).lines() {
            let line =
                line.map_err(|err| GdcError::Merge(format!("read {}: {err}", path.display())))?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let cells = line.split('\t').map(|cell| cell.to_string());
            match &header {
                None => header = Some(cells.collect()),
                Some(columns) => {
                    let mut row: Vec<String> = cells.collect();
                    row.resize(columns.len(), String::new());
                    rows.push(row);
                }
            }
        }

        let header = header
            .ok_or_else(|| GdcError::Merge(format!("{} has no header row", path.display())))?;
        Ok(Self { header, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|column| column == name)
    }
}

/// Writes a TSV file atomically (temporary file in the same directory, then rename).
pub fn write_tsv(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<(), GdcError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| GdcError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".gdc-merge")
        .tempfile_in(parent)
        .map_err(|err| GdcError::Filesystem(err.to_string()))?;

    {
        let mut writer = BufWriter::new(temp.as_file());
        let write_err = |err: std::io::Error| GdcError::Filesystem(err.to_string());
        writeln!(writer, "{}", header.join("\t")).map_err(write_err)?;
        for row in rows {
            writeln!(writer, "{}", row.join("\t")).map_err(write_err)?;
        }
        writer.flush().map_err(write_err)?;
    }

    temp.persist(path)
        .map_err(|err| GdcError::Filesystem(err.to_string()))?;
    Ok(())
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}
