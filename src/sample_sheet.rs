use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use tracing::warn;

use crate::domain::{FileId, dedup_file_ids};
use crate::error::GdcError;

pub const FILE_ID: &str = "File ID";
pub const FILE_NAME: &str = "File Name";
pub const PROJECT_ID: &str = "Project ID";
pub const CASE_ID: &str = "Case ID";
pub const SAMPLE_ID: &str = "Sample ID";

/// A GDC portal sample sheet: tab-separated, one header row.
#[derive(Debug, Clone)]
pub struct SampleSheet {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SampleSheet {
    pub fn read(path: &Path) -> Result<Self, GdcError> {
        let content = fs::read_to_string(path)
            .map_err(|err| GdcError::SampleSheet(format!("{}: {err}", path.display())))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, GdcError> {
        let mut lines = content
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| GdcError::SampleSheet("sample sheet is empty".to_string()))?;
        let columns: Vec<String> = header
            .trim_start_matches('\u{feff}')
            .split('\t')
            .map(|column| column.trim().to_string())
            .collect();

        let rows = lines
            .map(|line| {
                let mut cells: Vec<String> =
                    line.split('\t').map(|cell| cell.trim().to_string()).collect();
                cells.resize(columns.len(), String::new());
                cells
            })
            .collect();
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn require_columns(&self, required: &[&str]) -> Result<(), GdcError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|name| self.column_index(name).is_none())
            .map(|name| name.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GdcError::MissingColumns(missing))
        }
    }

    /// Non-blank `File ID` cells, first occurrence order, duplicates removed. Cells are not
    /// checked further; the catalog lookup sorts out ids that do not exist.
    pub fn file_ids(&self) -> Result<Vec<FileId>, GdcError> {
        let ids = self
            .column(FILE_ID)?
            .filter_map(|value| value.parse::<FileId>().ok());
        Ok(dedup_file_ids(ids))
    }

    /// `File Name` to `File ID`.
    pub fn file_name_to_id(&self) -> Result<HashMap<String, String>, GdcError> {
        self.require_columns(&[FILE_ID, FILE_NAME])?;
        self.warn_duplicate_file_names();
        Ok(self.pairs(FILE_NAME, |row| self.cell(row, FILE_ID).to_string()))
    }

    /// `File Name` to `{Project ID}_{Case ID}_{Sample ID}_{File ID}`, the per-sample label
    /// used for merged column names.
    pub fn sample_labels(&self) -> Result<HashMap<String, String>, GdcError> {
        self.require_columns(&[FILE_ID, FILE_NAME, PROJECT_ID, CASE_ID, SAMPLE_ID])?;
        self.warn_duplicate_file_names();
        Ok(self.pairs(FILE_NAME, |row| {
            format!(
                "{}_{}_{}_{}",
                self.cell(row, PROJECT_ID),
                self.cell(row, CASE_ID),
                self.cell(row, SAMPLE_ID),
                self.cell(row, FILE_ID)
            )
        }))
    }

    fn pairs<F>(&self, key_column: &str, value: F) -> HashMap<String, String>
    where
        F: Fn(&[String]) -> String,
    {
        self.rows
            .iter()
            .filter(|row| !self.cell(row, key_column).is_empty())
            .map(|row| (self.cell(row, key_column).to_string(), value(row)))
            .collect()
    }

    fn warn_duplicate_file_names(&self) {
        let mut seen = HashSet::new();
        let duplicates: Vec<&str> = self
            .rows
            .iter()
            .map(|row| self.cell(row, FILE_NAME))
            .filter(|name| !name.is_empty() && !seen.insert(*name))
            .collect();
        if !duplicates.is_empty() {
            warn!(
                duplicates = %duplicates.join(", "),
                "duplicate file names in sample sheet; the last row wins"
            );
        }
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    fn column(&self, name: &str) -> Result<impl Iterator<Item = &str>, GdcError> {
        let index = self
            .column_index(name)
            .ok_or_else(|| GdcError::MissingColumns(vec![name.to_string()]))?;
        Ok(self.rows.iter().map(move |row| row[index].as_str()))
    }

    fn cell<'a>(&self, row: &'a [String], name: &str) -> &'a str {
        self.column_index(name)
            .and_then(|index| row.get(index))
            .map(String::as_str)
            .unwrap_or("")
    }
}
