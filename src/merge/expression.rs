//! Gene-keyed expression matrix from per-sample STAR count tables.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use tracing::{info, warn};

use super::{MergeSummary, Table, file_name, write_tsv};
use crate::error::GdcError;
use crate::outdir::walk_files;
use crate::sample_sheet::SampleSheet;

pub const GENE_ID: &str = "gene_id";
pub const GENE_NAME: &str = "gene_name";

#[derive(Debug, Clone, Default)]
pub struct ExpressionOptions {
    /// Columns to keep from each file; `None` keeps every expression column.
    pub columns: Option<Vec<String>>,
}

type GeneKey = (String, String);

struct SampleColumns {
    names: Vec<String>,
    rows: Vec<(GeneKey, Vec<String>)>,
}

/// Outer join of every sample on (`gene_id`, `gene_name`), keys sorted.
#[derive(Default)]
struct ExpressionMatrix {
    columns: Vec<String>,
    taken: HashSet<String>,
    rows: BTreeMap<GeneKey, HashMap<usize, String>>,
}

impl ExpressionMatrix {
    fn add(&mut self, sample: SampleColumns) {
        let indices: Vec<usize> = sample
            .names
            .into_iter()
            .map(|name| {
                let name = self.unique_name(name);
                self.taken.insert(name.clone());
                self.columns.push(name);
                self.columns.len() - 1
            })
            .collect();
        for (key, values) in sample.rows {
            let row = self.rows.entry(key).or_default();
            for (index, value) in indices.iter().zip(values) {
                row.insert(*index, value);
            }
        }
    }

    fn unique_name(&self, base: String) -> String {
        if !self.taken.contains(&base) {
            return base;
        }
        let mut suffix = 1usize;
        loop {
            let candidate = format!("{base}_{suffix}");
            if !self.taken.contains(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    fn into_table(self) -> (Vec<String>, Vec<Vec<String>>) {
        let mut header = vec![GENE_ID.to_string(), GENE_NAME.to_string()];
        header.extend(self.columns.iter().cloned());
        let width = self.columns.len();
        let rows = self
            .rows
            .into_iter()
            .map(|((gene_id, gene_name), mut values)| {
                let mut row = Vec::with_capacity(width + 2);
                row.push(gene_id);
                row.push(gene_name);
                row.extend((0..width).map(|index| values.remove(&index).unwrap_or_default()));
                row
            })
            .collect();
        (header, rows)
    }
}

pub fn merge_expression(
    sheet: &SampleSheet,
    input_dir: &Path,
    output_path: &Path,
    options: &ExpressionOptions,
) -> Result<MergeSummary, GdcError> {
    let labels = sheet.sample_labels()?;
    let mut matrix = ExpressionMatrix::default();
    let mut processed = 0usize;
    let mut skipped = 0usize;

    info!(input = %input_dir.display(), "merging expression tables");
    for path in walk_files(input_dir)? {
        let Some(name) = file_name(&path) else {
            continue;
        };
        if !name.ends_with(".tsv") || path == output_path {
            continue;
        }
        let Some(label) = labels.get(name) else {
            warn!(file = name, "file name not found in sample sheet, skipping");
            skipped += 1;
            continue;
        };

        match load_sample(&path, label, options) {
            Ok(Some(sample)) => {
                info!(file = %path.display(), "processed expression table");
                matrix.add(sample);
                processed += 1;
            }
            Ok(None) => skipped += 1,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "failed to read file, skipping");
                skipped += 1;
            }
        }
    }

    if processed == 0 {
        warn!("no expression data was combined; check that extracted files are present");
        return Ok(MergeSummary {
            files_processed: 0,
            files_skipped: skipped,
            rows: 0,
            columns: 0,
            output: None,
        });
    }

    let (header, rows) = matrix.into_table();
    write_tsv(output_path, &header, &rows)?;
    info!(output = %output_path.display(), files = processed, "combined expression data saved");
    Ok(MergeSummary {
        files_processed: processed,
        files_skipped: skipped,
        rows: rows.len(),
        columns: header.len(),
        output: Some(output_path.display().to_string()),
    })
}

fn load_sample(
    path: &Path,
    label: &str,
    options: &ExpressionOptions,
) -> Result<Option<SampleColumns>, GdcError> {
    let table = Table::read(path)?;
    let (Some(id_index), Some(name_index)) =
        (table.column_index(GENE_ID), table.column_index(GENE_NAME))
    else {
        warn!(file = %path.display(), "gene_id or gene_name column not found, skipping");
        return Ok(None);
    };

    let selected: Vec<(usize, &String)> = match &options.columns {
        Some(requested) => {
            let missing: Vec<&str> = requested
                .iter()
                .filter(|column| table.column_index(column).is_none())
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                warn!(
                    file = %path.display(),
                    missing = %missing.join(", "),
                    "expression columns missing"
                );
            }
            requested
                .iter()
                .filter_map(|column| table.column_index(column).map(|index| (index, column)))
                .collect()
        }
        None => table
            .header
            .iter()
            .enumerate()
            .filter(|(_, column)| {
                column.as_str() != GENE_ID
                    && column.as_str() != GENE_NAME
                    && !column.starts_with("__")
            })
            .collect(),
    };
    if selected.is_empty() {
        warn!(file = %path.display(), "no expression columns found, skipping");
        return Ok(None);
    }

    let names = selected
        .iter()
        .map(|(_, column)| format!("{column}_{label}"))
        .collect();
    let rows = table
        .rows
        .iter()
        .filter(|row| !row[id_index].starts_with("N_") && !row[name_index].is_empty())
        .map(|row| {
            let key = (row[id_index].clone(), row[name_index].clone());
            let values = selected.iter().map(|(index, _)| row[*index].clone()).collect();
            (key, values)
        })
        .collect();
    Ok(Some(SampleColumns { names, rows }))
}
