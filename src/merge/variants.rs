//! Variant-level table built by stacking per-sample MAF files.

use std::path::Path;

use tracing::{info, warn};

use super::{MergeSummary, Table, file_name, write_tsv};
use crate::error::GdcError;
use crate::outdir::walk_files;
use crate::sample_sheet::SampleSheet;

pub const DEFAULT_MAF_COLUMNS: [&str; 21] = [
    "Hugo_Symbol",
    "Chromosome",
    "Start_Position",
    "End_Position",
    "Strand",
    "Variant_Classification",
    "Variant_Type",
    "Reference_Allele",
    "Tumor_Seq_Allele1",
    "Tumor_Seq_Allele2",
    "Tumor_Sample_Barcode",
    "Matched_Norm_Sample_Barcode",
    "t_depth",
    "t_ref_count",
    "t_alt_count",
    "n_depth",
    "n_ref_count",
    "n_alt_count",
    "Consequence",
    "IMPACT",
    "callers",
];

pub const FILE_ID_COLUMN: &str = "File_ID";
pub const VAF_COLUMN: &str = "VAF";

#[derive(Debug, Clone, Default)]
pub struct VariantOptions {
    /// Columns to retain; `None` means [`DEFAULT_MAF_COLUMNS`].
    pub columns: Option<Vec<String>>,
    /// Append `VAF = t_alt_count / t_depth`.
    pub calculate_vaf: bool,
}

fn is_maf(name: &str) -> bool {
    name.ends_with(".maf") || name.ends_with(".maf.gz")
}

pub fn merge_variants(
    sheet: &SampleSheet,
    input_dir: &Path,
    output_path: &Path,
    options: &VariantOptions,
) -> Result<MergeSummary, GdcError> {
    let file_ids = sheet.file_name_to_id()?;
    let retained: Vec<String> = match &options.columns {
        Some(columns) if !columns.is_empty() => columns.clone(),
        _ => DEFAULT_MAF_COLUMNS.iter().map(|c| c.to_string()).collect(),
    };

    let mut header = retained.clone();
    header.push(FILE_ID_COLUMN.to_string());
    if options.calculate_vaf {
        header.push(VAF_COLUMN.to_string());
    }

    let mut rows = Vec::new();
    let mut processed = 0usize;
    let mut skipped = 0usize;

    info!(input = %input_dir.display(), "merging MAF files");
    for path in walk_files(input_dir)? {
        let Some(name) = file_name(&path) else {
            continue;
        };
        if !is_maf(name) {
            continue;
        }
        let Some(file_id) = file_ids.get(name) else {
            warn!(file = name, "file name not found in sample sheet, skipping");
            skipped += 1;
            continue;
        };

        let table = match Table::read(&path) {
            Ok(table) => table,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "failed to read file, skipping");
                skipped += 1;
                continue;
            }
        };

        let indices: Vec<Option<usize>> =
            retained.iter().map(|column| table.column_index(column)).collect();
        let missing: Vec<&str> = retained
            .iter()
            .zip(&indices)
            .filter(|(_, index)| index.is_none())
            .map(|(column, _)| column.as_str())
            .collect();
        if !missing.is_empty() {
            warn!(
                file = %path.display(),
                missing = %missing.join(", "),
                "MAF columns missing, skipping"
            );
            skipped += 1;
            continue;
        }
        let indices: Vec<usize> = indices.into_iter().flatten().collect();
        let depth_index = table.column_index("t_depth");
        let alt_index = table.column_index("t_alt_count");

        for row in &table.rows {
            let mut out: Vec<String> = indices.iter().map(|index| row[*index].clone()).collect();
            out.push(file_id.clone());
            if options.calculate_vaf {
                let vaf = match (alt_index, depth_index) {
                    (Some(alt), Some(depth)) => variant_allele_frequency(&row[alt], &row[depth]),
                    _ => None,
                };
                out.push(vaf.map(|value| value.to_string()).unwrap_or_default());
            }
            rows.push(out);
        }
        info!(file = %path.display(), variants = table.rows.len(), "processed MAF file");
        processed += 1;
    }

    if processed == 0 {
        warn!("no MAF files were combined; check that extracted files are present");
        return Ok(MergeSummary {
            files_processed: 0,
            files_skipped: skipped,
            rows: 0,
            columns: 0,
            output: None,
        });
    }

    write_tsv(output_path, &header, &rows)?;
    info!(
        output = %output_path.display(),
        files = processed,
        rows = rows.len(),
        "combined MAF data saved"
    );
    Ok(MergeSummary {
        files_processed: processed,
        files_skipped: skipped,
        rows: rows.len(),
        columns: header.len(),
        output: Some(output_path.display().to_string()),
    })
}

/// `t_alt_count / t_depth` rounded to 4 decimals; `None` for zero or unparsable depth.
pub fn variant_allele_frequency(alt_count: &str, depth: &str) -> Option<f64> {
    let alt: f64 = alt_count.trim().parse().ok()?;
    let depth: f64 = depth.trim().parse().ok()?;
    if depth.is_nan() || depth <= 0.0 || !alt.is_finite() {
        return None;
    }
    Some((alt / depth * 10_000.0).round() / 10_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vaf_rounds_to_four_places() {
        assert_eq!(variant_allele_frequency("1", "3"), Some(0.3333));
        assert_eq!(variant_allele_frequency("12", "48"), Some(0.25));
        assert_eq!(variant_allele_frequency("5", "0"), None);
        assert_eq!(variant_allele_frequency("", "10"), None);
        assert_eq!(variant_allele_frequency("3", "."), None);
    }

    #[test]
    fn maf_names() {
        assert!(is_maf("a.wxs.aliquot_ensemble_masked.maf.gz"));
        assert!(is_maf("a.maf"));
        assert!(!is_maf("a.maf.gz.parcel"));
    }
}
