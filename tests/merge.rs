use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

use gdc_cohort::merge::expression::{ExpressionOptions, merge_expression};
use gdc_cohort::merge::variants::{VariantOptions, merge_variants};
use gdc_cohort::sample_sheet::SampleSheet;

const SHEET: &str = "\
    File ID\tFile Name\tData Category\tData Type\t\
    Project ID\tCase ID\tSample ID\tSample Type\n\
    id1\ts1.rna_seq.augmented_star_gene_counts.tsv\t\
    Transcriptome Profiling\tGene Expression Quantification\t\
    TCGA-BRCA\tTCGA-A1\tTCGA-A1-01A\tPrimary Tumor\n\
    id2\ts2.rna_seq.augmented_star_gene_counts.tsv\t\
    Transcriptome Profiling\tGene Expression Quantification\t\
    TCGA-BRCA\tTCGA-A2\tTCGA-A2-01A\tPrimary Tumor\n\
    id3\ts3.wxs.aliquot_ensemble_masked.maf.gz\t\
    Simple Nucleotide Variation\tMasked Somatic Mutation\t\
    TCGA-BRCA\tTCGA-A1\tTCGA-A1-01A\tPrimary Tumor\n";

const STAR_HEADER: &str =
    "gene_id\tgene_name\tgene_type\tunstranded\ttpm_unstranded\n";

fn write_file(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn gzip(content: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn expression_tables_are_joined_on_gene() {
    let temp = tempfile::tempdir().unwrap();
    let files = temp.path().join("outputs");
    write_file(
        &files,
        "id1/s1.rna_seq.augmented_star_gene_counts.tsv",
        format!(
            "# gene-model: GENCODE v36\n{STAR_HEADER}\
             N_unmapped\t\t\t12\t\n\
             ENSG2\tKRAS\tprotein_coding\t7\t1.5\n\
             ENSG1\tTP53\tprotein_coding\t3\t0.5\n"
        )
        .as_bytes(),
    );
    write_file(
        &files,
        "id2/s2.rna_seq.augmented_star_gene_counts.tsv",
        format!(
            "{STAR_HEADER}ENSG1\tTP53\tprotein_coding\t9\t2.5\n\
             ENSG3\tEGFR\tprotein_coding\t1\t0.1\n"
        )
        .as_bytes(),
    );
    write_file(&files, "id9/unlisted.tsv", STAR_HEADER.as_bytes());
    let sheet = SampleSheet::parse(SHEET).unwrap();
    let output = temp.path().join("out").join("combined_data.tsv");

    let summary = merge_expression(
        &sheet,
        &files,
        &output,
        &ExpressionOptions {
            columns: Some(vec!["tpm_unstranded".to_string()]),
        },
    )
    .unwrap();

    assert_eq!(summary.files_processed, 2);
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.columns, 4);
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "gene_id\tgene_name\t\
         tpm_unstranded_TCGA-BRCA_TCGA-A1_TCGA-A1-01A_id1\t\
         tpm_unstranded_TCGA-BRCA_TCGA-A2_TCGA-A2-01A_id2\n\
         ENSG1\tTP53\t0.5\t2.5\n\
         ENSG2\tKRAS\t1.5\t\n\
         ENSG3\tEGFR\t\t0.1\n"
    );
}

#[test]
fn expression_merge_without_inputs_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let files = temp.path().join("outputs");
    fs::create_dir_all(&files).unwrap();
    let sheet = SampleSheet::parse(SHEET).unwrap();
    let output = temp.path().join("combined_data.tsv");

    let summary =
        merge_expression(&sheet, &files, &output, &ExpressionOptions::default()).unwrap();

    assert_eq!(summary.files_processed, 0);
    assert_eq!(summary.output, None);
    assert!(!output.exists());
}

#[test]
fn variants_are_stacked_with_file_id_and_vaf() {
    let temp = tempfile::tempdir().unwrap();
    let files = temp.path().join("outputs");
    write_file(
        &files,
        "id3/s3.wxs.aliquot_ensemble_masked.maf.gz",
        &gzip(
            "#version gdc-1.0.0\n\
             Hugo_Symbol\tChromosome\tt_depth\tt_alt_count\n\
             KRAS\tchr12\t40\t10\n\
             TP53\tchr17\t0\t0\n",
        ),
    );
    let sheet = SampleSheet::parse(SHEET).unwrap();
    let output = temp.path().join("combined_maf.tsv");

    let summary = merge_variants(
        &sheet,
        &files,
        &output,
        &VariantOptions {
            columns: Some(vec!["Hugo_Symbol".to_string(), "t_depth".to_string()]),
            calculate_vaf: true,
        },
    )
    .unwrap();

    assert_eq!(summary.files_processed, 1);
    assert_eq!(summary.rows, 2);
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        "Hugo_Symbol\tt_depth\tFile_ID\tVAF\nKRAS\t40\tid3\t0.25\nTP53\t0\tid3\t\n"
    );
}

#[test]
fn maf_missing_default_columns_is_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let files = temp.path().join("outputs");
    write_file(
        &files,
        "id3/s3.wxs.aliquot_ensemble_masked.maf.gz",
        &gzip("Hugo_Symbol\tChromosome\nKRAS\tchr12\n"),
    );
    let sheet = SampleSheet::parse(SHEET).unwrap();
    let output = temp.path().join("combined_maf.tsv");

    let summary = merge_variants(&sheet, &files, &output, &VariantOptions::default()).unwrap();

    assert_eq!(summary.files_processed, 0);
    assert_eq!(summary.files_skipped, 1);
    assert!(!output.exists());
}
