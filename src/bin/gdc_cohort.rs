use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use gdc_cohort::app::{App, BatchStatus, DownloadReport};
use gdc_cohort::config::{ConfigLoader, ConfigOverrides};
use gdc_cohort::error::GdcError;
use gdc_cohort::gdc::GdcHttpClient;
use gdc_cohort::merge::MergeSummary;
use gdc_cohort::merge::expression::{ExpressionOptions, merge_expression};
use gdc_cohort::merge::variants::{VariantOptions, merge_variants};
use gdc_cohort::outdir::OutputDir;
use gdc_cohort::output::{JsonOutput, TracingSink};
use gdc_cohort::sample_sheet::SampleSheet;

#[derive(Parser)]
#[command(name = "gdc-cohort")]
#[command(about = "Download GDC files listed in a sample sheet and merge them into cohort tables")]
#[command(version)]
struct Cli {
    /// Also write log lines to this file (appended).
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Validate, download and extract every file in a sample sheet")]
    Download(DownloadArgs),
    #[command(about = "Merge extracted expression tables on gene_id and gene_name")]
    MergeExpression(MergeExpressionArgs),
    #[command(about = "Stack extracted MAF files into one variant table")]
    MergeVariants(MergeVariantsArgs),
}

#[derive(Args)]
struct DownloadArgs {
    /// Sample sheet TSV downloaded from the GDC portal.
    #[arg(long)]
    sample_sheet: PathBuf,

    #[arg(long, default_value = "outputs")]
    output_directory: PathBuf,

    /// JSON config file (defaults to ./gdc-cohort.json when present).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Buffer each bundle in memory instead of streaming it in chunks.
    #[arg(long)]
    no_stream: bool,

    #[arg(long)]
    api_url: Option<String>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct MergeExpressionArgs {
    #[arg(long)]
    sample_sheet: PathBuf,

    /// Directory holding the extracted files.
    #[arg(long, default_value = "outputs")]
    file_directory: PathBuf,

    #[arg(long, default_value = ".")]
    output_directory: PathBuf,

    #[arg(long, default_value = "combined_data.tsv")]
    output_file: String,

    /// Expression columns to keep (default: all).
    #[arg(long, num_args = 1..)]
    expression_columns: Option<Vec<String>>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct MergeVariantsArgs {
    #[arg(long)]
    sample_sheet: PathBuf,

    #[arg(long, default_value = "outputs")]
    file_directory: PathBuf,

    #[arg(long, default_value = ".")]
    output_directory: PathBuf,

    #[arg(long, default_value = "combined_maf.tsv")]
    output_file: String,

    /// MAF columns to keep (default: the standard 21-column selection).
    #[arg(long, num_args = 1..)]
    retain_columns: Option<Vec<String>>,

    /// Add a VAF column (t_alt_count / t_depth).
    #[arg(long)]
    calculate_vaf: bool,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<GdcError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GdcError) -> u8 {
    match error {
        GdcError::EmptyFileIdList
        | GdcError::NoValidFileIds { .. }
        | GdcError::InvalidFileId(_)
        | GdcError::SampleSheet(_)
        | GdcError::MissingColumns(_)
        | GdcError::ConfigRead(_)
        | GdcError::ConfigParse(_)
        | GdcError::InvalidConfig(_) => 2,
        GdcError::CatalogHttp(_) | GdcError::CatalogStatus { .. } | GdcError::HttpClient(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Download(args) => run_download(args),
        Commands::MergeExpression(args) => run_merge_expression(args),
        Commands::MergeVariants(args) => run_merge_variants(args),
    }
}

fn init_logging(log_file: Option<&Path>) -> miette::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn run_download(args: DownloadArgs) -> miette::Result<()> {
    info!(path = %args.sample_sheet.display(), "reading sample sheet");
    let sheet = SampleSheet::read(&args.sample_sheet)?;
    let ids = sheet.file_ids()?;
    info!(file_ids = ids.len(), "file ids in sample sheet");

    let config = ConfigLoader::resolve(args.config.as_deref())?.apply(ConfigOverrides {
        api_base_url: args.api_url,
        batch_size: args.batch_size,
        no_stream: args.no_stream,
    })?;
    let client = GdcHttpClient::new(
        &config.api_base_url,
        config.transport.clone(),
        config.validation_timeout,
        config.request_timeout,
    )?;
    let output = OutputDir::from_path(&args.output_directory)?;
    let app = App::new(client.clone(), client, config);

    let report = app.download(&ids, &output, &TracingSink)?;
    if args.json {
        JsonOutput::print_download(&report).into_diagnostic()?;
    } else {
        print_download_summary(&report);
    }
    Ok(())
}

fn run_merge_expression(args: MergeExpressionArgs) -> miette::Result<()> {
    let sheet = SampleSheet::read(&args.sample_sheet)?;
    let output_path = args.output_directory.join(&args.output_file);
    let options = ExpressionOptions {
        columns: args.expression_columns,
    };
    let summary = merge_expression(&sheet, &args.file_directory, &output_path, &options)?;
    print_merge(&summary, args.json)
}

fn run_merge_variants(args: MergeVariantsArgs) -> miette::Result<()> {
    let sheet = SampleSheet::read(&args.sample_sheet)?;
    let output_path = args.output_directory.join(&args.output_file);
    let options = VariantOptions {
        columns: args.retain_columns,
        calculate_vaf: args.calculate_vaf,
    };
    let summary = merge_variants(&sheet, &args.file_directory, &output_path, &options)?;
    print_merge(&summary, args.json)
}

fn print_merge(summary: &MergeSummary, json: bool) -> miette::Result<()> {
    if json {
        return JsonOutput::print_merge(summary).into_diagnostic();
    }
    match &summary.output {
        Some(path) => println!(
            "merged {} files ({} skipped) into {path}: {} rows x {} columns",
            summary.files_processed, summary.files_skipped, summary.rows, summary.columns
        ),
        None => println!(
            "nothing merged ({} files skipped)",
            summary.files_skipped
        ),
    }
    Ok(())
}

fn print_download_summary(report: &DownloadReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}GDC download summary{reset}");
    println!(
        "{green}valid file ids: {}/{}{reset}",
        report.valid, report.requested
    );
    if !report.invalid.is_empty() {
        println!("{yellow}skipped invalid ids: {}{reset}", report.invalid.len());
    }

    for batch in &report.batches {
        let (label, color) = match batch.status {
            BatchStatus::Extracted => ("extracted", green),
            BatchStatus::Saved => ("saved", green),
            BatchStatus::ExtractionFailed => ("extraction failed", red),
            BatchStatus::Failed => ("failed", red),
        };
        println!(
            "{color}batch {} ({} ids, {} attempt(s)): {label}{reset}",
            batch.ordinal, batch.size, batch.attempts
        );
        if let Some(archive) = &batch.archive {
            println!("{color}   archive: {archive}{reset}");
        }
        if !batch.missing_ids.is_empty() {
            println!(
                "{yellow}   missing from bundle: {}{reset}",
                batch.missing_ids.join(", ")
            );
        }
        if let Some(error) = &batch.error {
            println!("{color}   error: {error}{reset}");
        }
    }

    let failed = report.failed_batches().count();
    if failed == 0 {
        println!("{green}all {} batches completed{reset}", report.batches.len());
    } else {
        println!(
            "{yellow}{failed} of {} batches need attention{reset}",
            report.batches.len()
        );
    }
    println!("{cyan}output directory: {}{reset}", report.output_directory);
}
