use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::Utc;
use serde::Serialize;

use crate::archive::{ExtractionOutcome, extract_archive};
use crate::config::DownloadConfig;
use crate::domain::{Batch, FileId};
use crate::error::GdcError;
use crate::fetcher::{BatchFetcher, FetchOutcome};
use crate::gdc::{CatalogClient, DataClient};
use crate::outdir::OutputDir;
use crate::planner::plan_batches;
use crate::validate::validate_file_ids;

/// Everything the download pipeline reports while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    ValidationStarted {
        requested: usize,
        duplicates: usize,
    },
    ValidationFinished {
        valid: usize,
        invalid: Vec<FileId>,
    },
    OutputReady {
        path: Utf8PathBuf,
        created: bool,
    },
    BatchesPlanned {
        batches: usize,
        batch_size: usize,
    },
    BatchStarted {
        ordinal: usize,
        total: usize,
        size: usize,
    },
    AttemptFailed {
        ordinal: usize,
        attempt: u32,
        reason: String,
    },
    RetryScheduled {
        ordinal: usize,
        attempt: u32,
        of: u32,
        delay: Duration,
    },
    ArchiveSaved {
        ordinal: usize,
        path: Utf8PathBuf,
        bytes: u64,
    },
    BatchFailed {
        ordinal: usize,
        attempts: u32,
        reason: String,
    },
    Extracted {
        ordinal: usize,
        archive: Utf8PathBuf,
        members: usize,
    },
    ExtractionSkipped {
        ordinal: usize,
        path: Utf8PathBuf,
    },
    ExtractionFailed {
        ordinal: usize,
        archive: PathBuf,
        reason: String,
    },
    MissingFromBundle {
        ordinal: usize,
        ids: Vec<FileId>,
    },
    Finished {
        batches: usize,
        failed: usize,
    },
}

pub trait ProgressSink {
    fn event(&self, event: RunEvent);
}

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: RunEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Bundle retrieved, unpacked and removed.
    Extracted,
    /// Retrieved file was not an archive and stays as delivered.
    Saved,
    /// Retrieved, but unpacking failed; the archive is kept.
    ExtractionFailed,
    /// Every attempt failed.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub ordinal: usize,
    pub size: usize,
    pub attempts: u32,
    pub status: BatchStatus,
    pub archive: Option<String>,
    pub members: usize,
    pub missing_ids: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub output_directory: String,
    pub requested: usize,
    pub valid: usize,
    pub invalid: Vec<String>,
    pub batches: Vec<BatchReport>,
    pub started_at: String,
    pub finished_at: String,
}

impl DownloadReport {
    pub fn failed_batches(&self) -> impl Iterator<Item = &BatchReport> {
        self.batches
            .iter()
            .filter(|batch| {
                matches!(
                    batch.status,
                    BatchStatus::Failed | BatchStatus::ExtractionFailed
                )
            })
    }

    pub fn is_complete(&self) -> bool {
        self.failed_batches().next().is_none()
    }
}

pub struct App<C: CatalogClient, D: DataClient> {
    catalog: C,
    data: D,
    config: DownloadConfig,
}

impl<C: CatalogClient, D: DataClient> App<C, D> {
    pub fn new(catalog: C, data: D, config: DownloadConfig) -> Self {
        Self {
            catalog,
            data,
            config,
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Validates `ids`, then fetches and extracts one batch at a time, in order.
    ///
    /// Returns `Err` for conditions that stop the run: bad input, an unreachable catalog,
    /// no valid ids, or an output directory that cannot be written. Batch and extraction
    /// failures are recorded in the report.
    pub fn download(
        &self,
        ids: &[FileId],
        output: &OutputDir,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadReport, GdcError> {
        let started_at = Utc::now();
        let validation = validate_file_ids(&self.catalog, ids, sink)?;

        let created = output.ensure()?;
        sink.event(RunEvent::OutputReady {
            path: output.root().to_owned(),
            created,
        });

        let batches = plan_batches(&validation.valid, self.config.batch_size);
        sink.event(RunEvent::BatchesPlanned {
            batches: batches.len(),
            batch_size: self.config.batch_size.get(),
        });

        let fetcher = BatchFetcher::new(
            &self.data,
            output,
            self.config.write_mode,
            self.config.manual_retry.clone(),
        );
        let reports = batches
            .iter()
            .map(|batch| self.process_batch(&fetcher, batch, batches.len(), output, sink))
            .collect::<Result<Vec<_>, _>>()?;

        let report = DownloadReport {
            output_directory: output.root().to_string(),
            requested: validation.valid.len() + validation.invalid.len(),
            valid: validation.valid.len(),
            invalid: validation.invalid.iter().map(|id| id.to_string()).collect(),
            batches: reports,
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
        };
        sink.event(RunEvent::Finished {
            batches: report.batches.len(),
            failed: report.failed_batches().count(),
        });
        Ok(report)
    }

    fn process_batch(
        &self,
        fetcher: &BatchFetcher<'_, D>,
        batch: &Batch,
        total: usize,
        output: &OutputDir,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport, GdcError> {
        let ordinal = batch.ordinal();
        let mut report = BatchReport {
            ordinal,
            size: batch.len(),
            attempts: 0,
            status: BatchStatus::Failed,
            archive: None,
            members: 0,
            missing_ids: Vec::new(),
            error: None,
        };

        let (archive, attempts) = match fetcher.fetch(batch, total, sink)? {
            FetchOutcome::Retrieved { archive, attempts } => (archive, attempts),
            FetchOutcome::Failed { attempts, reason } => {
                report.attempts = attempts;
                report.error = Some(reason);
                return Ok(report);
            }
        };
        report.attempts = attempts;
        report.archive = Some(archive.path.to_string());

        match extract_archive(archive.path.as_std_path(), output.root().as_std_path()) {
            ExtractionOutcome::Extracted { members } => {
                let missing = missing_from_bundle(batch, &members, output.root().as_std_path());
                if !missing.is_empty() {
                    sink.event(RunEvent::MissingFromBundle {
                        ordinal,
                        ids: missing.clone(),
                    });
                }
                sink.event(RunEvent::Extracted {
                    ordinal,
                    archive: archive.path.clone(),
                    members: members.len(),
                });
                report.status = BatchStatus::Extracted;
                report.members = members.len();
                report.missing_ids = missing.iter().map(|id| id.to_string()).collect();
            }
            ExtractionOutcome::Skipped { .. } => {
                sink.event(RunEvent::ExtractionSkipped {
                    ordinal,
                    path: archive.path.clone(),
                });
                report.status = BatchStatus::Saved;
                report.members = 1;
            }
            ExtractionOutcome::Failed { archive, reason } => {
                sink.event(RunEvent::ExtractionFailed {
                    ordinal,
                    archive,
                    reason: reason.clone(),
                });
                report.status = BatchStatus::ExtractionFailed;
                report.error = Some(reason);
            }
        }
        Ok(report)
    }
}

/// Batch ids with no member under `<root>/<file id>/`, the layout of GDC bundles.
fn missing_from_bundle(batch: &Batch, members: &[PathBuf], root: &Path) -> Vec<FileId> {
    let delivered: HashSet<&str> = members
        .iter()
        .filter_map(|member| member.strip_prefix(root).ok())
        .filter_map(|relative| relative.components().next())
        .filter_map(|first| first.as_os_str().to_str())
        .collect();
    batch
        .ids()
        .iter()
        .filter(|id| !delivered.contains(id.as_str()))
        .cloned()
        .collect()
}
