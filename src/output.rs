use std::io::{self, Write};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::app::{DownloadReport, ProgressSink, RunEvent};
use crate::merge::MergeSummary;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_download(report: &DownloadReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_merge(summary: &MergeSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards pipeline events to `tracing`.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: RunEvent) {
        match event {
            RunEvent::ValidationStarted {
                requested,
                duplicates,
            } => {
                if duplicates > 0 {
                    info!(duplicates, "dropped duplicate file ids");
                }
                info!(requested, "validating file ids");
            }
            RunEvent::ValidationFinished { valid, invalid } => {
                if invalid.is_empty() {
                    info!(valid, "all file ids are valid");
                } else {
                    let skipped = invalid
                        .iter()
                        .map(|id| id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    warn!(
                        valid,
                        invalid = invalid.len(),
                        ids = %skipped,
                        "invalid file ids will be skipped"
                    );
                }
            }
            RunEvent::OutputReady { path, created } => {
                if created {
                    info!(%path, "created output directory");
                } else {
                    info!(%path, "using existing output directory");
                }
            }
            RunEvent::BatchesPlanned {
                batches,
                batch_size,
            } => info!(batches, batch_size, "planned download batches"),
            RunEvent::BatchStarted {
                ordinal,
                total,
                size,
            } => info!(batch = ordinal, total, size, "downloading batch"),
            RunEvent::AttemptFailed {
                ordinal,
                attempt,
                reason,
            } => error!(batch = ordinal, attempt, %reason, "batch request failed"),
            RunEvent::RetryScheduled {
                ordinal,
                attempt,
                of,
                delay,
            } => info!(
                batch = ordinal,
                attempt,
                of,
                delay_ms = delay.as_millis() as u64,
                "retrying batch"
            ),
            RunEvent::ArchiveSaved {
                ordinal,
                path,
                bytes,
            } => info!(batch = ordinal, %path, bytes, "downloaded data saved"),
            RunEvent::BatchFailed {
                ordinal,
                attempts,
                reason,
            } => error!(
                batch = ordinal,
                attempts,
                %reason,
                "all attempts failed, skipping batch"
            ),
            RunEvent::Extracted {
                ordinal,
                archive,
                members,
            } => {
                info!(batch = ordinal, members, "files extracted");
                debug!(batch = ordinal, %archive, "removed archive");
            }
            RunEvent::ExtractionSkipped { ordinal, path } => {
                info!(batch = ordinal, %path, "not an archive, kept as downloaded")
            }
            RunEvent::ExtractionFailed {
                ordinal,
                archive,
                reason,
            } => error!(
                batch = ordinal,
                archive = %archive.display(),
                %reason,
                "extraction failed, archive kept"
            ),
            RunEvent::MissingFromBundle { ordinal, ids } => {
                let ids = ids
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                warn!(batch = ordinal, %ids, "bundle is missing requested files")
            }
            RunEvent::Finished { batches, failed } => {
                if failed == 0 {
                    info!(batches, "download finished");
                } else {
                    warn!(batches, failed, "download finished with failed batches");
                }
            }
        }
    }
}
