//! Retrieval of one batch: request, stream to disk, and the application-level retry loop.
//!
//! The transport already absorbs transient statuses with exponential backoff. What reaches
//! this layer is a final non-success answer, a dead connection, or a body that broke while
//! being written; each of those re-issues the whole request after a fixed delay, up to
//! [`ManualRetry::attempts`] times. A batch that never succeeds is reported as failed and the
//! caller moves on. Local filesystem errors are not retried and end the run.

use std::sync::LazyLock;
use std::thread;

use camino::Utf8PathBuf;
use regex::Regex;
use tracing::warn;

use crate::app::{ProgressSink, RunEvent};
use crate::config::{ManualRetry, WriteMode};
use crate::domain::Batch;
use crate::error::GdcError;
use crate::gdc::DataClient;
use crate::outdir::OutputDir;

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"filename="*(.+?)"*$"#).expect("static regex"));

/// A bundle persisted under its final name, not yet extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedArchive {
    pub path: Utf8PathBuf,
    pub file_name: String,
    pub bytes: u64,
    /// 0 for the first request, `n` for the n-th manual retry.
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Retrieved {
        archive: RetrievedArchive,
        attempts: u32,
    },
    Failed {
        attempts: u32,
        reason: String,
    },
}

enum FetchState {
    Requesting { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded { archive: RetrievedArchive },
    Failed { attempts: u32, reason: String },
}

pub struct BatchFetcher<'a, D: DataClient> {
    client: &'a D,
    output: &'a OutputDir,
    write_mode: WriteMode,
    manual_retry: ManualRetry,
}

impl<'a, D: DataClient> BatchFetcher<'a, D> {
    pub fn new(
        client: &'a D,
        output: &'a OutputDir,
        write_mode: WriteMode,
        manual_retry: ManualRetry,
    ) -> Self {
        Self {
            client,
            output,
            write_mode,
            manual_retry,
        }
    }

    /// Runs the retry loop for one batch. `Err` means the output directory itself is
    /// unusable, which no retry can fix.
    pub fn fetch(
        &self,
        batch: &Batch,
        total: usize,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutcome, GdcError> {
        let ordinal = batch.ordinal();
        sink.event(RunEvent::BatchStarted {
            ordinal,
            total,
            size: batch.len(),
        });

        let mut state = FetchState::Requesting { attempt: 0 };
        loop {
            state = match state {
                FetchState::Requesting { attempt } => match self.attempt(batch, attempt) {
                    Ok(archive) => FetchState::Succeeded { archive },
                    Err(err @ GdcError::Filesystem(_)) => {
                        sink.event(RunEvent::BatchFailed {
                            ordinal,
                            attempts: attempt + 1,
                            reason: err.to_string(),
                        });
                        return Err(err);
                    }
                    Err(err) => {
                        let reason = err.to_string();
                        sink.event(RunEvent::AttemptFailed {
                            ordinal,
                            attempt,
                            reason: reason.clone(),
                        });
                        if attempt < self.manual_retry.attempts {
                            FetchState::Retrying {
                                attempt: attempt + 1,
                            }
                        } else {
                            FetchState::Failed {
                                attempts: attempt + 1,
                                reason,
                            }
                        }
                    }
                },
                FetchState::Retrying { attempt } => {
                    sink.event(RunEvent::RetryScheduled {
                        ordinal,
                        attempt,
                        of: self.manual_retry.attempts,
                        delay: self.manual_retry.delay,
                    });
                    if !self.manual_retry.delay.is_zero() {
                        thread::sleep(self.manual_retry.delay);
                    }
                    FetchState::Requesting { attempt }
                }
                FetchState::Succeeded { archive } => {
                    sink.event(RunEvent::ArchiveSaved {
                        ordinal,
                        path: archive.path.clone(),
                        bytes: archive.bytes,
                    });
                    let attempts = archive.attempt + 1;
                    return Ok(FetchOutcome::Retrieved { archive, attempts });
                }
                FetchState::Failed { attempts, reason } => {
                    sink.event(RunEvent::BatchFailed {
                        ordinal,
                        attempts,
                        reason: reason.clone(),
                    });
                    return Ok(FetchOutcome::Failed { attempts, reason });
                }
            };
        }
    }

    fn attempt(&self, batch: &Batch, attempt: u32) -> Result<RetrievedArchive, GdcError> {
        let response = self.client.request_bundle(batch.ids())?;
        if !response.is_success() {
            let status = response.status();
            let message = response.diagnostic_text();
            return Err(GdcError::DownloadStatus { status, message });
        }

        let file_name = response
            .content_disposition()
            .and_then(parse_content_disposition)
            .filter(|name| match self.output.path_for(name) {
                Ok(_) => true,
                Err(_) => {
                    warn!(
                        batch = batch.ordinal(),
                        name = %name,
                        "ignoring unusable bundle name"
                    );
                    false
                }
            })
            .unwrap_or_else(|| synthetic_archive_name(batch, attempt));
        let mut body = response.into_body();
        let (path, bytes) = self
            .output
            .write_stream(&file_name, &mut body, self.write_mode)?;
        Ok(RetrievedArchive {
            path,
            file_name,
            bytes,
            attempt,
        })
    }
}

/// Extracts the suggested file name, without surrounding quotes.
pub fn parse_content_disposition(header: &str) -> Option<String> {
    FILENAME_RE
        .captures(header.trim())
        .and_then(|caps| caps.get(1))
        .map(|name| name.as_str().trim().trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

/// Fallback name when the server suggests none or an unusable one. Retries carry the
/// attempt number so a retried batch never reuses an earlier attempt's name.
pub fn synthetic_archive_name(batch: &Batch, attempt: u32) -> String {
    if attempt == 0 {
        format!("gdc_download_batch_{}.tar.gz", batch.ordinal())
    } else {
        format!(
            "gdc_download_batch_{}_retry_{attempt}.tar.gz",
            batch.ordinal()
        )
    }
}
