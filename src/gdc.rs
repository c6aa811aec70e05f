use std::io::Read;
use std::time::Duration;

use reqwest::header::CONTENT_DISPOSITION;
use serde::{Deserialize, Serialize};

use crate::domain::FileId;
use crate::error::GdcError;
use crate::transport::{RetryPolicy, RetryingTransport};

pub const DEFAULT_API_BASE_URL: &str = "https://api.gdc.cancer.gov";

/// Diagnostic bodies beyond this are cut before they end up in errors and logs.
const MAX_DIAGNOSTIC_BODY: usize = 2048;

/// Query side of the remote catalog (`/files`).
pub trait CatalogClient: Send + Sync {
    /// Returns the ids of catalog hits whose `file_id` is one of `ids`.
    fn lookup_file_ids(&self, ids: &[FileId]) -> Result<Vec<String>, GdcError>;
}

/// Bundle retrieval side of the remote catalog (`/data`).
pub trait DataClient: Send + Sync {
    /// Requests one bundle naming exactly `ids`. Non-success statuses are returned as a
    /// response, not as an error; `Err` means no response could be obtained at all.
    fn request_bundle(&self, ids: &[FileId]) -> Result<BundleResponse, GdcError>;
}

impl<T: CatalogClient + ?Sized> CatalogClient for &T {
    fn lookup_file_ids(&self, ids: &[FileId]) -> Result<Vec<String>, GdcError> {
        (**self).lookup_file_ids(ids)
    }
}

impl<T: DataClient + ?Sized> DataClient for &T {
    fn request_bundle(&self, ids: &[FileId]) -> Result<BundleResponse, GdcError> {
        (**self).request_bundle(ids)
    }
}

pub struct BundleResponse {
    status: u16,
    content_disposition: Option<String>,
    body: Box<dyn Read + Send>,
}

impl BundleResponse {
    pub fn new(
        status: u16,
        content_disposition: Option<String>,
        body: Box<dyn Read + Send>,
    ) -> Self {
        Self {
            status,
            content_disposition,
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_disposition(&self) -> Option<&str> {
        self.content_disposition.as_deref()
    }

    pub fn into_body(self) -> Box<dyn Read + Send> {
        self.body
    }

    /// Reads a bounded prefix of the body for diagnostics.
    pub fn diagnostic_text(self) -> String {
        let mut buf = Vec::new();
        let mut limited = self.body.take(MAX_DIAGNOSTIC_BODY as u64);
        if limited.read_to_end(&mut buf).is_err() {
            return "<unreadable response body>".to_string();
        }
        String::from_utf8_lossy(&buf).trim().to_string()
    }
}

#[derive(Debug, Serialize)]
struct FilesQuery<'a> {
    filters: Filter<'a>,
    fields: &'static str,
    format: &'static str,
    size: usize,
}

#[derive(Debug, Serialize)]
struct Filter<'a> {
    op: &'static str,
    content: FilterContent<'a>,
}

#[derive(Debug, Serialize)]
struct FilterContent<'a> {
    field: &'static str,
    value: &'a [FileId],
}

#[derive(Debug, Serialize)]
struct DataRequest<'a> {
    ids: &'a [FileId],
}

#[derive(Debug, Deserialize)]
struct FilesResponse {
    data: FilesData,
}

#[derive(Debug, Deserialize)]
struct FilesData {
    #[serde(default)]
    hits: Vec<FileHit>,
}

#[derive(Debug, Deserialize)]
struct FileHit {
    file_id: String,
}

/// One transport per endpoint so each carries its own stall timeout.
#[derive(Clone)]
pub struct GdcHttpClient {
    catalog: RetryingTransport,
    data: RetryingTransport,
    base_url: String,
}

impl GdcHttpClient {
    pub fn new(
        base_url: &str,
        policy: RetryPolicy,
        validation_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, GdcError> {
        Ok(Self {
            catalog: RetryingTransport::new(policy.clone(), validation_timeout)?,
            data: RetryingTransport::new(policy, request_timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.base_url)
    }

    fn data_url(&self) -> String {
        format!("{}/data", self.base_url)
    }
}

impl CatalogClient for GdcHttpClient {
    fn lookup_file_ids(&self, ids: &[FileId]) -> Result<Vec<String>, GdcError> {
        let query = FilesQuery {
            filters: Filter {
                op: "in",
                content: FilterContent {
                    field: "file_id",
                    value: ids,
                },
            },
            fields: "file_id",
            format: "JSON",
            size: ids.len(),
        };
        let response = self
            .catalog
            .post_json(&self.files_url(), &query)
            .map_err(|err| GdcError::CatalogHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .map(|text| truncate(&text))
                .unwrap_or_else(|_| "GDC catalog request failed".to_string());
            return Err(GdcError::CatalogStatus { status, message });
        }
        let parsed: FilesResponse = response
            .json()
            .map_err(|err| GdcError::CatalogHttp(err.to_string()))?;
        Ok(parsed.data.hits.into_iter().map(|hit| hit.file_id).collect())
    }
}

impl DataClient for GdcHttpClient {
    fn request_bundle(&self, ids: &[FileId]) -> Result<BundleResponse, GdcError> {
        let response = self
            .data
            .post_json(&self.data_url(), &DataRequest { ids })
            .map_err(|err| GdcError::DownloadHttp(err.to_string()))?;
        let status = response.status().as_u16();
        let content_disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        Ok(BundleResponse::new(status, content_disposition, Box::new(response)))
    }
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX_DIAGNOSTIC_BODY) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
