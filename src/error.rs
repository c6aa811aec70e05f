use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GdcError {
    #[error("invalid file id: {0:?}")]
    InvalidFileId(String),

    #[error("no file ids supplied")]
    #[diagnostic(help("check that the sample sheet has a populated 'File ID' column"))]
    EmptyFileIdList,

    #[error("none of the {requested} requested file ids exist in the GDC catalog")]
    NoValidFileIds { requested: usize },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("GDC catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("GDC catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("GDC data request failed: {0}")]
    DownloadHttp(String),

    #[error("GDC data endpoint returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("failed to extract {archive}: {reason}")]
    Extraction { archive: PathBuf, reason: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read sample sheet: {0}")]
    SampleSheet(String),

    #[error("sample sheet is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("merge failed: {0}")]
    Merge(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
