use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::WriteMode;
use crate::error::GdcError;

/// The shared directory that receives bundles and their extracted members.
#[derive(Debug, Clone)]
pub struct OutputDir {
    root: Utf8PathBuf,
}

impl OutputDir {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn from_path(root: &Path) -> Result<Self, GdcError> {
        let root = Utf8PathBuf::from_path_buf(root.to_path_buf()).map_err(|path| {
            GdcError::Filesystem(format!("non-utf8 output directory {}", path.display()))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Creates the directory if needed; returns whether it had to be created.
    pub fn ensure(&self) -> Result<bool, GdcError> {
        if self.root.as_std_path().is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| GdcError::Filesystem(format!("create {}: {err}", self.root)))?;
        Ok(true)
    }

    /// Path for a file name suggested by the server. Only the final component is kept.
    pub fn path_for(&self, file_name: &str) -> Result<Utf8PathBuf, GdcError> {
        let name = Utf8Path::new(file_name)
            .file_name()
            .filter(|name| !name.starts_with('.'))
            .ok_or_else(|| GdcError::Filesystem(format!("unusable file name {file_name:?}")))?;
        Ok(self.root.join(name))
    }

    /// Copies `body` into `file_name` under the root and returns the final path and size.
    ///
    /// Data goes to a temporary file in the same directory first, so a body that fails
    /// halfway never leaves a truncated file under the final name. Reading the body fails
    /// with [`GdcError::DownloadHttp`]; anything local fails with [`GdcError::Filesystem`].
    pub fn write_stream(
        &self,
        file_name: &str,
        body: &mut dyn Read,
        mode: WriteMode,
    ) -> Result<(Utf8PathBuf, u64), GdcError> {
        let destination = self.path_for(file_name)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".gdc-part")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| GdcError::Filesystem(err.to_string()))?;

        let written = match mode {
            WriteMode::Streamed { chunk_size } => {
                copy_chunked(body, temp.as_file_mut(), chunk_size)?
            }
            WriteMode::Buffered => {
                let mut content = Vec::new();
                body.read_to_end(&mut content).map_err(body_error)?;
                temp.as_file_mut()
                    .write_all(&content)
                    .map_err(|err| GdcError::Filesystem(err.to_string()))?;
                content.len() as u64
            }
        };

        temp.as_file_mut()
            .sync_all()
            .map_err(|err| GdcError::Filesystem(err.to_string()))?;
        temp.persist(destination.as_std_path())
            .map_err(|err| GdcError::Filesystem(err.to_string()))?;
        Ok((destination, written))
    }

    /// Every regular file below the root, sorted.
    pub fn files(&self) -> Result<Vec<PathBuf>, GdcError> {
        walk_files(self.root.as_std_path())
    }
}

fn body_error(err: io::Error) -> GdcError {
    GdcError::DownloadHttp(format!("read response body: {err}"))
}

fn copy_chunked(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    chunk_size: usize,
) -> Result<u64, GdcError> {
    let write_err = |err: io::Error| GdcError::Filesystem(err.to_string());
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(body_error(err)),
        };
        writer.write_all(&buf[..read]).map_err(write_err)?;
        total += read as u64;
    }
    writer.flush().map_err(write_err)?;
    Ok(total)
}

/// Regular files below `root`, sorted so callers see a stable order.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, GdcError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path)
            .map_err(|err| GdcError::Filesystem(format!("read {}: {err}", path.display())))?;
        for entry in entries {
            let entry = entry.map_err(|err| GdcError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
