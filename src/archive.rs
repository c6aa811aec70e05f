use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use zip::ZipArchive;

use crate::error::GdcError;

/// Bundle formats the extractor can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    /// Recognizes archives by name. A bare `.gz` (for example `x.maf.gz`) is a single
    /// compressed file, not a bundle.
    pub fn detect(file_name: &str) -> Option<Self> {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// Members were written and the archive was removed.
    Extracted { members: Vec<PathBuf> },
    /// Not a recognized archive; the file itself is the final artifact.
    Skipped { path: PathBuf },
    /// Extraction stopped; the archive is left in place for inspection.
    Failed { archive: PathBuf, reason: String },
}

impl ExtractionOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ExtractionOutcome::Failed { .. })
    }
}

/// Unpacks `archive` into `target_dir` and deletes it on success.
pub fn extract_archive(archive: &Path, target_dir: &Path) -> ExtractionOutcome {
    let kind = archive
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(ArchiveKind::detect);
    let Some(kind) = kind else {
        return ExtractionOutcome::Skipped {
            path: archive.to_path_buf(),
        };
    };

    let extracted = match kind {
        ArchiveKind::TarGz => extract_tar_gz(archive, target_dir),
        ArchiveKind::Zip => extract_zip(archive, target_dir),
    };
    let result = extracted.and_then(|members| {
        fs::remove_file(archive).map_err(|err| GdcError::Extraction {
            archive: archive.to_path_buf(),
            reason: format!("remove archive: {err}"),
        })?;
        Ok(members)
    });

    match result {
        Ok(members) => ExtractionOutcome::Extracted { members },
        Err(GdcError::Extraction { archive, reason }) => {
            ExtractionOutcome::Failed { archive, reason }
        }
        Err(err) => ExtractionOutcome::Failed {
            archive: archive.to_path_buf(),
            reason: err.to_string(),
        },
    }
}

pub fn extract_tar_gz(archive_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, GdcError> {
    let fail = |reason: String| GdcError::Extraction {
        archive: archive_path.to_path_buf(),
        reason,
    };
    let file = fs::File::open(archive_path).map_err(|err| fail(format!("open: {err}")))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut members = Vec::new();

    let entries = archive.entries().map_err(|err| fail(err.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|err| fail(err.to_string()))?;
        let relative = entry
            .path()
            .map_err(|err| fail(err.to_string()))?
            .into_owned();
        let is_file = entry.header().entry_type().is_file();
        let unpacked = entry
            .unpack_in(target_dir)
            .map_err(|err| fail(format!("{}: {err}", relative.display())))?;
        if !unpacked {
            return Err(fail(format!(
                "member path escapes output directory: {}",
                relative.display()
            )));
        }
        if is_file {
            members.push(target_dir.join(relative));
        }
    }
    Ok(members)
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, GdcError> {
    let fail = |reason: String| GdcError::Extraction {
        archive: zip_path.to_path_buf(),
        reason,
    };
    let file = fs::File::open(zip_path).map_err(|err| fail(format!("open: {err}")))?;
    let mut archive = ZipArchive::new(file).map_err(|err| fail(err.to_string()))?;
    let mut members = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| fail(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(fail(format!(
                    "member path escapes output directory: {}",
                    entry.name()
                )));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path).map_err(|err| fail(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| fail(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path).map_err(|err| fail(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| fail(err.to_string()))?;
        members.push(entry_path);
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_archive_kinds() {
        assert_eq!(
            ArchiveKind::detect("gdc_download_20241022.tar.gz"),
            Some(ArchiveKind::TarGz)
        );
        assert_eq!(ArchiveKind::detect("bundle.TGZ"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect("bundle.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect("sample.wxs.maf.gz"), None);
        assert_eq!(ArchiveKind::detect("counts.tsv"), None);
    }

    #[test]
    fn unrecognized_file_is_left_alone() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("counts.tsv");
        fs::write(&path, "gene_id\tgene_name\n").unwrap();

        let outcome = extract_archive(&path, temp.path());
        assert_eq!(outcome, ExtractionOutcome::Skipped { path: path.clone() });
        assert!(path.exists());
    }
}
