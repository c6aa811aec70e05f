use std::collections::HashSet;

use crate::app::{ProgressSink, RunEvent};
use crate::domain::{FileId, dedup_file_ids};
use crate::error::GdcError;
use crate::gdc::CatalogClient;

/// Partition of the deduplicated input into ids the catalog confirmed and ids it did not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: Vec<FileId>,
    pub invalid: Vec<FileId>,
}

/// Checks `ids` against the catalog with a single query sized to the input.
///
/// Both lists keep the input order. Catalog failures and an empty valid set are errors;
/// nothing may be downloaded from an unvalidated list.
pub fn validate_file_ids(
    catalog: &dyn CatalogClient,
    ids: &[FileId],
    sink: &dyn ProgressSink,
) -> Result<ValidationResult, GdcError> {
    let unique = dedup_file_ids(ids.iter().cloned());
    if unique.is_empty() {
        return Err(GdcError::EmptyFileIdList);
    }

    sink.event(RunEvent::ValidationStarted {
        requested: unique.len(),
        duplicates: ids.len() - unique.len(),
    });
    let hits: HashSet<String> = catalog.lookup_file_ids(&unique)?.into_iter().collect();

    let (valid, invalid): (Vec<FileId>, Vec<FileId>) = unique
        .into_iter()
        .partition(|id| hits.contains(id.as_str()));

    sink.event(RunEvent::ValidationFinished {
        valid: valid.len(),
        invalid: invalid.clone(),
    });

    if valid.is_empty() {
        return Err(GdcError::NoValidFileIds {
            requested: invalid.len(),
        });
    }
    Ok(ValidationResult { valid, invalid })
}
