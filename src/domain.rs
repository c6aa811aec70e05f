use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GdcError;

/// Opaque GDC file identifier (usually a UUID, but never interpreted).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = GdcError;

    /// Only blank input is rejected. Anything else is left for the catalog to judge, so a
    /// malformed id ends up in the invalid list instead of aborting the run.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if normalized.is_empty() {
            return Err(GdcError::InvalidFileId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Removes repeated ids, keeping the first occurrence of each.
pub fn dedup_file_ids<I>(ids: I) -> Vec<FileId>
where
    I: IntoIterator<Item = FileId>,
{
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// A contiguous, size-bounded slice of the validated id sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    index: usize,
    ids: Vec<FileId>,
}

impl Batch {
    pub fn new(index: usize, ids: Vec<FileId>) -> Self {
        Self { index, ids }
    }

    /// Zero-based position in planner order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// One-based position, used in file names and diagnostics.
    pub fn ordinal(&self) -> usize {
        self.index + 1
    }

    pub fn ids(&self) -> &[FileId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
