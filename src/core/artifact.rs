//! Artifact inspection and cleanup
//!
//! Artifacts are opaque files written by stage processes. The runner only
//! looks at whether they exist, when they were last written and, for tabular
//! files, how many records they hold.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed CSV in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Count the data records of a CSV file, excluding the header row
///
/// An empty file, or one holding only a header, has zero records. Fields are
/// not decoded, so any text encoding is accepted.
pub fn count_records(path: &Path) -> Result<usize, ArtifactError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|source| ArtifactError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    let mut count = 0;
    for record in reader.byte_records() {
        let record = record.map_err(|source| ArtifactError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        // Trailing blank lines are not records
        if record.iter().any(|field| !field.is_empty()) {
            count += 1;
        }
    }
    Ok(count)
}

/// Last modification time, or `None` if the file does not exist
pub fn modified_at(path: &Path) -> Result<Option<SystemTime>, ArtifactError> {
    match std::fs::metadata(path) {
        Ok(meta) => meta.modified().map(Some).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Point-in-time view of an artifact, for status displays
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactStatus {
    pub path: PathBuf,
    pub present: bool,
    pub record_count: Option<usize>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Set when the file exists but cannot be inspected
    pub error: Option<String>,
}

impl ArtifactStatus {
    /// Inspect an artifact; `tabular` enables record counting
    pub fn inspect(path: &Path, tabular: bool) -> Self {
        let mut status = ArtifactStatus {
            path: path.to_path_buf(),
            present: false,
            record_count: None,
            modified_at: None,
            error: None,
        };

        match modified_at(path) {
            Ok(Some(time)) => {
                status.present = true;
                status.modified_at = Some(DateTime::<Utc>::from(time));
            }
            Ok(None) => return status,
            Err(e) => {
                status.present = path.exists();
                status.error = Some(e.to_string());
                return status;
            }
        }

        if tabular {
            match count_records(path) {
                Ok(count) => status.record_count = Some(count),
                Err(e) => status.error = Some(e.to_string()),
            }
        }

        status
    }
}

/// Outcome of deleting a set of artifacts
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResetReport {
    /// Files that existed and were deleted
    pub removed: Vec<PathBuf>,
    /// Files that exist but could not be deleted, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

impl ResetReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delete every listed artifact that exists
///
/// Idempotent: files that are already gone are skipped silently. Other
/// errors do not stop the remaining deletions; they are logged and reported.
pub fn remove_artifacts<'a, I>(paths: I) -> ResetReport
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut report = ResetReport::default();

    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed artifact {}", path.display());
                report.removed.push(path.to_path_buf());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Could not remove artifact {}: {}", path.display(), e);
                report.failed.push((path.to_path_buf(), e.to_string()));
            }
        }
    }

    report
}
