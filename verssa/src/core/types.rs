//! Shared types for the job lifecycle.
//!
//! These types define stable contracts between the status store, handlers and
//! the cycle driver. The serialized forms of [`JobRecord`] and [`JobStatus`]
//! are the on-disk table layout and must not change.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Remote job status for a tracked file.
///
/// There is deliberately no `New` (records only exist after submission) and no
/// `Relocated` (the record is deleted once the file has been moved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Submitted,
    Running,
    Completed,
}

impl JobStatus {
    /// Map a status string reported by the remote job system.
    ///
    /// Returns `None` for remote states outside the tracked lifecycle
    /// (e.g. `Failed`, `Canceled`).
    pub fn from_remote(status: &str) -> Option<Self> {
        let status = status.trim();
        [Self::Submitted, Self::Running, Self::Completed]
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(status))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::Running => "Running",
            Self::Completed => "Completed",
        }
    }

    /// `Submitted` and `Running` are reconciled identically.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Submitted | Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submitted file and its remote job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Canonical path of the source object (unique key).
    pub name: String,
    /// Opaque job identifier returned at submission.
    #[serde(rename = "id")]
    pub remote_job_id: String,
    pub status: JobStatus,
}

impl JobRecord {
    pub fn new(name: impl Into<String>, remote_job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            name: name.into(),
            remote_job_id: remote_job_id.into(),
            status,
        }
    }
}

/// A data object discovered in a storage collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Full logical path, e.g. `/zone/home/incoming/sample.qmg`.
    pub path: String,
    /// Final path component.
    pub name: String,
}

impl ObjectRef {
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = match path.rsplit_once('/') {
            Some((_, name)) => name.to_string(),
            None => path.clone(),
        };
        Self { path, name }
    }

    /// Lower-cased suffix after the last `.` of the object name.
    ///
    /// Names without a dot (or ending in one) have no extension.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.name.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}
