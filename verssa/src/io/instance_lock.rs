//! Single-instance guard backed by an advisory file lock.
//!
//! The lock is an exclusive `flock` on a well-known file. It belongs to the open
//! file description, so it is released when the [`InstanceLock`] is dropped or
//! the process exits for any reason, including a crash.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{debug, warn};

/// Exclusive right to run one cycle. Hold it for the whole cycle.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    _file: File,
}

impl InstanceLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Try to take the lock without blocking.
///
/// Returns `Ok(None)` when another process already holds it; that is the
/// expected "another instance is running" outcome, not an error. Errors are
/// reserved for failing to open the lock file at all.
pub fn acquire(lock_path: &Path) -> Result<Option<InstanceLock>> {
    if let Some(parent) = lock_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create lock directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("open lock file {}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            debug!(path = %lock_path.display(), "instance lock acquired");
            Ok(Some(InstanceLock {
                path: lock_path.to_path_buf(),
                _file: file,
            }))
        }
        Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
            warn!(path = %lock_path.display(), "instance lock held by another process");
            drop(file);
            Ok(None)
        }
        Err(err) => Err(err).with_context(|| format!("lock {}", lock_path.display())),
    }
}
