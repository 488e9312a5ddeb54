//! Durable job status table.
//!
//! The whole table is loaded into memory on open and rewritten atomically
//! (temp file + rename) after every mutation. Mutations are applied to a copy
//! and only committed in memory once the write succeeded, so a failed write
//! leaves both the file and the in-memory table unchanged.
//!
//! The store does no locking of its own: the find-then-insert dedup done by
//! callers is only safe because [`instance_lock`] keeps a single process alive.
//!
//! [`instance_lock`]: crate::io::instance_lock

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::core::query::Query;
use crate::core::types::{JobRecord, JobStatus};

const STORE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/status_store/v1.schema.json"
));

/// `insert` was called for a name that is already tracked.
#[derive(Debug, Error)]
#[error("job record already exists for {name}")]
pub struct DuplicateRecord {
    pub name: String,
}

#[derive(Debug)]
pub struct StatusStore {
    path: PathBuf,
    records: Vec<JobRecord>,
}

impl StatusStore {
    /// Open the table at `path`; a missing file is an empty table.
    pub fn open(path: &Path) -> Result<Self> {
        let records = if path.exists() {
            load_records(path)?
        } else {
            debug!(path = %path.display(), "status store missing, starting empty");
            Vec::new()
        };
        debug!(path = %path.display(), records = records.len(), "status store loaded");
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn all(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn find(&self, query: &Query) -> Vec<JobRecord> {
        self.records
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect()
    }

    /// Add a record. Fails with [`DuplicateRecord`] if `record.name` is tracked.
    pub fn insert(&mut self, record: JobRecord) -> Result<()> {
        if self.records.iter().any(|existing| existing.name == record.name) {
            return Err(DuplicateRecord { name: record.name }.into());
        }
        let mut next = self.records.clone();
        next.push(record);
        self.commit(next)
    }

    /// Set the status of every record named `name`. Returns how many changed.
    pub fn update_status(&mut self, name: &str, status: JobStatus) -> Result<usize> {
        let mut next = self.records.clone();
        let mut changed = 0;
        for record in next.iter_mut().filter(|record| record.name == name) {
            if record.status != status {
                record.status = status;
                changed += 1;
            }
        }
        if changed > 0 {
            self.commit(next)?;
        }
        Ok(changed)
    }

    /// Delete every record named `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> Result<usize> {
        let before = self.records.len();
        let next: Vec<JobRecord> = self
            .records
            .iter()
            .filter(|record| record.name != name)
            .cloned()
            .collect();
        let removed = before - next.len();
        if removed > 0 {
            self.commit(next)?;
        }
        Ok(removed)
    }

    fn commit(&mut self, next: Vec<JobRecord>) -> Result<()> {
        write_records(&self.path, &next)?;
        self.records = next;
        Ok(())
    }
}

fn load_records(path: &Path) -> Result<Vec<JobRecord>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read status store {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse status store {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate {}", path.display()))?;
    let records: Vec<JobRecord> = serde_json::from_value(value)
        .with_context(|| format!("deserialize status store {}", path.display()))?;

    let mut seen = HashSet::new();
    for record in &records {
        if !seen.insert(record.name.as_str()) {
            return Err(anyhow!(
                "status store {} tracks {} more than once",
                path.display(),
                record.name
            ));
        }
    }
    Ok(records)
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(STORE_SCHEMA).context("parse store schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "status store schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn write_records(path: &Path, records: &[JobRecord]) -> Result<()> {
    debug!(path = %path.display(), records = records.len(), "writing status store");
    let mut buf = serde_json::to_string_pretty(records).context("serialize status store")?;
    buf.push('\n');
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp status store {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace status store {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> StatusStore {
        StatusStore::open(&dir.join("state.json")).expect("open")
    }

    #[test]
    fn mutations_survive_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(temp.path());
        store
            .insert(JobRecord::new("/in/a.qmg", "1", JobStatus::Submitted))
            .expect("insert a");
        store
            .insert(JobRecord::new("/in/b.qmg", "2", JobStatus::Submitted))
            .expect("insert b");
        store
            .update_status("/in/a.qmg", JobStatus::Running)
            .expect("update");
        store.remove("/in/b.qmg").expect("remove");

        let reopened = store_in(temp.path());
        assert_eq!(
            reopened.all(),
            &[JobRecord::new("/in/a.qmg", "1", JobStatus::Running)]
        );
    }

    #[test]
    fn insert_rejects_duplicate_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(temp.path());
        store
            .insert(JobRecord::new("/in/a.qmg", "1", JobStatus::Submitted))
            .expect("insert");

        let err = store
            .insert(JobRecord::new("/in/a.qmg", "2", JobStatus::Running))
            .unwrap_err();
        let dup = err.downcast_ref::<DuplicateRecord>().expect("duplicate");
        assert_eq!(dup.name, "/in/a.qmg");
        assert_eq!(store.find(&Query::name("/in/a.qmg")).len(), 1);
    }

    #[test]
    fn update_and_remove_on_missing_name_are_noops() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(temp.path());
        assert_eq!(store.update_status("nope", JobStatus::Completed).expect("update"), 0);
        assert_eq!(store.remove("nope").expect("remove"), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn repeated_update_leaves_state_identical() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(temp.path());
        store
            .insert(JobRecord::new("a", "42", JobStatus::Running))
            .expect("insert");

        assert_eq!(store.update_status("a", JobStatus::Completed).expect("first"), 1);
        let after_first = fs::read_to_string(store.path()).expect("read");
        assert_eq!(store.update_status("a", JobStatus::Completed).expect("second"), 0);
        let after_second = fs::read_to_string(store.path()).expect("read");
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn find_filters_by_status_disjunction() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = store_in(temp.path());
        for (name, status) in [
            ("a", JobStatus::Submitted),
            ("b", JobStatus::Running),
            ("c", JobStatus::Completed),
        ] {
            store
                .insert(JobRecord::new(name, name, status))
                .expect("insert");
        }
        let names: Vec<String> = store
            .find(&Query::in_flight())
            .into_iter()
            .map(|record| record.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn legacy_table_layout_is_readable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(
            &path,
            r#"[{"status": "Running", "id": "42", "name": "a"}]"#,
        )
        .expect("write");
        let store = StatusStore::open(&path).expect("open");
        assert_eq!(store.all(), &[JobRecord::new("a", "42", JobStatus::Running)]);
    }

    #[test]
    fn unknown_status_fails_schema_validation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(&path, r#"[{"status": "Failed", "id": "1", "name": "a"}]"#).expect("write");
        let err = StatusStore::open(&path).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn duplicate_names_on_disk_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        fs::write(
            &path,
            r#"[{"status": "Running", "id": "1", "name": "a"},
               {"status": "Completed", "id": "2", "name": "a"}]"#,
        )
        .expect("write");
        let err = StatusStore::open(&path).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }
}
