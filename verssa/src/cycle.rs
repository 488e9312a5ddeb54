//! Orchestration for a single poll cycle.
//!
//! A cycle runs three steps strictly in order, each item sequentially:
//!
//! 1. reconcile in-flight records against the remote job system,
//! 2. relocate files whose jobs completed and drop their records,
//! 3. discover new files in the incoming collection and dispatch them.
//!
//! Every item yields an explicit outcome value. Failures are logged, collected
//! in the [`CycleReport`] and leave the record as it was; the next cycle
//! retries. Nothing escapes a step, so the cycle always runs to completion.

use std::fmt;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};

use crate::core::query::Query;
use crate::core::types::{JobRecord, JobStatus, ObjectRef};
use crate::handlers::{HandlerContext, HandlerRegistry};
use crate::io::config::CollectionsConfig;
use crate::io::jobs::JobClient;
use crate::io::status_store::StatusStore;
use crate::io::storage::{StorageClient, StorageError, join_path, split_path};

/// Collaborators for one cycle. Built once per process by the caller.
pub struct CycleContext<'a> {
    pub store: &'a mut StatusStore,
    pub jobs: &'a dyn JobClient,
    pub storage: &'a dyn StorageClient,
    pub registry: &'a HandlerRegistry,
    pub collections: &'a CollectionsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    Reconcile,
    Relocate,
    Dispatch,
}

impl fmt::Display for CycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reconcile => "reconcile",
            Self::Relocate => "relocate",
            Self::Dispatch => "dispatch",
        })
    }
}

/// One item that failed and was left for the next cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub step: CycleStep,
    /// Record name, object path, or collection path.
    pub name: String,
    pub error: String,
}

/// Summary of a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub status_changes: u32,
    pub status_unchanged: u32,
    /// Remote reported a state outside the tracked lifecycle.
    pub status_untracked: u32,
    pub relocated: u32,
    pub submitted: u32,
    pub already_tracked: u32,
    pub unhandled: u32,
    pub failures: Vec<ItemFailure>,
}

impl CycleReport {
    fn fail(&mut self, step: CycleStep, name: &str, err: anyhow::Error) {
        let error = format!("{err:#}");
        error!(step = %step, name, error = %error, "item failed, left for next cycle");
        self.failures.push(ItemFailure {
            step,
            name: name.to_string(),
            error,
        });
    }
}

/// Result of reconciling one in-flight record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    Updated(JobStatus),
    Unchanged,
    Untracked(String),
}

/// Result of relocating one completed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    Moved,
    /// A previous cycle already moved the file but did not drop the record.
    AlreadyMoved,
}

/// Result of looking at one object in the incoming collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    AlreadyTracked,
    /// No handler for the extension (`None` when the name has no extension).
    Unhandled(Option<String>),
    Submitted(JobRecord),
}

/// Run one full cycle. Must only be called while holding the instance lock.
#[instrument(skip_all)]
pub fn run_cycle(ctx: &mut CycleContext<'_>) -> CycleReport {
    let mut report = CycleReport::default();
    reconcile_in_flight(ctx, &mut report);
    relocate_completed(ctx, &mut report);
    discover_and_dispatch(ctx, &mut report);
    info!(
        status_changes = report.status_changes,
        relocated = report.relocated,
        submitted = report.submitted,
        already_tracked = report.already_tracked,
        unhandled = report.unhandled,
        failures = report.failures.len(),
        "cycle complete"
    );
    report
}

/// Step 1: refresh every `Submitted`/`Running` record from the remote system.
pub fn reconcile_in_flight(ctx: &mut CycleContext<'_>, report: &mut CycleReport) {
    let records = ctx.store.find(&Query::in_flight());
    debug!(count = records.len(), "reconciling in-flight jobs");
    for record in records {
        match reconcile_record(ctx, &record) {
            Ok(Reconciled::Updated(status)) => {
                info!(name = %record.name, from = %record.status, to = %status, "job status changed");
                report.status_changes += 1;
            }
            Ok(Reconciled::Unchanged) => report.status_unchanged += 1,
            Ok(Reconciled::Untracked(remote)) => {
                warn!(
                    name = %record.name,
                    job_id = %record.remote_job_id,
                    remote_status = %remote,
                    "remote status outside tracked lifecycle, record left as is"
                );
                report.status_untracked += 1;
            }
            Err(err) => report.fail(CycleStep::Reconcile, &record.name, err),
        }
    }
}

pub fn reconcile_record(ctx: &mut CycleContext<'_>, record: &JobRecord) -> Result<Reconciled> {
    let remote = ctx
        .jobs
        .job_status(&record.remote_job_id)
        .with_context(|| format!("query status of job {}", record.remote_job_id))?;
    debug!(name = %record.name, remote_status = %remote, "remote status");
    match JobStatus::from_remote(&remote) {
        None => Ok(Reconciled::Untracked(remote)),
        Some(status) if status == record.status => Ok(Reconciled::Unchanged),
        Some(status) => {
            ctx.store.update_status(&record.name, status)?;
            Ok(Reconciled::Updated(status))
        }
    }
}

/// Step 2: move every `Completed` file to the completed collection.
pub fn relocate_completed(ctx: &mut CycleContext<'_>, report: &mut CycleReport) {
    let records = ctx.store.find(&Query::status(JobStatus::Completed));
    debug!(count = records.len(), "relocating completed jobs");
    for record in records {
        match relocate_record(ctx, &record) {
            Ok(Relocation::Moved) => {
                info!(name = %record.name, dest = %ctx.collections.completed, "moved into the completed collection");
                report.relocated += 1;
            }
            Ok(Relocation::AlreadyMoved) => {
                info!(name = %record.name, "already in the completed collection, dropped record");
                report.relocated += 1;
            }
            Err(err) => {
                if err
                    .downcast_ref::<StorageError>()
                    .is_some_and(StorageError::is_permission)
                {
                    error!(name = %record.name, "storage refused the move, probably a permissions issue");
                }
                report.fail(CycleStep::Relocate, &record.name, err);
            }
        }
    }
}

pub fn relocate_record(ctx: &mut CycleContext<'_>, record: &JobRecord) -> Result<Relocation> {
    let dest = &ctx.collections.completed;
    let outcome = match ctx.storage.move_object(&record.name, dest) {
        Ok(()) => Relocation::Moved,
        Err(err @ StorageError::NotFound { .. }) => {
            let (_, file_name) = split_path(&record.name);
            if !ctx.storage.exists(&record.name)?
                && ctx.storage.exists(&join_path(dest, file_name))?
            {
                Relocation::AlreadyMoved
            } else {
                return Err(err.into());
            }
        }
        Err(err) => return Err(err.into()),
    };
    ctx.store
        .remove(&record.name)
        .with_context(|| format!("drop record for relocated {}", record.name))?;
    Ok(outcome)
}

/// Step 3: dispatch every untracked object in the incoming collection.
pub fn discover_and_dispatch(ctx: &mut CycleContext<'_>, report: &mut CycleReport) {
    let incoming = ctx.collections.incoming.clone();
    let objects = match ctx.storage.list_objects(&incoming) {
        Ok(objects) => objects,
        Err(err) => {
            report.fail(
                CycleStep::Dispatch,
                &incoming,
                anyhow::Error::new(err).context("list incoming collection"),
            );
            return;
        }
    };
    debug!(count = objects.len(), collection = %incoming, "discovered objects");
    for object in objects {
        match dispatch_object(ctx, &object) {
            Ok(Dispatch::AlreadyTracked) => report.already_tracked += 1,
            Ok(Dispatch::Unhandled(_)) => report.unhandled += 1,
            Ok(Dispatch::Submitted(_)) => report.submitted += 1,
            Err(err) => report.fail(CycleStep::Dispatch, &object.path, err),
        }
    }
}

pub fn dispatch_object(ctx: &mut CycleContext<'_>, object: &ObjectRef) -> Result<Dispatch> {
    if !ctx.store.find(&Query::name(&object.path)).is_empty() {
        info!("Skipping {} because it's already been submitted", object.name);
        return Ok(Dispatch::AlreadyTracked);
    }
    let Some(extension) = object.extension() else {
        debug!(object = %object.path, "no extension, skipping");
        return Ok(Dispatch::Unhandled(None));
    };
    let handler = match ctx.registry.resolve(&extension) {
        Ok(handler) => handler,
        Err(unknown) => {
            debug!(object = %object.path, "{unknown}");
            return Ok(Dispatch::Unhandled(Some(extension)));
        }
    };

    info!("Launching {} job for {}", handler.label(), object.name);
    let record = handler.submit(
        object,
        &mut HandlerContext {
            jobs: ctx.jobs,
            store: &mut *ctx.store,
            output_dir: &ctx.collections.analyses,
        },
    )?;
    Ok(Dispatch::Submitted(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::default_handlers;
    use crate::io::jobs::AppTemplate;
    use crate::test_support::{FakeStorage, ScriptedJobClient};

    const INCOMING: &str = "/zone/incoming";
    const COMPLETED: &str = "/zone/data";

    fn collections() -> CollectionsConfig {
        CollectionsConfig {
            incoming: INCOMING.to_string(),
            completed: COMPLETED.to_string(),
            analyses: "/zone/analyses".to_string(),
        }
    }

    fn jobs() -> ScriptedJobClient {
        ScriptedJobClient::new().with_app(
            "Quaternion Classifier (Verssa)",
            AppTemplate {
                system_id: "de".to_string(),
                app_id: "qc".to_string(),
                parameter_id: "input".to_string(),
            },
        )
    }

    #[test]
    fn reconcile_failure_is_isolated_per_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = StatusStore::open(&temp.path().join("state.json")).expect("open");
        store
            .insert(JobRecord::new("/zone/incoming/a.qmg", "1", JobStatus::Submitted))
            .expect("insert");
        store
            .insert(JobRecord::new("/zone/incoming/b.qmg", "2", JobStatus::Running))
            .expect("insert");
        let jobs = jobs();
        jobs.fail_status_for("1");
        jobs.set_status("2", "Completed");
        let storage = FakeStorage::with_collections(&[INCOMING, COMPLETED]);
        let registry = HandlerRegistry::from_config(&default_handlers());
        let collections = collections();
        let mut ctx = CycleContext {
            store: &mut store,
            jobs: &jobs,
            storage: &storage,
            registry: &registry,
            collections: &collections,
        };

        let mut report = CycleReport::default();
        reconcile_in_flight(&mut ctx, &mut report);

        assert_eq!(report.status_changes, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, CycleStep::Reconcile);
        assert_eq!(report.failures[0].name, "/zone/incoming/a.qmg");
        assert_eq!(
            store.find(&Query::status(JobStatus::Completed))[0].name,
            "/zone/incoming/b.qmg"
        );
        assert_eq!(
            store.find(&Query::status(JobStatus::Submitted))[0].name,
            "/zone/incoming/a.qmg"
        );
    }

    #[test]
    fn failed_remote_state_leaves_record_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = StatusStore::open(&temp.path().join("state.json")).expect("open");
        let record = JobRecord::new("a", "7", JobStatus::Running);
        store.insert(record.clone()).expect("insert");
        let jobs = jobs();
        jobs.set_status("7", "Failed");
        let storage = FakeStorage::with_collections(&[INCOMING, COMPLETED]);
        let registry = HandlerRegistry::new();
        let collections = collections();
        let mut ctx = CycleContext {
            store: &mut store,
            jobs: &jobs,
            storage: &storage,
            registry: &registry,
            collections: &collections,
        };

        assert_eq!(
            reconcile_record(&mut ctx, &record).expect("reconcile"),
            Reconciled::Untracked("Failed".to_string())
        );
        assert_eq!(store.all(), &[record]);
    }

    #[test]
    fn permission_error_keeps_completed_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = StatusStore::open(&temp.path().join("state.json")).expect("open");
        let path = "/zone/incoming/a.qmg";
        store
            .insert(JobRecord::new(path, "1", JobStatus::Completed))
            .expect("insert");
        let storage = FakeStorage::with_collections(&[INCOMING, COMPLETED]);
        storage.add_object(path, b"data");
        storage.deny_moves_of(path);
        let jobs = jobs();
        let registry = HandlerRegistry::new();
        let collections = collections();
        let mut ctx = CycleContext {
            store: &mut store,
            jobs: &jobs,
            storage: &storage,
            registry: &registry,
            collections: &collections,
        };

        let mut report = CycleReport::default();
        relocate_completed(&mut ctx, &mut report);
        assert_eq!(report.relocated, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("permission denied"));
        assert_eq!(store.find(&Query::name(path)).len(), 1);

        storage.allow_moves_of(path);
        let mut ctx = CycleContext {
            store: &mut store,
            jobs: &jobs,
            storage: &storage,
            registry: &registry,
            collections: &collections,
        };
        let mut report = CycleReport::default();
        relocate_completed(&mut ctx, &mut report);
        assert_eq!(report.relocated, 1);
        assert!(store.all().is_empty());
    }

    #[test]
    fn already_moved_file_counts_as_relocated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = StatusStore::open(&temp.path().join("state.json")).expect("open");
        let record = JobRecord::new("/zone/incoming/a.qmg", "1", JobStatus::Completed);
        store.insert(record.clone()).expect("insert");
        let storage = FakeStorage::with_collections(&[INCOMING, COMPLETED]);
        storage.add_object("/zone/data/a.qmg", b"data");
        let jobs = jobs();
        let registry = HandlerRegistry::new();
        let collections = collections();
        let mut ctx = CycleContext {
            store: &mut store,
            jobs: &jobs,
            storage: &storage,
            registry: &registry,
            collections: &collections,
        };

        assert_eq!(
            relocate_record(&mut ctx, &record).expect("relocate"),
            Relocation::AlreadyMoved
        );
        assert!(store.all().is_empty());
        assert!(storage.moves().is_empty());
    }

    #[test]
    fn vanished_file_is_reported_and_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = StatusStore::open(&temp.path().join("state.json")).expect("open");
        let record = JobRecord::new("/zone/incoming/gone.qmg", "1", JobStatus::Completed);
        store.insert(record.clone()).expect("insert");
        let storage = FakeStorage::with_collections(&[INCOMING, COMPLETED]);
        let jobs = jobs();
        let registry = HandlerRegistry::new();
        let collections = collections();
        let mut ctx = CycleContext {
            store: &mut store,
            jobs: &jobs,
            storage: &storage,
            registry: &registry,
            collections: &collections,
        };

        let err = relocate_record(&mut ctx, &record).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::NotFound { .. })
        ));
        assert_eq!(store.all(), &[record]);
    }

    #[test]
    fn missing_incoming_collection_is_a_dispatch_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = StatusStore::open(&temp.path().join("state.json")).expect("open");
        let storage = FakeStorage::with_collections(&[COMPLETED]);
        let jobs = jobs();
        let registry = HandlerRegistry::from_config(&default_handlers());
        let collections = collections();
        let mut ctx = CycleContext {
            store: &mut store,
            jobs: &jobs,
            storage: &storage,
            registry: &registry,
            collections: &collections,
        };

        let report = run_cycle(&mut ctx);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, CycleStep::Dispatch);
        assert_eq!(report.failures[0].name, INCOMING);
    }

    #[test]
    fn extensionless_object_is_unhandled() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = StatusStore::open(&temp.path().join("state.json")).expect("open");
        let storage = FakeStorage::with_collections(&[INCOMING, COMPLETED]);
        let jobs = jobs();
        let registry = HandlerRegistry::from_config(&default_handlers());
        let collections = collections();
        let mut ctx = CycleContext {
            store: &mut store,
            jobs: &jobs,
            storage: &storage,
            registry: &registry,
            collections: &collections,
        };

        let outcome =
            dispatch_object(&mut ctx, &ObjectRef::from_path("/zone/incoming/README")).expect("dispatch");
        assert_eq!(outcome, Dispatch::Unhandled(None));
    }
}
