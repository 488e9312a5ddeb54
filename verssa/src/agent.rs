//! One agent invocation: guard, load state, connect, run a cycle.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::cycle::{CycleContext, CycleReport, run_cycle};
use crate::handlers::HandlerRegistry;
use crate::io::config::{AgentConfig, TerrainConfig};
use crate::io::instance_lock;
use crate::io::jobs::JobClient;
use crate::io::status_store::StatusStore;
use crate::io::storage::StorageClient;

/// Why `run_agent` returned without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(CycleReport),
    /// Another instance holds the lock; nothing was read or written.
    Locked,
}

/// Run a single cycle under the instance lock.
///
/// Startup order is fixed: the lock is taken before the store is opened, and
/// the store is opened before a remote session is attempted. Errors from
/// `connect` should carry a [`crate::io::terrain::SessionError`] so the CLI can
/// map them to their own exit code.
#[instrument(skip_all, fields(lock = %config.lock_path.display()))]
pub fn run_agent<J, F>(config: &AgentConfig, storage: &dyn StorageClient, connect: F) -> Result<RunOutcome>
where
    J: JobClient,
    F: FnOnce(&TerrainConfig) -> Result<J>,
{
    let Some(lock) = instance_lock::acquire(&config.lock_path)? else {
        warn!("another instance is running, exiting");
        return Ok(RunOutcome::Locked);
    };

    let mut store = StatusStore::open(&config.state_path)
        .with_context(|| format!("open status store {}", config.state_path.display()))?;
    let jobs = connect(&config.terrain)?;
    let registry = HandlerRegistry::from_config(&config.handlers);
    info!(
        records = store.all().len(),
        handlers = ?registry.extensions().collect::<Vec<_>>(),
        "agent ready"
    );

    let report = run_cycle(&mut CycleContext {
        store: &mut store,
        jobs: &jobs,
        storage,
        registry: &registry,
        collections: &config.collections,
    });
    drop(lock);
    Ok(RunOutcome::Completed(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::terrain::SessionError;
    use crate::test_support::{FakeStorage, ScriptedJobClient};

    fn config_in(dir: &std::path::Path) -> AgentConfig {
        AgentConfig {
            state_path: dir.join("state.json"),
            lock_path: dir.join("singleton.lock"),
            log_file: None,
            ..AgentConfig::default()
        }
    }

    #[test]
    fn locked_run_touches_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        let _held = instance_lock::acquire(&config.lock_path)
            .expect("acquire")
            .expect("free");

        let outcome = run_agent(&config, &FakeStorage::new(), |_| -> Result<ScriptedJobClient> {
            panic!("must not connect while locked")
        })
        .expect("run");

        assert_eq!(outcome, RunOutcome::Locked);
        assert!(!config.state_path.exists());
    }

    #[test]
    fn session_failure_surfaces_as_session_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());

        let err = run_agent(&config, &FakeStorage::new(), |_| -> Result<ScriptedJobClient> {
            Err(SessionError {
                reason: "bad password".to_string(),
            }
            .into())
        })
        .unwrap_err();

        assert!(err.downcast_ref::<SessionError>().is_some());
        // Lock is released on the error path.
        assert!(instance_lock::acquire(&config.lock_path).expect("acquire").is_some());
    }

    #[test]
    fn corrupt_store_fails_before_connecting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config_in(temp.path());
        std::fs::write(&config.state_path, "{not json").expect("write");

        let err = run_agent(&config, &FakeStorage::new(), |_| -> Result<ScriptedJobClient> {
            panic!("must not connect with a corrupt store")
        })
        .unwrap_err();

        assert!(format!("{err:#}").contains("open status store"));
    }
}
