//! Submission handlers and the extension-keyed registry.
//!
//! A handler is the only component that creates job records. Supporting a new
//! analysis pipeline means registering another handler (or adding a
//! `[handlers.<ext>]` table to the config); the cycle driver never changes.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{JobRecord, JobStatus, ObjectRef};
use crate::io::config::HandlerConfig;
use crate::io::jobs::{JobClient, SubmitRequest};
use crate::io::status_store::StatusStore;

/// No handler is registered for the extension.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no handler registered for extension {extension:?}")]
pub struct UnknownHandler {
    pub extension: String,
}

/// Collaborators handed to a handler for one submission.
pub struct HandlerContext<'a> {
    pub jobs: &'a dyn JobClient,
    pub store: &'a mut StatusStore,
    /// Output directory for submitted analyses.
    pub output_dir: &'a str,
}

/// Submits one discovered object to a remote analysis pipeline.
///
/// On success exactly one job record keyed by `object.path` has been inserted
/// and is returned. On failure nothing has been inserted; the error is
/// returned as a value for the driver to log.
pub trait Handler {
    fn label(&self) -> &str;
    fn submit(&self, object: &ObjectRef, ctx: &mut HandlerContext<'_>) -> Result<JobRecord>;
}

/// Handler for a Terrain app located by a fixed search term.
#[derive(Debug, Clone)]
pub struct AnalysisHandler {
    app_search: String,
    job_name: String,
}

impl AnalysisHandler {
    pub fn new(app_search: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            app_search: app_search.into(),
            job_name: job_name.into(),
        }
    }

    pub fn from_config(cfg: &HandlerConfig) -> Self {
        Self::new(&cfg.app_search, &cfg.job_name)
    }
}

impl Handler for AnalysisHandler {
    fn label(&self) -> &str {
        &self.job_name
    }

    #[instrument(skip_all, fields(handler = %self.job_name, object = %object.path))]
    fn submit(&self, object: &ObjectRef, ctx: &mut HandlerContext<'_>) -> Result<JobRecord> {
        let app = ctx
            .jobs
            .find_application(&self.app_search)
            .with_context(|| format!("find app {:?}", self.app_search))?;
        debug!(system_id = %app.system_id, app_id = %app.app_id, parameter_id = %app.parameter_id, "app template");

        let submission = ctx
            .jobs
            .submit(&SubmitRequest {
                name: self.job_name.clone(),
                system_id: app.system_id,
                app_id: app.app_id,
                parameter_id: app.parameter_id,
                input_path: object.path.clone(),
                output_dir: ctx.output_dir.to_string(),
                notify: true,
                debug: false,
            })
            .context("submit analysis")?;

        let status = JobStatus::from_remote(&submission.status).unwrap_or_else(|| {
            warn!(remote_status = %submission.status, "untracked submission status, recording as Submitted");
            JobStatus::Submitted
        });
        let record = JobRecord::new(&object.path, submission.job_id, status);
        ctx.store
            .insert(record.clone())
            .with_context(|| format!("record job {} for {}", record.remote_job_id, record.name))?;
        info!(job_id = %record.remote_job_id, "added new entry with name {}", record.name);
        Ok(record)
    }
}

/// Extension to handler bindings, resolved at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry declared in the `[handlers]` config table.
    pub fn from_config(handlers: &BTreeMap<String, HandlerConfig>) -> Self {
        let mut registry = Self::new();
        for (extension, cfg) in handlers {
            registry.register(extension, AnalysisHandler::from_config(cfg));
        }
        registry
    }

    /// Bind `extension` (matched case-insensitively, without a dot).
    pub fn register(&mut self, extension: &str, handler: impl Handler + 'static) {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        debug!(extension = %extension, handler = handler.label(), "handler registered");
        self.handlers.insert(extension, Box::new(handler));
    }

    pub fn resolve(&self, extension: &str) -> Result<&dyn Handler, UnknownHandler> {
        self.handlers
            .get(&extension.to_ascii_lowercase())
            .map(|handler| handler.as_ref())
            .ok_or_else(|| UnknownHandler {
                extension: extension.to_string(),
            })
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::query::Query;
    use crate::io::config::default_handlers;
    use crate::io::jobs::AppTemplate;
    use crate::test_support::ScriptedJobClient;

    fn quaternion_app() -> AppTemplate {
        AppTemplate {
            system_id: "de".to_string(),
            app_id: "qc-app".to_string(),
            parameter_id: "qc-input".to_string(),
        }
    }

    #[test]
    fn default_registry_resolves_configured_extensions() {
        let registry = HandlerRegistry::from_config(&default_handlers());
        assert_eq!(
            registry.resolve("QMG").expect("qmg").label(),
            "QuaternionClassifierAutomation"
        );
        assert_eq!(
            registry.resolve("pmg2").expect("pmg2").label(),
            "PowerStateClassifierAutomation"
        );
        assert_eq!(
            registry.resolve("xyz").err(),
            Some(UnknownHandler {
                extension: "xyz".to_string()
            })
        );
        assert_eq!(registry.extensions().collect::<Vec<_>>(), vec!["pmg2", "qmg"]);
    }

    #[test]
    fn submit_inserts_record_keyed_by_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = StatusStore::open(&temp.path().join("state.json")).expect("open");
        let jobs = ScriptedJobClient::new().with_app("Quaternion Classifier (Verssa)", quaternion_app());
        let handler = AnalysisHandler::new(
            "Quaternion Classifier (Verssa)",
            "QuaternionClassifierAutomation",
        );

        let object = ObjectRef::from_path("/zone/in/sample.qmg");
        let record = handler
            .submit(
                &object,
                &mut HandlerContext {
                    jobs: &jobs,
                    store: &mut store,
                    output_dir: "/zone/analyses",
                },
            )
            .expect("submit");

        assert_eq!(record.status, JobStatus::Submitted);
        assert_eq!(store.find(&Query::name("/zone/in/sample.qmg")), vec![record]);
        let submissions = jobs.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].parameter_id, "qc-input");
        assert_eq!(submissions[0].input_path, "/zone/in/sample.qmg");
        assert_eq!(submissions[0].output_dir, "/zone/analyses");
        assert!(submissions[0].notify);
    }

    #[test]
    fn failed_lookup_leaves_no_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut store = StatusStore::open(&temp.path().join("state.json")).expect("open");
        let jobs = ScriptedJobClient::new();
        let handler = AnalysisHandler::new("Missing App", "MissingAutomation");

        let err = handler
            .submit(
                &ObjectRef::from_path("/zone/in/sample.qmg"),
                &mut HandlerContext {
                    jobs: &jobs,
                    store: &mut store,
                    output_dir: "/zone/analyses",
                },
            )
            .unwrap_err();

        assert!(format!("{err:#}").contains("Missing App"));
        assert!(store.all().is_empty());
        assert!(jobs.submissions().is_empty());
    }
}
