//! FITS header validation pass over the observation collections.
//!
//! Every object in each sub-collection of the validation root is checked once.
//! Passing objects are tagged `validated=true` plus one attribute per required
//! keyword. Failing objects get a `<name>.err` companion in the quarantine
//! collection and are moved next to it. A summary of failures is mailed at the
//! end of the pass.

use anyhow::{Context, Result, bail};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::fits::read_primary_header;
use crate::core::header_rules::{Verdict, evaluate};
use crate::core::types::ObjectRef;
use crate::io::config::{AgentConfig, ValidationConfig};
use crate::io::instance_lock;
use crate::io::notify::Notifier;
use crate::io::storage::{StorageClient, join_path, split_path};

/// Attribute set on objects that passed validation.
pub const VALIDATED_KEY: &str = "validated";

const SUMMARY_TEMPLATE: &str = include_str!("templates/validation_summary.txt");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    /// Object or collection path as it was before any quarantine move.
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub validated: u32,
    pub already_validated: u32,
    pub failures: Vec<ValidationFailure>,
    pub notified: bool,
}

/// Result of checking one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOutcome {
    AlreadyValidated,
    Validated,
    Quarantined(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorOutcome {
    Completed(ValidationReport),
    Locked,
}

/// Run a validation pass under the shared instance lock and mail the summary.
#[instrument(skip_all)]
pub fn run_validator(
    config: &AgentConfig,
    storage: &dyn StorageClient,
    notifier: &dyn Notifier,
) -> Result<ValidatorOutcome> {
    let Some(lock) = instance_lock::acquire(&config.lock_path)? else {
        warn!("another instance is running, exiting");
        return Ok(ValidatorOutcome::Locked);
    };
    let mut report = run_validation(&config.validation, storage)?;
    report.notified = match notify_failures(
        &report,
        &config.validation,
        notifier,
        &config.notify.subject,
    ) {
        Ok(sent) => sent,
        Err(err) => {
            error!(error = %format!("{err:#}"), "failed to send validation summary");
            false
        }
    };
    drop(lock);
    Ok(ValidatorOutcome::Completed(report))
}

/// Check every object below `cfg.root`, skipping the quarantine collection.
///
/// Only a missing root or quarantine collection is fatal; per-object errors are
/// recorded in the report and the pass continues.
pub fn run_validation(cfg: &ValidationConfig, storage: &dyn StorageClient) -> Result<ValidationReport> {
    let quarantine = cfg.quarantine_collection();
    if !storage
        .exists(&quarantine)
        .with_context(|| format!("check quarantine collection {quarantine}"))?
    {
        bail!("quarantine collection {quarantine} does not exist");
    }
    let collections = storage
        .list_collections(&cfg.root)
        .with_context(|| format!("list collections under {}", cfg.root))?;

    let mut report = ValidationReport::default();
    for collection in collections {
        if split_path(&collection).1.contains(&cfg.quarantine) {
            debug!(collection = %collection, "skipping quarantine collection");
            continue;
        }
        let objects = match storage.list_objects(&collection) {
            Ok(objects) => objects,
            Err(err) => {
                error!(collection = %collection, error = %err, "cannot list collection");
                report.failures.push(ValidationFailure {
                    path: collection,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        for object in objects {
            match validate_object(storage, &object, &quarantine) {
                Ok(ObjectOutcome::AlreadyValidated) => report.already_validated += 1,
                Ok(ObjectOutcome::Validated) => {
                    info!(object = %object.path, "validated");
                    report.validated += 1;
                }
                Ok(ObjectOutcome::Quarantined(reason)) => {
                    warn!(object = %object.path, reason = %reason, "quarantined");
                    report.failures.push(ValidationFailure {
                        path: object.path,
                        reason,
                    });
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    error!(object = %object.path, error = %reason, "validation failed");
                    report.failures.push(ValidationFailure {
                        path: object.path,
                        reason,
                    });
                }
            }
        }
    }
    info!(
        validated = report.validated,
        already_validated = report.already_validated,
        failures = report.failures.len(),
        "validation pass complete"
    );
    Ok(report)
}

pub fn validate_object(
    storage: &dyn StorageClient,
    object: &ObjectRef,
    quarantine: &str,
) -> Result<ObjectOutcome> {
    if !storage.metadata(&object.path, VALIDATED_KEY)?.is_empty() {
        return Ok(ObjectOutcome::AlreadyValidated);
    }

    let reader = storage.open_object(&object.path)?;
    let verdict = match read_primary_header(reader) {
        Ok(header) => evaluate(&header, &object.name),
        Err(err) => Verdict::Invalid(format!("ERROR: no header info? ({err})")),
    };

    match verdict {
        Verdict::Valid(tags) => {
            storage.add_metadata(&object.path, VALIDATED_KEY, "true")?;
            for (key, value) in tags {
                storage.add_metadata(&object.path, &key, &value)?;
            }
            Ok(ObjectOutcome::Validated)
        }
        Verdict::Invalid(reason) => {
            let err_path = join_path(quarantine, &format!("{}.err", object.name));
            storage
                .create_object(&err_path, format!("{reason}\n").as_bytes())
                .with_context(|| format!("write {err_path}"))?;
            storage
                .move_object(&object.path, quarantine)
                .with_context(|| format!("quarantine {}", object.path))?;
            Ok(ObjectOutcome::Quarantined(reason))
        }
    }
}

/// Mail the failure summary. Returns whether a message was sent.
pub fn notify_failures(
    report: &ValidationReport,
    cfg: &ValidationConfig,
    notifier: &dyn Notifier,
    subject: &str,
) -> Result<bool> {
    if report.failures.is_empty() {
        return Ok(false);
    }
    let body = render_summary(report, cfg)?;
    notifier.send(subject, &body)?;
    Ok(true)
}

pub fn render_summary(report: &ValidationReport, cfg: &ValidationConfig) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("validation_summary", SUMMARY_TEMPLATE)
        .context("parse validation summary template")?;
    let rendered = env
        .get_template("validation_summary")?
        .render(context! {
            root => &cfg.root,
            quarantine => cfg.quarantine_collection(),
            failures => &report.failures,
        })
        .context("render validation summary")?;
    Ok(rendered)
}
