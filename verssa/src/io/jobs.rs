//! Remote job client abstraction.
//!
//! The [`JobClient`] trait decouples handlers and the cycle driver from the
//! analysis REST API. Tests use scripted clients that record calls without
//! touching the network.

use anyhow::Result;

/// Remote app resolved from a search term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTemplate {
    pub system_id: String,
    pub app_id: String,
    /// Identifier of the app's input parameter.
    pub parameter_id: String,
}

/// Parameters for one analysis submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    /// Analysis name shown by the remote system.
    pub name: String,
    pub system_id: String,
    pub app_id: String,
    pub parameter_id: String,
    /// Logical path of the file fed to the app's input parameter.
    pub input_path: String,
    pub output_dir: String,
    /// Ask the remote system to notify the owner on completion.
    pub notify: bool,
    pub debug: bool,
}

/// Remote response to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: String,
    pub status: String,
}

/// Abstraction over the remote job system.
pub trait JobClient {
    fn find_application(&self, search: &str) -> Result<AppTemplate>;
    fn submit(&self, request: &SubmitRequest) -> Result<Submission>;
    /// Current remote status string for `job_id`.
    fn job_status(&self, job_id: &str) -> Result<String>;
}
