//! Predicates over job records used by [`StatusStore::find`].
//!
//! [`StatusStore::find`]: crate::io::status_store::StatusStore::find

use crate::core::types::{JobRecord, JobStatus};

/// Equality predicate on a record field, or a disjunction of predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Exact, case-sensitive match on `name`.
    Name(String),
    Status(JobStatus),
    Any(Vec<Query>),
}

impl Query {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn status(status: JobStatus) -> Self {
        Self::Status(status)
    }

    pub fn any(queries: impl IntoIterator<Item = Query>) -> Self {
        Self::Any(queries.into_iter().collect())
    }

    /// Records whose remote job has not finished yet.
    pub fn in_flight() -> Self {
        Self::any([
            Self::status(JobStatus::Submitted),
            Self::status(JobStatus::Running),
        ])
    }

    pub fn matches(&self, record: &JobRecord) -> bool {
        match self {
            Self::Name(name) => record.name == *name,
            Self::Status(status) => record.status == *status,
            Self::Any(queries) => queries.iter().any(|query| query.matches(record)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_match_is_exact_and_case_sensitive() {
        let record = JobRecord::new("/in/Sample.qmg", "1", JobStatus::Running);
        assert!(Query::name("/in/Sample.qmg").matches(&record));
        assert!(!Query::name("/in/sample.qmg").matches(&record));
        assert!(!Query::name("Sample.qmg").matches(&record));
    }

    #[test]
    fn in_flight_covers_submitted_and_running() {
        let query = Query::in_flight();
        assert!(query.matches(&JobRecord::new("a", "1", JobStatus::Submitted)));
        assert!(query.matches(&JobRecord::new("b", "2", JobStatus::Running)));
        assert!(!query.matches(&JobRecord::new("c", "3", JobStatus::Completed)));
    }

    #[test]
    fn empty_disjunction_matches_nothing() {
        let record = JobRecord::new("a", "1", JobStatus::Running);
        assert!(!Query::any(Vec::new()).matches(&record));
    }
}
