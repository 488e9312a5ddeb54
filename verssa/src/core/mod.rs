//! Deterministic, pure logic shared by the agent and the validator.
//!
//! Core modules must be free of filesystem and network side effects. They
//! operate on in-memory data (or a caller-supplied reader) and return
//! deterministic outputs suitable for tests.

pub mod fits;
pub mod header_rules;
pub mod query;
pub mod types;
