//! Polling automation agent for remote analysis jobs.
//!
//! Each invocation runs a single cycle: reconcile in-flight jobs against the
//! remote job system, relocate files whose jobs completed, then discover and
//! dispatch newly uploaded files to the handler registered for their type. A
//! companion validator checks FITS headers in a separate collection.
//!
//! - **[`core`]**: Pure, deterministic logic (record types, queries, FITS
//!   header parsing and rules). No I/O.
//! - **[`io`]**: Side-effecting adapters (status store, instance lock,
//!   storage, remote job API, notifications), isolated behind traits so the
//!   driver can be exercised with fakes.
//!
//! Orchestration modules ([`agent`], [`cycle`], [`validate`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod agent;
pub mod core;
pub mod cycle;
pub mod exit_codes;
pub mod handlers;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
