//! Stable exit codes for verssa CLI commands.

/// Command completed (per-item failures are logged, not reflected here).
pub const OK: i32 = 0;
/// Invalid config, corrupt status store, or any other startup error.
pub const INVALID: i32 = 1;
/// Another instance holds the single-instance lock.
pub const LOCKED: i32 = 2;
/// The remote session or auth token could not be established.
pub const SESSION: i32 = 3;
