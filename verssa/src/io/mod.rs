//! I/O adapters for verssa commands.

pub mod config;
pub mod instance_lock;
pub mod jobs;
pub mod notify;
pub mod status_store;
pub mod storage;
pub mod terrain;
