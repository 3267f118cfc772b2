//! Database access: schema bootstrap, checkpoint store, version registry

pub mod bootstrap;
pub mod checkpoints;
pub mod tables;
pub mod versions;

pub use bootstrap::{connect_with_retry, ensure_schema};
pub use checkpoints::{CheckpointStore, PhaseStatus};
pub use versions::VersionRegistry;
