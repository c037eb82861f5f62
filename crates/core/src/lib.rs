//! scaffold-migrate core library.
//!
//! This crate migrates a project's generated scaffold from one toolkit
//! revision to another while preserving the developer's edits: tree
//! snapshots and file policy, three-tree classification, per-file merging,
//! the staging directory and its manifest, and the migration lifecycle.

pub mod classify;
pub mod config;
pub mod errors;
pub mod manifest;
pub mod merge;
pub mod metadata;
pub mod migration;
pub mod policy;
pub mod scaffold;
pub mod session;
pub mod staging;
pub mod tree;
pub mod vcs;

// Re-exports for convenience.
pub use config::MigrateConfig;
pub use errors::SessionError;
pub use scaffold::{ConfiguredGenerator, ScaffoldGenerator};
pub use session::{
    AbandonCommand, ApplyCommand, CommandOutcome, MigrationCommand, MigrationContext,
    ResolveConflictsCommand, StartCommand, StartOptions, StatusCommand,
};
pub use vcs::{GitVcs, VersionControl};
