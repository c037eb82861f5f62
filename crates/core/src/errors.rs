//! Error types for the scaffold-migrate core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and the
//! lifecycle-level [`SessionError`] unifies them for callers of the
//! migration commands. Every user-facing message names the offending path or
//! condition and, where one exists, the command that fixes it.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Session (lifecycle) errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the `start` / `status` / `resolve-conflicts` / `apply` /
/// `abandon` commands.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Project identity, revision, or platform state could not be determined.
    #[error("environment error: {0}")]
    Environment(String),

    /// The project directory is not under version control.
    #[error("'{0}' is not a git repository; migrations must start from a committed git baseline")]
    NotAGitRepo(PathBuf),

    /// A staging directory already exists, so a migration is in progress.
    #[error(
        "a migration is already in progress (staging directory '{0}' exists); \
         run `status` to inspect it, `apply` to finish it, or `abandon` to discard it"
    )]
    AlreadyStaged(PathBuf),

    /// The project has uncommitted changes.
    #[error(
        "project '{0}' has uncommitted changes; commit or stash them before running this command"
    )]
    DirtyWorkingTree(PathBuf),

    /// No staging directory exists.
    #[error("no migration in progress (staging directory '{0}' not found); run `start` first")]
    NoSession(PathBuf),

    /// The staging path exists but was not written by `start`.
    #[error(
        "'{0}' exists but is not a migration staging directory (no .migrate_manifest or .migrate/); \
         refusing to use or delete it; choose another staging directory"
    )]
    ForeignStagingDir(PathBuf),

    /// `apply` was requested while staged files still carry conflicts.
    #[error(
        "{} file(s) still have unresolved conflicts: {}; resolve conflicts, then run `apply`",
        .paths.len(),
        .paths.join(", ")
    )]
    UnresolvedConflicts { paths: Vec<String> },

    /// Applying a staged file onto the project failed.
    #[error("failed to apply '{path}' to the project: {source}")]
    Apply {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Scaffold(#[from] ScaffoldError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Tree errors
// ---------------------------------------------------------------------------

/// Errors while snapshotting a file tree.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The tree root does not exist or is not a directory.
    #[error("tree root '{0}' does not exist or is not a directory")]
    MissingRoot(PathBuf),

    /// An entry inside the tree could not be read.
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from the per-file merge stage.
#[derive(Debug, Error)]
pub enum MergeError {
    /// A worker merging a file panicked or was cancelled.
    #[error("merge of '{path}' did not complete: {detail}")]
    Incomplete { path: String, detail: String },

    /// Reading one of the merge inputs failed.
    #[error("failed to read merge input '{path}': {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Scaffold generator errors
// ---------------------------------------------------------------------------

/// Reference scaffold generation failures.
#[derive(Debug, Error)]
pub enum ScaffoldError {
    /// The generator process could not be started.
    #[error("failed to launch scaffold generator '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The generator exited unsuccessfully.
    #[error("scaffold generation for revision '{revision}' failed (exit {exit_code}): {stderr}")]
    Failed {
        revision: String,
        exit_code: i32,
        stderr: String,
    },

    /// The generator did not finish in time.
    #[error("scaffold generation for revision '{revision}' timed out after {secs}s")]
    TimedOut { revision: String, secs: u64 },

    /// The generator produced no usable tree.
    #[error("scaffold generator produced no files for revision '{0}'")]
    EmptyTree(String),

    /// A template repository lookup failed.
    #[error("scaffold template error: {0}")]
    Vcs(#[from] VcsError),

    /// A blocking export task panicked or was cancelled.
    #[error("scaffold export task failed: {0}")]
    Task(String),

    /// Filesystem error while preparing the output tree.
    #[error("scaffold I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Staging errors
// ---------------------------------------------------------------------------

/// Errors while materializing the staging directory.
#[derive(Debug, Error)]
pub enum StagingError {
    /// A single staged file could not be written. Earlier writes are kept.
    #[error(
        "failed to stage '{path}': {source}; remove the staging directory and re-run `start`"
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A background write task failed to complete.
    #[error("staging task for '{path}' did not complete: {detail}")]
    Task { path: String, detail: String },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

// ---------------------------------------------------------------------------
// Manifest errors
// ---------------------------------------------------------------------------

/// Errors reading or writing the staging manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// JSON (de)serialization failure.
    #[error("manifest parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The temporary manifest could not be persisted over the final path.
    #[error("failed to persist manifest '{path}': {detail}")]
    Persist { path: PathBuf, detail: String },

    /// The staging directory could not be rescanned.
    #[error("failed to rescan staging directory: {0}")]
    Rescan(#[from] TreeError),

    /// Generic I/O error.
    #[error("manifest I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Version control errors
// ---------------------------------------------------------------------------

/// Errors from the version-control interface.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A revision could not be resolved.
    #[error("git revision not found: {0}")]
    RevisionNotFound(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
