//! File classification across the base, target, and current trees.
//!
//! The classifier compares presence and content hashes of every path in the
//! union of the three snapshots and assigns each exactly one
//! [`FileStatus`]. It is a pure function over the snapshots: no file content
//! is read and nothing is written.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::tree::TreeSnapshot;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How a path changed between the three trees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Nothing to migrate.
    Unchanged,
    /// New in target; absent from base and current. Copied verbatim.
    AddedInTarget,
    /// Present in base, gone from target.
    RemovedInTarget,
    /// Target changed the file and current differs from target. Merged.
    Modified,
    /// Only the developer has this file. Never touched.
    AddedByUser,
}

impl FileStatus {
    /// Whether the path is recorded in the manifest.
    pub fn is_migrated(self) -> bool {
        matches!(self, Self::AddedInTarget | Self::Modified)
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::AddedInTarget => write!(f, "added_in_target"),
            Self::RemovedInTarget => write!(f, "removed_in_target"),
            Self::Modified => write!(f, "modified"),
            Self::AddedByUser => write!(f, "added_by_user"),
        }
    }
}

/// Which trees contain a path.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Presence {
    pub base: bool,
    pub target: bool,
    pub current: bool,
}

/// The classification of one path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileClassification {
    pub path: String,
    pub status: FileStatus,
    pub presence: Presence,
}

impl FileClassification {
    /// A removed-in-target file the developer left exactly as generated.
    pub fn is_clean_removal(&self, base: &TreeSnapshot, current: &TreeSnapshot) -> bool {
        self.status == FileStatus::RemovedInTarget
            && self.presence.current
            && same_content(base, current, &self.path)
    }

    /// A removed-in-target file the developer edited; kept in place.
    pub fn is_retained_removal(&self, base: &TreeSnapshot, current: &TreeSnapshot) -> bool {
        self.status == FileStatus::RemovedInTarget
            && self.presence.current
            && !same_content(base, current, &self.path)
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Classify every path in the union of the three trees, sorted by path.
pub fn classify(
    base: &TreeSnapshot,
    target: &TreeSnapshot,
    current: &TreeSnapshot,
) -> Vec<FileClassification> {
    info!(
        base = base.len(),
        target = target.len(),
        current = current.len(),
        "classifying files"
    );

    let union: BTreeSet<&str> = base
        .paths()
        .chain(target.paths())
        .chain(current.paths())
        .collect();

    let classifications: Vec<FileClassification> = union
        .into_iter()
        .map(|path| {
            let presence = Presence {
                base: base.contains(path),
                target: target.contains(path),
                current: current.contains(path),
            };
            let status = status_for(path, presence, base, target, current);
            debug!(path, %status, "classified");
            FileClassification {
                path: path.to_string(),
                status,
                presence,
            }
        })
        .collect();

    info!(
        modified = count(&classifications, FileStatus::Modified),
        added = count(&classifications, FileStatus::AddedInTarget),
        removed = count(&classifications, FileStatus::RemovedInTarget),
        "classification complete"
    );
    classifications
}

fn status_for(
    path: &str,
    presence: Presence,
    base: &TreeSnapshot,
    target: &TreeSnapshot,
    current: &TreeSnapshot,
) -> FileStatus {
    match (presence.base, presence.target, presence.current) {
        (false, false, true) => FileStatus::AddedByUser,
        (false, true, false) => FileStatus::AddedInTarget,
        (false, true, true) => {
            if same_content(target, current, path) {
                FileStatus::Unchanged
            } else {
                FileStatus::Modified
            }
        }
        (true, false, _) => FileStatus::RemovedInTarget,
        (true, true, in_current) => {
            if same_content(base, target, path) {
                // Includes files the developer deleted: a target that did
                // not touch the file has nothing to say about that.
                FileStatus::Unchanged
            } else if in_current && same_content(target, current, path) {
                FileStatus::Unchanged
            } else {
                // Target changed a file the developer also changed or deleted.
                FileStatus::Modified
            }
        }
        (false, false, false) => FileStatus::Unchanged,
    }
}

fn same_content(a: &TreeSnapshot, b: &TreeSnapshot, path: &str) -> bool {
    match (a.get(path), b.get(path)) {
        (Some(x), Some(y)) => x.sha256 == y.sha256,
        _ => false,
    }
}

fn count(classifications: &[FileClassification], status: FileStatus) -> usize {
    classifications.iter().filter(|c| c.status == status).count()
}
