//! The aggregate produced by one `start` run and consumed by staging.

use std::path::PathBuf;

use crate::merge::MergeResult;

/// A target-only file copied verbatim into staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePendingMigration {
    /// Project-relative path.
    pub path: String,
    /// The file inside the generated target tree.
    pub source_file: PathBuf,
}

/// Everything a `start` run computed, ready to be staged.
#[derive(Debug, Clone, Default)]
pub struct MigrationResult {
    pub merge_results: Vec<MergeResult>,
    pub added_files: Vec<FilePendingMigration>,
    /// Files the target removed and the developer never edited.
    pub removed_files: Vec<String>,
    /// Files the target removed that the developer edited; left in place.
    pub retained_removals: Vec<String>,
    /// Generated trees kept on disk after staging.
    pub temp_directories: Vec<PathBuf>,
}

impl MigrationResult {
    pub fn conflict_count(&self) -> usize {
        self.merge_results.iter().filter(|r| r.has_conflict()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.merge_results.is_empty() && self.added_files.is_empty() && self.removed_files.is_empty()
    }
}
