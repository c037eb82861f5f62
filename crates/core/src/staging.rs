//! Materializing a migration result into the staging directory.
//!
//! Every staged file is written by its own task on a [`JoinSet`]. All tasks
//! are drained before returning; the first failure is reported and files
//! already written stay in place so the developer can inspect them.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use crate::errors::StagingError;
use crate::manifest::{sidecar_path, Manifest, INTERNAL_DIR};
use crate::merge::MergeResult;
use crate::migration::MigrationResult;

/// Counts of what a staging run wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingReport {
    pub staging_root: PathBuf,
    /// Merged files written.
    pub merged: usize,
    /// Target-only files copied.
    pub added: usize,
    /// Staged files carrying conflicts.
    pub conflicts: usize,
    /// Binary conflict sidecars written.
    pub sidecars: usize,
    /// Clean removals recorded for apply.
    pub removed: usize,
    /// Target removals left in place because the developer edited them.
    pub retained: usize,
}

impl fmt::Display for StagingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "staged {} merged and {} added file(s) in {} ({} conflict(s), {} removal(s)",
            self.merged,
            self.added,
            self.staging_root.display(),
            self.conflicts,
            self.removed
        )?;
        if self.retained > 0 {
            write!(f, ", {} retained", self.retained)?;
        }
        write!(f, ")")
    }
}

/// What one write task produced.
enum Staged {
    Merged { conflict: bool, sidecar: bool },
    Added,
}

/// Writes staged files and the manifest under one staging root.
#[derive(Debug, Clone)]
pub struct StagingWriter {
    staging_root: PathBuf,
}

impl StagingWriter {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Write every merged and added file, then the manifest.
    ///
    /// Re-running with the same inputs produces the same directory contents.
    #[instrument(skip_all, fields(root = %self.staging_root.display()))]
    pub async fn write(
        &self,
        manifest: &Manifest,
        result: &MigrationResult,
    ) -> Result<StagingReport, StagingError> {
        // The internal directory marks the root as ours before any file lands.
        let internal = self.staging_root.join(INTERNAL_DIR);
        tokio::fs::create_dir_all(&internal)
            .await
            .map_err(|source| StagingError::Write {
                path: internal.display().to_string(),
                source,
            })?;

        let mut tasks = JoinSet::new();

        for merge in &result.merge_results {
            let root = self.staging_root.clone();
            let merge = merge.clone();
            tasks.spawn(async move { stage_merge(&root, &merge).await });
        }
        for added in &result.added_files {
            let dest = self.staging_root.join(&added.path);
            let source_file = added.source_file.clone();
            let path = added.path.clone();
            tasks.spawn(async move {
                ensure_parent(&dest, &path).await?;
                tokio::fs::copy(&source_file, &dest)
                    .await
                    .map_err(|source| StagingError::Write { path, source })?;
                Ok(Staged::Added)
            });
        }

        let mut report = StagingReport {
            staging_root: self.staging_root.clone(),
            removed: result.removed_files.len(),
            retained: result.retained_removals.len(),
            ..StagingReport::default()
        };
        let mut first_error: Option<StagingError> = None;

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(StagingError::Task {
                    path: self.staging_root.display().to_string(),
                    detail: e.to_string(),
                })
            });
            match outcome {
                Ok(Staged::Merged { conflict, sidecar }) => {
                    report.merged += 1;
                    report.conflicts += usize::from(conflict);
                    report.sidecars += usize::from(sidecar);
                }
                Ok(Staged::Added) => report.added += 1,
                Err(e) => {
                    error!(error = %e, "staging write failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        manifest.write(&self.staging_root)?;
        info!(
            merged = report.merged,
            added = report.added,
            conflicts = report.conflicts,
            "staging complete"
        );
        Ok(report)
    }
}

async fn stage_merge(root: &Path, merge: &MergeResult) -> Result<Staged, StagingError> {
    let path = merge.path().to_string();
    let dest = root.join(&path);
    ensure_parent(&dest, &path).await?;
    tokio::fs::write(&dest, merge.content_bytes())
        .await
        .map_err(|source| StagingError::Write {
            path: path.clone(),
            source,
        })?;

    let mut sidecar_written = false;
    if let MergeResult::Binary {
        has_conflict,
        theirs_bytes,
        ..
    } = merge
    {
        let sidecar = sidecar_path(root, &path);
        match (has_conflict, theirs_bytes) {
            (true, Some(theirs)) => {
                ensure_parent(&sidecar, &path).await?;
                tokio::fs::write(&sidecar, theirs)
                    .await
                    .map_err(|source| StagingError::Write {
                        path: path.clone(),
                        source,
                    })?;
                sidecar_written = true;
            }
            _ => {
                if tokio::fs::try_exists(&sidecar).await.unwrap_or(false) {
                    tokio::fs::remove_file(&sidecar)
                        .await
                        .map_err(|source| StagingError::Write {
                            path: path.clone(),
                            source,
                        })?;
                }
            }
        }
    }

    debug!(path = %path, conflict = merge.has_conflict(), "staged");
    Ok(Staged::Merged {
        conflict: merge.has_conflict(),
        sidecar: sidecar_written,
    })
}

async fn ensure_parent(dest: &Path, rel_path: &str) -> Result<(), StagingError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StagingError::Write {
                path: rel_path.to_string(),
                source,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{FileClassification, FileStatus, Presence};
    use crate::manifest::{ManifestMetadata, MANIFEST_FILE};
    use crate::migration::FilePendingMigration;

    fn sample(target_dir: &Path) -> (Manifest, MigrationResult) {
        std::fs::write(target_dir.join("gradlew"), "#!/bin/sh\n").unwrap();
        let result = MigrationResult {
            merge_results: vec![
                MergeResult::Text {
                    path: "lib/main.txt".into(),
                    merged_content: "merged\n".into(),
                    has_conflict: false,
                },
                MergeResult::Binary {
                    path: "assets/icon.png".into(),
                    merged_bytes: vec![0, 1, 2],
                    has_conflict: true,
                    theirs_bytes: Some(vec![0, 9, 9]),
                },
            ],
            added_files: vec![FilePendingMigration {
                path: "android/gradlew".into(),
                source_file: target_dir.join("gradlew"),
            }],
            removed_files: vec!["old.txt".into()],
            ..MigrationResult::default()
        };
        let classifications: Vec<FileClassification> = [
            ("lib/main.txt", FileStatus::Modified),
            ("assets/icon.png", FileStatus::Modified),
            ("android/gradlew", FileStatus::AddedInTarget),
        ]
        .into_iter()
        .map(|(path, status)| FileClassification {
            path: path.into(),
            status,
            presence: Presence::default(),
        })
        .collect();
        let manifest = Manifest::build(ManifestMetadata::default(), &classifications, &result);
        (manifest, result)
    }

    #[tokio::test]
    async fn test_write_stages_files_and_manifest() {
        let target = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let (manifest, result) = sample(target.path());

        let report = StagingWriter::new(staging.path())
            .write(&manifest, &result)
            .await
            .unwrap();

        assert_eq!(report.merged, 2);
        assert_eq!(report.added, 1);
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.sidecars, 1);
        assert_eq!(report.removed, 1);

        let root = staging.path();
        assert_eq!(std::fs::read_to_string(root.join("lib/main.txt")).unwrap(), "merged\n");
        assert_eq!(std::fs::read(root.join("assets/icon.png")).unwrap(), vec![0, 1, 2]);
        assert_eq!(
            std::fs::read(sidecar_path(root, "assets/icon.png")).unwrap(),
            vec![0, 9, 9]
        );
        assert!(root.join("android/gradlew").exists());
        assert!(root.join(MANIFEST_FILE).exists());

        let scan = Manifest::read(root).unwrap().scan_conflicts(root).unwrap();
        assert_eq!(scan.conflicting, vec!["assets/icon.png"]);
    }

    #[tokio::test]
    async fn test_write_is_idempotent() {
        let target = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let (manifest, result) = sample(target.path());
        let writer = StagingWriter::new(staging.path());

        writer.write(&manifest, &result).await.unwrap();
        let first = std::fs::read(staging.path().join(MANIFEST_FILE)).unwrap();
        writer.write(&manifest, &result).await.unwrap();
        let second = std::fs::read(staging.path().join(MANIFEST_FILE)).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            std::fs::read_to_string(staging.path().join("lib/main.txt")).unwrap(),
            "merged\n"
        );
    }

    #[tokio::test]
    async fn test_missing_source_reports_path() {
        let staging = tempfile::tempdir().unwrap();
        let result = MigrationResult {
            added_files: vec![FilePendingMigration {
                path: "ios/missing.plist".into(),
                source_file: PathBuf::from("/nonexistent/missing.plist"),
            }],
            ..MigrationResult::default()
        };
        let manifest = Manifest::build(ManifestMetadata::default(), &[], &result);

        let err = StagingWriter::new(staging.path())
            .write(&manifest, &result)
            .await
            .unwrap_err();
        match err {
            StagingError::Write { path, .. } => assert_eq!(path, "ios/missing.plist"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!staging.path().join(MANIFEST_FILE).exists());
        // A failed run still leaves a root that abandon recognizes.
        assert!(crate::manifest::is_staging_dir(staging.path()));
    }

    #[test]
    fn test_report_display() {
        let report = StagingReport {
            staging_root: PathBuf::from("/p/migrate_working_dir"),
            merged: 3,
            added: 1,
            conflicts: 2,
            removed: 1,
            retained: 1,
            ..StagingReport::default()
        };
        let text = report.to_string();
        assert!(text.contains("3 merged"));
        assert!(text.contains("2 conflict(s)"));
        assert!(text.contains("1 retained"));
    }
}
