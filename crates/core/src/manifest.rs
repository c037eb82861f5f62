//! The staging manifest.
//!
//! A JSON file at the staging root recording, per staged path, how it was
//! classified and whether it conflicted when staged, plus the revisions and
//! options that produced the session. The manifest is a cache of what the
//! staging directory itself says: conflict state is always recomputed from
//! the staged files by [`Manifest::scan_conflicts`], and a missing, corrupt,
//! or older manifest is rebuilt by [`Manifest::rescan`].

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::{FileClassification, FileStatus};
use crate::errors::ManifestError;
use crate::merge::{has_conflict_markers, is_binary, MergeResult};
use crate::migration::MigrationResult;
use crate::policy::FilePolicy;
use crate::tree::{sha256_hex, TreeSnapshot};

/// Manifest file name at the staging root.
pub const MANIFEST_FILE: &str = ".migrate_manifest";

/// Internal directory at the staging root; never applied to the project.
pub const INTERNAL_DIR: &str = ".migrate";

/// Current manifest layout version.
pub const MANIFEST_VERSION: u32 = 1;

/// Where the target bytes of a binary conflict are kept.
pub fn sidecar_path(staging_root: &Path, rel_path: &str) -> PathBuf {
    staging_root.join(INTERNAL_DIR).join("theirs").join(rel_path)
}

/// Whether `path` was created by a staging run: it holds the manifest or
/// the internal directory.
pub fn is_staging_dir(path: &Path) -> bool {
    path.join(MANIFEST_FILE).is_file() || path.join(INTERNAL_DIR).is_dir()
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Session-wide facts recorded alongside the entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestMetadata {
    pub base_revision: Option<String>,
    pub target_revision: Option<String>,
    pub platforms: Vec<String>,
    pub prefer_two_way_merge: bool,
    pub used_fallback_base_revision: bool,
}

/// How a staged file was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Line-merged text; conflicts are marker blocks.
    Text,
    /// Whole-file binary; conflicts carry a target sidecar.
    Binary,
    /// Copied verbatim from the target tree.
    Copied,
}

/// One staged path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub status: FileStatus,
    pub kind: ContentKind,
    /// Conflict state at staging time. Never trusted on its own.
    pub conflict: bool,
    /// SHA-256 of the staged bytes of a binary conflict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_sha256: Option<String>,
}

/// The on-disk manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(flatten)]
    pub metadata: ManifestMetadata,
    pub entries: BTreeMap<String, ManifestEntry>,
    #[serde(default)]
    pub removed_files: Vec<String>,
    #[serde(default)]
    pub retained_removals: Vec<String>,
    #[serde(default)]
    pub temp_directories: Vec<PathBuf>,
}

/// Conflict state recomputed from the staging directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictScan {
    /// Staged files still carrying conflicts.
    pub conflicting: Vec<String>,
    /// Staged files ready to apply.
    pub clean: Vec<String>,
    /// Entries whose staged file was removed; the project keeps its version.
    pub dropped: Vec<String>,
}

impl ConflictScan {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicting.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

impl Manifest {
    /// Assemble the manifest for a migration result.
    ///
    /// Every `Modified` / `AddedInTarget` classification appears exactly once.
    pub fn build(
        metadata: ManifestMetadata,
        classifications: &[FileClassification],
        result: &MigrationResult,
    ) -> Self {
        let statuses: HashMap<&str, FileStatus> = classifications
            .iter()
            .map(|c| (c.path.as_str(), c.status))
            .collect();

        let mut entries = BTreeMap::new();
        for merge in &result.merge_results {
            let status = statuses
                .get(merge.path())
                .copied()
                .unwrap_or(FileStatus::Modified);
            let entry = match merge {
                MergeResult::Text { has_conflict, .. } => ManifestEntry {
                    status,
                    kind: ContentKind::Text,
                    conflict: *has_conflict,
                    conflict_sha256: None,
                },
                MergeResult::Binary {
                    merged_bytes,
                    has_conflict,
                    ..
                } => ManifestEntry {
                    status,
                    kind: ContentKind::Binary,
                    conflict: *has_conflict,
                    conflict_sha256: has_conflict.then(|| sha256_hex(merged_bytes)),
                },
            };
            entries.insert(merge.path().to_string(), entry);
        }
        for added in &result.added_files {
            entries.insert(
                added.path.clone(),
                ManifestEntry {
                    status: FileStatus::AddedInTarget,
                    kind: ContentKind::Copied,
                    conflict: false,
                    conflict_sha256: None,
                },
            );
        }

        for c in classifications.iter().filter(|c| c.status.is_migrated()) {
            if !entries.contains_key(&c.path) {
                warn!(path = %c.path, status = %c.status, "migrated path missing from result");
            }
        }

        let mut removed_files = result.removed_files.clone();
        removed_files.sort();
        let mut retained_removals = result.retained_removals.clone();
        retained_removals.sort();

        Self {
            version: MANIFEST_VERSION,
            metadata,
            entries,
            removed_files,
            retained_removals,
            temp_directories: result.temp_directories.clone(),
        }
    }

    /// Rebuild entries from the staging directory contents.
    ///
    /// Statuses are unknown after a rebuild and recorded as `Modified`;
    /// removals cannot be recovered and are left empty.
    pub fn rescan(staging_root: &Path, metadata: ManifestMetadata) -> Result<Self, ManifestError> {
        info!(root = %staging_root.display(), "rebuilding manifest from staging directory");
        let policy = FilePolicy::new(vec![MANIFEST_FILE.to_string()]).exclude_dir(INTERNAL_DIR);
        let snapshot = TreeSnapshot::scan(staging_root, &policy)?;

        let mut entries = BTreeMap::new();
        for path in snapshot.paths() {
            let bytes = std::fs::read(snapshot.abs_path(path))?;
            let entry = if sidecar_path(staging_root, path).exists() {
                ManifestEntry {
                    status: FileStatus::Modified,
                    kind: ContentKind::Binary,
                    conflict: true,
                    conflict_sha256: None,
                }
            } else if is_binary(&bytes) {
                ManifestEntry {
                    status: FileStatus::Modified,
                    kind: ContentKind::Binary,
                    conflict: false,
                    conflict_sha256: None,
                }
            } else {
                let text = String::from_utf8_lossy(&bytes);
                ManifestEntry {
                    status: FileStatus::Modified,
                    kind: ContentKind::Text,
                    conflict: has_conflict_markers(&text),
                    conflict_sha256: None,
                }
            };
            entries.insert(path.to_string(), entry);
        }
        warn!(
            count = entries.len(),
            "manifest rebuilt; removed-file records could not be recovered"
        );

        Ok(Self {
            version: MANIFEST_VERSION,
            metadata,
            entries,
            removed_files: Vec::new(),
            retained_removals: Vec::new(),
            temp_directories: Vec::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write the manifest atomically: a temporary file in the staging root is
    /// persisted over [`MANIFEST_FILE`].
    pub fn write(&self, staging_root: &Path) -> Result<(), ManifestError> {
        std::fs::create_dir_all(staging_root)?;
        let path = staging_root.join(MANIFEST_FILE);

        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');

        let mut tmp = tempfile::NamedTempFile::new_in(staging_root)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| ManifestError::Persist {
            path: path.clone(),
            detail: e.error.to_string(),
        })?;

        debug!(path = %path.display(), entries = self.entries.len(), "manifest written");
        Ok(())
    }

    /// Read the manifest, rebuilding it from the staging directory when it is
    /// missing, unparsable, or from another layout version.
    pub fn read(staging_root: &Path) -> Result<Self, ManifestError> {
        let path = staging_root.join(MANIFEST_FILE);
        if !path.exists() {
            warn!(path = %path.display(), "manifest missing");
            return Self::rescan(staging_root, ManifestMetadata::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        let value: serde_json::Value = match serde_json::from_str(&contents) {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "manifest unparsable");
                return Self::rescan(staging_root, ManifestMetadata::default());
            }
        };

        let version = value.get("version").and_then(serde_json::Value::as_u64);
        if version == Some(u64::from(MANIFEST_VERSION)) {
            match serde_json::from_value::<Manifest>(value.clone()) {
                Ok(manifest) => return Ok(manifest),
                Err(e) => warn!(error = %e, "manifest entries unreadable"),
            }
        } else {
            warn!(?version, expected = MANIFEST_VERSION, "manifest from another layout");
        }

        let metadata = serde_json::from_value::<ManifestMetadata>(value).unwrap_or_default();
        Self::rescan(staging_root, metadata)
    }

    // -----------------------------------------------------------------------
    // Conflict state
    // -----------------------------------------------------------------------

    /// Recompute conflict state from the staged files.
    pub fn scan_conflicts(&self, staging_root: &Path) -> Result<ConflictScan, ManifestError> {
        let mut scan = ConflictScan::default();
        for (path, entry) in &self.entries {
            let staged = staging_root.join(path);
            if !staged.exists() {
                scan.dropped.push(path.clone());
                continue;
            }
            let conflicting = match entry.kind {
                ContentKind::Copied => false,
                ContentKind::Text => {
                    let bytes = std::fs::read(&staged)?;
                    !is_binary(&bytes) && has_conflict_markers(&String::from_utf8_lossy(&bytes))
                }
                ContentKind::Binary => {
                    if !sidecar_path(staging_root, path).exists() {
                        false
                    } else {
                        match &entry.conflict_sha256 {
                            Some(expected) => sha256_hex(&std::fs::read(&staged)?) == *expected,
                            None => true,
                        }
                    }
                }
            };
            if conflicting {
                scan.conflicting.push(path.clone());
            } else {
                scan.clean.push(path.clone());
            }
        }
        debug!(
            conflicting = scan.conflicting.len(),
            clean = scan.clean.len(),
            dropped = scan.dropped.len(),
            "conflict scan complete"
        );
        Ok(scan)
    }

    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Presence;
    use crate::migration::FilePendingMigration;

    fn classification(path: &str, status: FileStatus) -> FileClassification {
        FileClassification {
            path: path.into(),
            status,
            presence: Presence::default(),
        }
    }

    fn sample_result() -> MigrationResult {
        MigrationResult {
            merge_results: vec![
                MergeResult::Text {
                    path: "a.txt".into(),
                    merged_content: "1\n<<<<<<< ours\n3\n=======\n2\n>>>>>>> theirs\n".into(),
                    has_conflict: true,
                },
                MergeResult::Text {
                    path: "b.txt".into(),
                    merged_content: "clean\n".into(),
                    has_conflict: false,
                },
                MergeResult::Binary {
                    path: "img.png".into(),
                    merged_bytes: vec![0, 1],
                    has_conflict: true,
                    theirs_bytes: Some(vec![0, 2]),
                },
            ],
            added_files: vec![FilePendingMigration {
                path: "new.txt".into(),
                source_file: PathBuf::from("/target/new.txt"),
            }],
            removed_files: vec!["z.txt".into(), "old.txt".into()],
            ..MigrationResult::default()
        }
    }

    fn sample_manifest() -> Manifest {
        let classifications = vec![
            classification("a.txt", FileStatus::Modified),
            classification("b.txt", FileStatus::Modified),
            classification("img.png", FileStatus::Modified),
            classification("new.txt", FileStatus::AddedInTarget),
            classification("mine.txt", FileStatus::AddedByUser),
        ];
        let metadata = ManifestMetadata {
            base_revision: Some("base123".into()),
            target_revision: Some("target456".into()),
            ..ManifestMetadata::default()
        };
        Manifest::build(metadata, &classifications, &sample_result())
    }

    fn stage(root: &Path, manifest: &Manifest) {
        for merge in &sample_result().merge_results {
            std::fs::write(root.join(merge.path()), merge.content_bytes()).unwrap();
        }
        std::fs::write(root.join("new.txt"), "added\n").unwrap();
        let sidecar = sidecar_path(root, "img.png");
        std::fs::create_dir_all(sidecar.parent().unwrap()).unwrap();
        std::fs::write(sidecar, [0u8, 2]).unwrap();
        manifest.write(root).unwrap();
    }

    #[test]
    fn test_build_covers_migrated_paths_once() {
        let manifest = sample_manifest();
        let paths: Vec<&str> = manifest.entries.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt", "img.png", "new.txt"]);
        assert!(manifest.entry("a.txt").unwrap().conflict);
        assert!(!manifest.entry("b.txt").unwrap().conflict);
        assert_eq!(manifest.entry("new.txt").unwrap().kind, ContentKind::Copied);
        assert_eq!(
            manifest.entry("img.png").unwrap().conflict_sha256.as_deref(),
            Some(sha256_hex(&[0, 1]).as_str())
        );
        assert_eq!(manifest.removed_files, vec!["old.txt", "z.txt"]);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = sample_manifest();
        manifest.write(dir.path()).unwrap();

        let read = Manifest::read(dir.path()).unwrap();
        assert_eq!(read, manifest);
        assert_eq!(read.metadata.base_revision.as_deref(), Some("base123"));
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        sample_manifest().write(dir.path()).unwrap();
        sample_manifest().write(dir.path()).unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![MANIFEST_FILE.to_string()]);
    }

    #[test]
    fn test_scan_flips_after_marker_removal() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = sample_manifest();
        stage(dir.path(), &manifest);

        let scan = manifest.scan_conflicts(dir.path()).unwrap();
        assert_eq!(scan.conflicting, vec!["a.txt", "img.png"]);
        assert_eq!(scan.clean, vec!["b.txt", "new.txt"]);

        std::fs::write(dir.path().join("a.txt"), "1\n3\n2\n").unwrap();
        let scan = manifest.scan_conflicts(dir.path()).unwrap();
        assert_eq!(scan.conflicting, vec!["img.png"]);
    }

    #[test]
    fn test_binary_conflict_resolved_by_replacing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = sample_manifest();
        stage(dir.path(), &manifest);

        std::fs::write(dir.path().join("img.png"), [0u8, 9]).unwrap();
        let scan = manifest.scan_conflicts(dir.path()).unwrap();
        assert!(!scan.conflicting.contains(&"img.png".to_string()));
    }

    #[test]
    fn test_deleted_staged_file_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = sample_manifest();
        stage(dir.path(), &manifest);
        std::fs::remove_file(dir.path().join("a.txt")).unwrap();

        let scan = manifest.scan_conflicts(dir.path()).unwrap();
        assert_eq!(scan.dropped, vec!["a.txt"]);
        assert!(!scan.conflicting.contains(&"a.txt".to_string()));
    }

    #[test]
    fn test_stale_flags_are_not_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = sample_manifest();
        stage(dir.path(), &manifest);
        // Flag says clean, file says otherwise.
        manifest.entries.get_mut("a.txt").unwrap().conflict = false;
        let scan = manifest.scan_conflicts(dir.path()).unwrap();
        assert!(scan.conflicting.contains(&"a.txt".to_string()));
    }

    #[test]
    fn test_corrupt_manifest_falls_back_to_rescan() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = sample_manifest();
        stage(dir.path(), &manifest);
        std::fs::write(dir.path().join(MANIFEST_FILE), "{ not json").unwrap();

        let rebuilt = Manifest::read(dir.path()).unwrap();
        assert_eq!(rebuilt.entries.len(), 4);
        assert!(rebuilt.entry("a.txt").unwrap().conflict);
        assert!(rebuilt.entry("img.png").unwrap().conflict);
        assert!(!rebuilt.entry("b.txt").unwrap().conflict);
        let scan = rebuilt.scan_conflicts(dir.path()).unwrap();
        assert_eq!(scan.conflicting, vec!["a.txt", "img.png"]);
    }

    #[test]
    fn test_older_layout_keeps_metadata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "<<<<<<< ours\nx\n=======\ny\n>>>>>>> theirs\n")
            .unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"version": 0, "base_revision": "old-base", "merged_files": ["a.txt"]}"#,
        )
        .unwrap();

        let manifest = Manifest::read(dir.path()).unwrap();
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.metadata.base_revision.as_deref(), Some("old-base"));
        assert!(manifest.entry("a.txt").unwrap().conflict);
    }
}
