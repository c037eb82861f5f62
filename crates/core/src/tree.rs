//! File-tree snapshots.
//!
//! A [`TreeSnapshot`] records every file under a root that the
//! [`FilePolicy`] admits, keyed by forward-slash relative path, with the
//! SHA-256 of its content. Snapshots are compared by the classifier; file
//! content is read again only for the paths that need merging.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::errors::TreeError;
use crate::policy::FilePolicy;

/// A revision identifier plus the directory holding that revision's files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRef {
    /// Opaque revision id (commit hash or equivalent).
    pub revision: String,
    /// Root of the materialized file tree.
    pub root: PathBuf,
}

impl RevisionRef {
    pub fn new(revision: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            revision: revision.into(),
            root: root.into(),
        }
    }
}

/// One file in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Hex SHA-256 of the file content.
    pub sha256: String,
    /// Size in bytes.
    pub size: u64,
}

/// All admitted files under a root.
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    root: PathBuf,
    files: BTreeMap<String, FileEntry>,
}

impl TreeSnapshot {
    /// Walk `root` and hash every file the policy allows.
    pub fn scan(root: &Path, policy: &FilePolicy) -> Result<Self, TreeError> {
        if !root.is_dir() {
            return Err(TreeError::MissingRoot(root.to_path_buf()));
        }
        info!(root = %root.display(), "scanning file tree");

        let mut files = BTreeMap::new();
        walk(root, "", policy, &mut files)?;

        debug!(root = %root.display(), count = files.len(), "tree scan complete");
        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    /// Build a snapshot from in-memory entries.
    pub fn from_entries(root: impl Into<PathBuf>, files: BTreeMap<String, FileEntry>) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, rel_path: &str) -> Option<&FileEntry> {
        self.files.get(rel_path)
    }

    pub fn contains(&self, rel_path: &str) -> bool {
        self.files.contains_key(rel_path)
    }

    /// Relative paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Absolute path of `rel_path` inside this tree.
    pub fn abs_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    /// Read the content of `rel_path`, or `None` if the tree lacks it.
    pub fn read(&self, rel_path: &str) -> Result<Option<Vec<u8>>, TreeError> {
        if !self.contains(rel_path) {
            return Ok(None);
        }
        let path = self.abs_path(rel_path);
        std::fs::read(&path)
            .map(Some)
            .map_err(|source| TreeError::Read { path, source })
    }
}

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn walk(
    dir: &Path,
    rel_dir: &str,
    policy: &FilePolicy,
    files: &mut BTreeMap<String, FileEntry>,
) -> Result<(), TreeError> {
    let entries = std::fs::read_dir(dir).map_err(|source| TreeError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| TreeError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = if rel_dir.is_empty() {
            name
        } else {
            format!("{}/{}", rel_dir, name)
        };

        let file_type = entry.file_type().map_err(|source| TreeError::Read {
            path: path.clone(),
            source,
        })?;

        if file_type.is_dir() {
            if policy.skips_dir(&rel) {
                debug!(path = %rel, "skipping directory");
                continue;
            }
            walk(&path, &rel, policy, files)?;
            continue;
        }

        // Symlinked directories are not followed.
        let metadata = std::fs::metadata(&path).map_err(|source| TreeError::Read {
            path: path.clone(),
            source,
        })?;
        if !metadata.is_file() {
            continue;
        }

        let decision = policy.evaluate(&rel);
        if !decision.is_allowed() {
            debug!(path = %rel, decision = decision.label(), "excluded by policy");
            continue;
        }

        let content = std::fs::read(&path).map_err(|source| TreeError::Read {
            path: path.clone(),
            source,
        })?;
        files.insert(
            rel,
            FileEntry {
                sha256: sha256_hex(&content),
                size: metadata.len(),
            },
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_collects_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "1\n");
        write(dir.path(), "lib/src/b.txt", "2\n");
        write(dir.path(), ".git/HEAD", "ref: refs/heads/main\n");

        let snapshot = TreeSnapshot::scan(dir.path(), &FilePolicy::default()).unwrap();
        let paths: Vec<&str> = snapshot.paths().collect();
        assert_eq!(paths, vec!["a.txt", "lib/src/b.txt"]);
        assert_eq!(snapshot.get("a.txt").unwrap().size, 2);
        assert_eq!(snapshot.get("a.txt").unwrap().sha256, sha256_hex(b"1\n"));
    }

    #[test]
    fn test_scan_applies_policy() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "build/out.o", "x");
        write(dir.path(), "migrate_working_dir/a.txt", "x");
        write(dir.path(), "keep.txt", "x");

        let policy = FilePolicy::new(vec!["build/**".into()]).exclude_dir("migrate_working_dir");
        let snapshot = TreeSnapshot::scan(dir.path(), &policy).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("keep.txt"));
    }

    #[test]
    fn test_missing_root() {
        let result = TreeSnapshot::scan(Path::new("/nonexistent/tree"), &FilePolicy::default());
        assert!(matches!(result, Err(TreeError::MissingRoot(_))));
    }

    #[test]
    fn test_read_absent_path_is_none() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "hello");
        let snapshot = TreeSnapshot::scan(dir.path(), &FilePolicy::default()).unwrap();
        assert_eq!(snapshot.read("a.txt").unwrap().as_deref(), Some(&b"hello"[..]));
        assert!(snapshot.read("missing.txt").unwrap().is_none());
    }
}
