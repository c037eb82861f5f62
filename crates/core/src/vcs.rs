//! Version-control access via `git2`.
//!
//! The session talks to version control only through [`VersionControl`],
//! so tests can substitute an in-memory fake.

use std::path::Path;

use git2::{ObjectType, Repository, Status, StatusOptions, TreeWalkMode, TreeWalkResult};
use tracing::{debug, info, instrument};

use crate::errors::VcsError;
use crate::tree::RevisionRef;

/// The version-control operations a migration needs.
pub trait VersionControl: Send + Sync {
    /// Whether `path` is inside a repository.
    fn repo_exists(&self, path: &Path) -> bool;

    /// Paths relative to `repo` with uncommitted changes, untracked files
    /// included and ignored files excluded. When `repo` is a subdirectory of
    /// its repository, changes outside it are not reported.
    fn uncommitted_paths(&self, repo: &Path) -> Result<Vec<String>, VcsError>;

    fn has_uncommitted_changes(&self, repo: &Path) -> Result<bool, VcsError> {
        Ok(!self.uncommitted_paths(repo)?.is_empty())
    }

    /// Resolve a revision expression to a full commit id.
    fn resolve_revision(&self, repo: &Path, revision: &str) -> Result<String, VcsError>;

    /// Write the files of `revision` under `dest`.
    fn export_tree(&self, repo: &Path, revision: &str, dest: &Path)
        -> Result<RevisionRef, VcsError>;
}

/// [`VersionControl`] over local git repositories.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitVcs;

impl GitVcs {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path) -> Result<Repository, VcsError> {
        Repository::discover(path).map_err(|_| VcsError::RepositoryNotFound(path.display().to_string()))
    }
}

impl VersionControl for GitVcs {
    fn repo_exists(&self, path: &Path) -> bool {
        Self::open(path).is_ok()
    }

    #[instrument(skip(self), fields(repo = %repo.display()))]
    fn uncommitted_paths(&self, repo: &Path) -> Result<Vec<String>, VcsError> {
        let repository = Self::open(repo)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .include_ignored(false)
            .recurse_untracked_dirs(false);

        let prefix = project_prefix(&repository, repo);
        let statuses = repository.statuses(Some(&mut opts))?;
        let paths: Vec<String> = statuses
            .iter()
            .filter(|entry| entry.status() != Status::CURRENT && !entry.status().is_ignored())
            .filter_map(|entry| entry.path().and_then(|p| project_relative(p, prefix.as_deref())))
            .collect();
        debug!(count = paths.len(), "uncommitted paths");
        Ok(paths)
    }

    #[instrument(skip(self), fields(repo = %repo.display()))]
    fn resolve_revision(&self, repo: &Path, revision: &str) -> Result<String, VcsError> {
        let repository = Self::open(repo)?;
        let commit = repository
            .revparse_single(revision)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|_| VcsError::RevisionNotFound(revision.to_string()))?;
        Ok(commit.id().to_string())
    }

    #[instrument(skip(self), fields(repo = %repo.display(), dest = %dest.display()))]
    fn export_tree(
        &self,
        repo: &Path,
        revision: &str,
        dest: &Path,
    ) -> Result<RevisionRef, VcsError> {
        let repository = Self::open(repo)?;
        let commit = repository
            .revparse_single(revision)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|_| VcsError::RevisionNotFound(revision.to_string()))?;
        let tree = commit.tree()?;
        std::fs::create_dir_all(dest)?;

        let mut written = 0usize;
        let mut failure: Option<VcsError> = None;
        let walked = tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() != Some(ObjectType::Blob) {
                return TreeWalkResult::Ok;
            }
            let Some(name) = entry.name() else {
                return TreeWalkResult::Skip;
            };
            let rel = format!("{}{}", dir, name);
            match write_blob(&repository, entry.id(), entry.filemode(), &dest.join(&rel)) {
                Ok(()) => {
                    written += 1;
                    TreeWalkResult::Ok
                }
                Err(e) => {
                    failure = Some(e);
                    TreeWalkResult::Abort
                }
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        walked?;

        info!(revision = %commit.id(), files = written, "exported tree");
        Ok(RevisionRef::new(commit.id().to_string(), dest))
    }
}

fn write_blob(
    repository: &Repository,
    oid: git2::Oid,
    filemode: i32,
    path: &Path,
) -> Result<(), VcsError> {
    let blob = repository.find_blob(oid)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    #[cfg(unix)]
    if filemode == i32::from(git2::FileMode::Link) {
        let target = String::from_utf8_lossy(blob.content()).into_owned();
        std::os::unix::fs::symlink(target, path)?;
        return Ok(());
    }

    std::fs::write(path, blob.content())?;

    #[cfg(unix)]
    if filemode == i32::from(git2::FileMode::BlobExecutable) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = filemode;

    Ok(())
}

/// `project` relative to the repository's work tree, `/`-separated, or
/// `None` when it is the work tree itself.
fn project_prefix(repository: &Repository, project: &Path) -> Option<String> {
    let workdir = repository.workdir()?;
    let workdir = std::fs::canonicalize(workdir).unwrap_or_else(|_| workdir.to_path_buf());
    let project = std::fs::canonicalize(project).unwrap_or_else(|_| project.to_path_buf());
    let rel = project.strip_prefix(&workdir).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Rewrites a repository-relative status path to be project-relative,
/// dropping paths outside the project.
fn project_relative(path: &str, prefix: Option<&str>) -> Option<String> {
    let Some(prefix) = prefix else {
        return Some(path.to_string());
    };
    if path.trim_end_matches('/') == prefix {
        // The whole project is untracked.
        return Some("./".to_string());
    }
    path.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
}
