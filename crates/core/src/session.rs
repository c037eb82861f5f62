//! The migration lifecycle: start, status, resolve-conflicts, apply, abandon.
//!
//! Each lifecycle operation is a type implementing [`MigrationCommand`].
//! Collaborators (version control, scaffold generator, configuration, and
//! paths) travel in a [`MigrationContext`]; nothing is global. The staging
//! directory's existence is what marks a migration as in progress.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::classify::{classify, FileClassification, FileStatus};
use crate::config::MigrateConfig;
use crate::errors::{ConfigError, MergeError, ScaffoldError, SessionError};
use crate::manifest::{is_staging_dir, sidecar_path, ContentKind, Manifest, ManifestMetadata};
use crate::merge::{ConflictChooser, ConflictResolver, FileResolution, MergeResult, MergeStrategy, Merger};
use crate::metadata;
use crate::migration::{FilePendingMigration, MigrationResult};
use crate::policy::{normalize, FilePolicy};
use crate::scaffold::ScaffoldGenerator;
use crate::staging::{StagingReport, StagingWriter};
use crate::tree::TreeSnapshot;
use crate::vcs::VersionControl;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything a lifecycle command needs.
#[derive(Debug, Clone)]
pub struct MigrationContext<V, G> {
    pub vcs: V,
    pub generator: G,
    pub config: MigrateConfig,
    pub project_dir: PathBuf,
    staging_root: PathBuf,
}

impl<V: VersionControl, G: ScaffoldGenerator> MigrationContext<V, G> {
    pub fn new(vcs: V, generator: G, config: MigrateConfig, project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let staging_root = config.staging_root(&project_dir);
        Self {
            vcs,
            generator,
            config,
            project_dir,
            staging_root,
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Whether a migration is in progress: the staging root exists and was
    /// written by `start`.
    pub fn has_session(&self) -> bool {
        is_staging_dir(&self.staging_root)
    }

    /// The staging root must not be the project or one of its parents.
    fn check_staging_root(&self) -> Result<(), SessionError> {
        self.config.checked_staging_root(&self.project_dir)?;
        Ok(())
    }

    fn require_session(&self) -> Result<(), SessionError> {
        self.check_staging_root()?;
        if self.has_session() {
            Ok(())
        } else if self.staging_root.exists() {
            Err(SessionError::ForeignStagingDir(self.staging_root.clone()))
        } else {
            Err(SessionError::NoSession(self.staging_root.clone()))
        }
    }

    /// Staging directory relative to the project, when it lives inside it.
    fn staging_rel(&self) -> Option<String> {
        self.staging_root
            .strip_prefix(&self.project_dir)
            .ok()
            .map(|rel| normalize(&rel.to_string_lossy()))
            .filter(|rel| !rel.is_empty())
    }

    fn metadata_path(&self) -> PathBuf {
        self.project_dir.join(&self.config.migrate.metadata_file)
    }
}

/// A lifecycle operation.
#[allow(async_fn_in_trait)]
pub trait MigrationCommand {
    async fn run<V, G>(&mut self, ctx: &MigrationContext<V, G>) -> Result<CommandOutcome, SessionError>
    where
        V: VersionControl,
        G: ScaffoldGenerator;
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a lifecycle command did.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Started(StartSummary),
    Status(StatusReport),
    Resolved(ResolveSummary),
    Applied(ApplySummary),
    Abandoned(AbandonSummary),
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started(s) => fmt::Display::fmt(s, f),
            Self::Status(s) => fmt::Display::fmt(s, f),
            Self::Resolved(s) => fmt::Display::fmt(s, f),
            Self::Applied(s) => fmt::Display::fmt(s, f),
            Self::Abandoned(s) => fmt::Display::fmt(s, f),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartSummary {
    pub base_revision: String,
    pub target_revision: String,
    pub used_fallback_base_revision: bool,
    pub report: StagingReport,
    pub conflicting: Vec<String>,
    pub retained_removals: Vec<String>,
    pub kept_temp_directories: Vec<PathBuf>,
}

impl fmt::Display for StartSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Migration from {} to {} started.",
            self.base_revision, self.target_revision
        )?;
        if self.used_fallback_base_revision {
            writeln!(f, "Base revision was a fallback; files were merged two-way.")?;
        }
        writeln!(f, "{}", self.report)?;
        for path in &self.retained_removals {
            writeln!(f, "Kept '{}': removed upstream but edited locally.", path)?;
        }
        for dir in &self.kept_temp_directories {
            writeln!(f, "Generated tree kept at {}", dir.display())?;
        }
        if self.conflicting.is_empty() {
            write!(f, "No conflicts. Review the staged files, then run `apply`.")
        } else {
            writeln!(f, "{} file(s) have conflicts:", self.conflicting.len())?;
            for path in &self.conflicting {
                writeln!(f, "  {}", path)?;
            }
            write!(f, "Run `resolve-conflicts` or edit the staged files, then run `apply`.")
        }
    }
}

/// Read-only view of the staging directory.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub staging_root: PathBuf,
    pub base_revision: Option<String>,
    pub target_revision: Option<String>,
    pub conflicting: Vec<String>,
    /// Merged files ready to apply.
    pub clean: Vec<String>,
    /// Target-only files ready to apply.
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub retained_removals: Vec<String>,
    /// Entries whose staged file was deleted; the project keeps its version.
    pub dropped: Vec<String>,
}

impl StatusReport {
    pub fn is_ready(&self) -> bool {
        self.conflicting.is_empty()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Migration in {} ({} -> {})",
            self.staging_root.display(),
            self.base_revision.as_deref().unwrap_or("unknown"),
            self.target_revision.as_deref().unwrap_or("unknown")
        )?;
        let sections: [(&str, &Vec<String>); 6] = [
            ("Conflicting", &self.conflicting),
            ("Merged", &self.clean),
            ("Added", &self.added),
            ("Removed", &self.removed),
            ("Retained (removed upstream, edited locally)", &self.retained_removals),
            ("Dropped (project version kept)", &self.dropped),
        ];
        for (title, paths) in sections {
            if paths.is_empty() {
                continue;
            }
            writeln!(f, "{} ({}):", title, paths.len())?;
            for path in paths {
                writeln!(f, "  {}", path)?;
            }
        }
        if self.is_ready() {
            write!(f, "Ready to apply. Run `apply`.")
        } else {
            write!(f, "Resolve the conflicts above, then run `apply`.")
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveSummary {
    pub resolved: Vec<String>,
    pub partial: Vec<(String, usize)>,
    pub dropped: Vec<String>,
    pub skipped: Vec<String>,
    /// Conflicting files after resolution.
    pub remaining: Vec<String>,
}

impl fmt::Display for ResolveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Resolved {} file(s), kept local version of {}, skipped {}.",
            self.resolved.len(),
            self.dropped.len(),
            self.skipped.len()
        )?;
        for (path, remaining) in &self.partial {
            writeln!(f, "  {}: {} block(s) left", path, remaining)?;
        }
        if self.remaining.is_empty() {
            write!(f, "No conflicts remain. Run `apply`.")
        } else {
            write!(
                f,
                "{} file(s) still conflict. Run `resolve-conflicts` again or edit them by hand.",
                self.remaining.len()
            )
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApplySummary {
    pub applied: Vec<String>,
    pub removed: Vec<String>,
    pub dropped: Vec<String>,
    pub target_revision: Option<String>,
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Applied {} file(s) and removed {}.",
            self.applied.len(),
            self.removed.len()
        )?;
        if let Some(rev) = &self.target_revision {
            write!(f, " Project now at revision {}.", rev)?;
        }
        write!(f, " Review and commit the changes.")
    }
}

#[derive(Debug, Clone, Default)]
pub struct AbandonSummary {
    pub removed: Vec<PathBuf>,
    /// Paths that could not be removed.
    pub failed: Vec<PathBuf>,
}

impl fmt::Display for AbandonSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Migration abandoned; removed {} path(s).", self.removed.len())?;
        for path in &self.failed {
            write!(f, "\nCould not remove {}; delete it manually.", path.display())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// start
// ---------------------------------------------------------------------------

/// Overrides for `start`; unset fields fall back to configuration.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub platforms: Option<Vec<String>>,
    pub delete_temp_directories: Option<bool>,
    pub base_revision: Option<String>,
    pub target_revision: Option<String>,
    pub prefer_two_way_merge: Option<bool>,
    pub allow_fallback_base_revision: Option<bool>,
}

#[derive(Debug)]
struct StartSettings {
    platforms: Vec<String>,
    delete_temp_directories: bool,
    base_revision: Option<String>,
    target_revision: Option<String>,
    prefer_two_way_merge: bool,
    allow_fallback_base_revision: bool,
}

impl StartOptions {
    fn resolve(&self, config: &MigrateConfig) -> Result<StartSettings, ConfigError> {
        let m = &config.migrate;
        let platforms = self.platforms.clone().unwrap_or_else(|| m.platforms.clone());
        if let Some(unknown) = platforms.iter().find(|p| !m.known_platforms.contains(p)) {
            return Err(ConfigError::InvalidValue {
                field: "platforms".into(),
                detail: format!(
                    "unknown platform '{}'; expected one of {}",
                    unknown,
                    m.known_platforms.join(", ")
                ),
            });
        }
        Ok(StartSettings {
            platforms,
            delete_temp_directories: self
                .delete_temp_directories
                .unwrap_or(m.delete_temp_directories),
            base_revision: self.base_revision.clone().or_else(|| m.base_revision.clone()),
            target_revision: self
                .target_revision
                .clone()
                .or_else(|| m.target_revision.clone()),
            prefer_two_way_merge: self.prefer_two_way_merge.unwrap_or(m.prefer_two_way_merge),
            allow_fallback_base_revision: self
                .allow_fallback_base_revision
                .unwrap_or(m.allow_fallback_base_revision),
        })
    }
}

/// Generate, classify, merge, and stage.
#[derive(Debug, Clone, Default)]
pub struct StartCommand {
    pub options: StartOptions,
}

impl StartCommand {
    pub fn new(options: StartOptions) -> Self {
        Self { options }
    }

    fn check_environment<V, G>(&self, ctx: &MigrationContext<V, G>) -> Result<(), SessionError>
    where
        V: VersionControl,
        G: ScaffoldGenerator,
    {
        if !ctx.vcs.repo_exists(&ctx.project_dir) {
            return Err(SessionError::NotAGitRepo(ctx.project_dir.clone()));
        }
        ctx.check_staging_root()?;
        if ctx.has_session() {
            return Err(SessionError::AlreadyStaged(ctx.staging_root().to_path_buf()));
        }
        if ctx.staging_root().exists() {
            return Err(SessionError::ForeignStagingDir(ctx.staging_root().to_path_buf()));
        }
        if ctx.vcs.has_uncommitted_changes(&ctx.project_dir)? {
            return Err(SessionError::DirtyWorkingTree(ctx.project_dir.clone()));
        }
        Ok(())
    }

    /// Base revision and whether it is the configured fallback.
    fn base_revision<V, G>(
        &self,
        ctx: &MigrationContext<V, G>,
        settings: &StartSettings,
    ) -> Result<(String, bool), SessionError>
    where
        V: VersionControl,
        G: ScaffoldGenerator,
    {
        if let Some(rev) = &settings.base_revision {
            return Ok((rev.clone(), false));
        }

        let metadata_path = ctx.metadata_path();
        match metadata::read_revision(&metadata_path) {
            Ok(Some(rev)) => {
                debug!(revision = %rev, "base revision from project metadata");
                return Ok((rev, false));
            }
            Ok(None) => debug!(path = %metadata_path.display(), "no recorded revision"),
            Err(e) => warn!(path = %metadata_path.display(), error = %e, "unreadable project metadata"),
        }

        if settings.allow_fallback_base_revision {
            if let Some(rev) = &ctx.config.migrate.fallback_base_revision {
                warn!(revision = %rev, "using fallback base revision; merges will be two-way");
                return Ok((rev.clone(), true));
            }
        }

        Err(SessionError::Environment(format!(
            "cannot determine the base revision: '{}' records none; \
             pass --base-revision or enable allow_fallback_base_revision",
            metadata_path.display()
        )))
    }
}

impl MigrationCommand for StartCommand {
    #[instrument(skip_all, fields(project = %ctx.project_dir.display()))]
    async fn run<V, G>(&mut self, ctx: &MigrationContext<V, G>) -> Result<CommandOutcome, SessionError>
    where
        V: VersionControl,
        G: ScaffoldGenerator,
    {
        self.check_environment(ctx)?;
        let settings = self.options.resolve(&ctx.config)?;

        let (base_rev, used_fallback) = self.base_revision(ctx, &settings)?;
        let target_rev = settings.target_revision.clone().ok_or_else(|| {
            SessionError::Environment(
                "no target revision given; pass --target-revision or set migrate.target_revision"
                    .into(),
            )
        })?;
        let base_rev = ctx.generator.resolve_revision(&base_rev)?;
        let target_rev = ctx.generator.resolve_revision(&target_rev)?;
        info!(base = %base_rev, target = %target_rev, "starting migration");

        let base_dir = tempfile::Builder::new()
            .prefix("scaffold-migrate-base-")
            .tempdir()
            .map_err(ScaffoldError::from)?;
        let target_dir = tempfile::Builder::new()
            .prefix("scaffold-migrate-target-")
            .tempdir()
            .map_err(ScaffoldError::from)?;

        tokio::try_join!(
            ctx.generator
                .generate(&base_rev, &settings.platforms, base_dir.path()),
            ctx.generator
                .generate(&target_rev, &settings.platforms, target_dir.path()),
        )?;

        let mut policy_config = ctx.config.clone();
        policy_config.migrate.platforms = settings.platforms.clone();
        let policy = FilePolicy::from_config(&policy_config, ctx.staging_rel().as_deref());

        let base = TreeSnapshot::scan(base_dir.path(), &policy)?;
        let target = TreeSnapshot::scan(target_dir.path(), &policy)?;
        let current = TreeSnapshot::scan(&ctx.project_dir, &policy)?;

        let classifications = classify(&base, &target, &current);
        let strategy = if settings.prefer_two_way_merge || used_fallback {
            MergeStrategy::TwoWay
        } else {
            MergeStrategy::ThreeWay
        };

        let mut result = MigrationResult {
            merge_results: merge_all(&classifications, &base, &target, &current, strategy).await?,
            ..MigrationResult::default()
        };
        for c in &classifications {
            match c.status {
                FileStatus::AddedInTarget => result.added_files.push(FilePendingMigration {
                    path: c.path.clone(),
                    source_file: target.abs_path(&c.path),
                }),
                FileStatus::RemovedInTarget if c.is_clean_removal(&base, &current) => {
                    result.removed_files.push(c.path.clone())
                }
                FileStatus::RemovedInTarget if c.is_retained_removal(&base, &current) => {
                    result.retained_removals.push(c.path.clone())
                }
                _ => {}
            }
        }
        if !settings.delete_temp_directories {
            result.temp_directories = vec![base_dir.path().to_path_buf(), target_dir.path().to_path_buf()];
        }

        let metadata = ManifestMetadata {
            base_revision: Some(base_rev.clone()),
            target_revision: Some(target_rev.clone()),
            platforms: settings.platforms.clone(),
            prefer_two_way_merge: settings.prefer_two_way_merge,
            used_fallback_base_revision: used_fallback,
        };
        let manifest = Manifest::build(metadata, &classifications, &result);
        let report = StagingWriter::new(ctx.staging_root())
            .write(&manifest, &result)
            .await?;

        let kept_temp_directories = if settings.delete_temp_directories {
            for dir in [base_dir, target_dir] {
                let path = dir.path().to_path_buf();
                if let Err(e) = dir.close() {
                    warn!(path = %path.display(), error = %e, "failed to delete generated tree");
                }
            }
            Vec::new()
        } else {
            vec![base_dir.keep(), target_dir.keep()]
        };

        let conflicting = result
            .merge_results
            .iter()
            .filter(|r| r.has_conflict())
            .map(|r| r.path().to_string())
            .collect();

        info!(conflicts = result.conflict_count(), "migration staged");
        Ok(CommandOutcome::Started(StartSummary {
            base_revision: base_rev,
            target_revision: target_rev,
            used_fallback_base_revision: used_fallback,
            report,
            conflicting,
            retained_removals: result.retained_removals,
            kept_temp_directories,
        }))
    }
}

/// Merge every `Modified` path, one blocking task per file.
async fn merge_all(
    classifications: &[FileClassification],
    base: &TreeSnapshot,
    target: &TreeSnapshot,
    current: &TreeSnapshot,
    strategy: MergeStrategy,
) -> Result<Vec<MergeResult>, MergeError> {
    let mut handles = Vec::new();
    for c in classifications.iter().filter(|c| c.status == FileStatus::Modified) {
        let path = c.path.clone();
        let base_file = c.presence.base.then(|| base.abs_path(&c.path));
        let target_file = target.abs_path(&c.path);
        let current_file = c.presence.current.then(|| current.abs_path(&c.path));
        let handle = tokio::task::spawn_blocking(move || {
            merge_file(&path, base_file.as_deref(), &target_file, current_file.as_deref(), strategy)
        });
        handles.push((c.path.clone(), handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for (path, handle) in handles {
        match handle.await {
            Ok(Ok(merged)) => results.push(merged),
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(MergeError::Incomplete {
                    path,
                    detail: e.to_string(),
                });
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

fn merge_file(
    path: &str,
    base: Option<&Path>,
    target: &Path,
    current: Option<&Path>,
    strategy: MergeStrategy,
) -> Result<MergeResult, MergeError> {
    let base_bytes = base.map(read_input).transpose()?;
    let target_bytes = read_input(target)?;
    let current_bytes = current.map(read_input).transpose()?;
    Ok(Merger::merge(
        path,
        base_bytes.as_deref(),
        &target_bytes,
        current_bytes.as_deref(),
        strategy,
    ))
}

fn read_input(path: &Path) -> Result<Vec<u8>, MergeError> {
    std::fs::read(path).map_err(|source| MergeError::Input {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

/// Report staged state without modifying anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCommand;

impl MigrationCommand for StatusCommand {
    async fn run<V, G>(&mut self, ctx: &MigrationContext<V, G>) -> Result<CommandOutcome, SessionError>
    where
        V: VersionControl,
        G: ScaffoldGenerator,
    {
        ctx.require_session()?;
        let root = ctx.staging_root();
        let manifest = Manifest::read(root)?;
        let scan = manifest.scan_conflicts(root)?;

        let (added, clean): (Vec<String>, Vec<String>) = scan.clean.into_iter().partition(|path| {
            manifest
                .entry(path)
                .is_some_and(|e| e.status == FileStatus::AddedInTarget)
        });

        Ok(CommandOutcome::Status(StatusReport {
            staging_root: root.to_path_buf(),
            base_revision: manifest.metadata.base_revision.clone(),
            target_revision: manifest.metadata.target_revision.clone(),
            conflicting: scan.conflicting,
            clean,
            added,
            removed: manifest.removed_files.clone(),
            retained_removals: manifest.retained_removals.clone(),
            dropped: scan.dropped,
        }))
    }
}

// ---------------------------------------------------------------------------
// resolve-conflicts
// ---------------------------------------------------------------------------

/// Rewrite conflicted staged files with the sides a chooser picks.
#[derive(Debug)]
pub struct ResolveConflictsCommand<C> {
    chooser: C,
}

impl<C: ConflictChooser> ResolveConflictsCommand<C> {
    pub fn new(chooser: C) -> Self {
        Self { chooser }
    }

    pub fn into_chooser(self) -> C {
        self.chooser
    }
}

impl<C: ConflictChooser> MigrationCommand for ResolveConflictsCommand<C> {
    async fn run<V, G>(&mut self, ctx: &MigrationContext<V, G>) -> Result<CommandOutcome, SessionError>
    where
        V: VersionControl,
        G: ScaffoldGenerator,
    {
        ctx.require_session()?;
        let root = ctx.staging_root();
        let manifest = Manifest::read(root)?;
        let scan = manifest.scan_conflicts(root)?;

        let mut summary = ResolveSummary::default();
        for path in &scan.conflicting {
            let staged = root.join(path);
            let kind = manifest.entry(path).map(|e| e.kind);
            let outcome = if kind == Some(ContentKind::Binary) {
                ConflictResolver::resolve_binary(
                    &staged,
                    &sidecar_path(root, path),
                    path,
                    &mut self.chooser,
                )
            } else {
                ConflictResolver::resolve_text(&staged, path, &mut self.chooser)
            };
            let outcome = outcome.map_err(|source| SessionError::Apply {
                path: path.clone(),
                source,
            })?;
            match outcome {
                FileResolution::Resolved => summary.resolved.push(path.clone()),
                FileResolution::Partial { remaining } => summary.partial.push((path.clone(), remaining)),
                FileResolution::Dropped => summary.dropped.push(path.clone()),
                FileResolution::Skipped => summary.skipped.push(path.clone()),
            }
        }

        summary.remaining = manifest.scan_conflicts(root)?.conflicting;
        info!(
            resolved = summary.resolved.len(),
            remaining = summary.remaining.len(),
            "conflict resolution finished"
        );
        Ok(CommandOutcome::Resolved(summary))
    }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Copy staged files over the project and end the migration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyCommand {
    /// Apply even when the project has uncommitted changes.
    pub force: bool,
}

impl ApplyCommand {
    pub fn new(force: bool) -> Self {
        Self { force }
    }
}

impl MigrationCommand for ApplyCommand {
    #[instrument(skip_all, fields(project = %ctx.project_dir.display()))]
    async fn run<V, G>(&mut self, ctx: &MigrationContext<V, G>) -> Result<CommandOutcome, SessionError>
    where
        V: VersionControl,
        G: ScaffoldGenerator,
    {
        ctx.require_session()?;
        let root = ctx.staging_root();
        let manifest = Manifest::read(root)?;
        let scan = manifest.scan_conflicts(root)?;
        if scan.has_conflicts() {
            return Err(SessionError::UnresolvedConflicts {
                paths: scan.conflicting,
            });
        }

        if !self.force {
            let staging_rel = ctx.staging_rel();
            let dirty: Vec<String> = ctx
                .vcs
                .uncommitted_paths(&ctx.project_dir)?
                .into_iter()
                .filter(|p| !is_under(p, staging_rel.as_deref()))
                .collect();
            if !dirty.is_empty() {
                debug!(paths = ?dirty, "uncommitted paths block apply");
                return Err(SessionError::DirtyWorkingTree(ctx.project_dir.clone()));
            }
        }

        let mut summary = ApplySummary {
            dropped: scan.dropped,
            target_revision: manifest.metadata.target_revision.clone(),
            ..ApplySummary::default()
        };

        for path in &scan.clean {
            let dest = ctx.project_dir.join(path);
            copy_staged(&root.join(path), &dest).map_err(|source| SessionError::Apply {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path, "applied");
            summary.applied.push(path.clone());
        }

        for path in &manifest.removed_files {
            let dest = ctx.project_dir.join(path);
            match std::fs::remove_file(&dest) {
                Ok(()) => summary.removed.push(path.clone()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(SessionError::Apply {
                        path: path.clone(),
                        source,
                    })
                }
            }
        }

        if let Some(rev) = &manifest.metadata.target_revision {
            metadata::write_revision(&ctx.metadata_path(), rev).map_err(|source| {
                SessionError::Apply {
                    path: ctx.config.migrate.metadata_file.display().to_string(),
                    source,
                }
            })?;
        }

        remove_temp_directories(&manifest.temp_directories);
        if let Err(e) = std::fs::remove_dir_all(root) {
            warn!(path = %root.display(), error = %e, "failed to remove staging directory");
        }

        info!(
            applied = summary.applied.len(),
            removed = summary.removed.len(),
            "migration applied"
        );
        Ok(CommandOutcome::Applied(summary))
    }
}

fn is_under(path: &str, dir: Option<&str>) -> bool {
    match dir {
        Some(dir) => {
            let path = path.trim_end_matches('/');
            path == dir || path.starts_with(&format!("{}/", dir))
        }
        None => false,
    }
}

fn copy_staged(staged: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(staged, dest)?;
    Ok(())
}

fn remove_temp_directories(dirs: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut removed = Vec::new();
    let mut failed = Vec::new();
    for dir in dirs {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => removed.push(dir.clone()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to remove temporary directory");
                failed.push(dir.clone());
            }
        }
    }
    (removed, failed)
}

// ---------------------------------------------------------------------------
// abandon
// ---------------------------------------------------------------------------

/// Discard the staging directory and any kept generated trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbandonCommand;

impl MigrationCommand for AbandonCommand {
    async fn run<V, G>(&mut self, ctx: &MigrationContext<V, G>) -> Result<CommandOutcome, SessionError>
    where
        V: VersionControl,
        G: ScaffoldGenerator,
    {
        ctx.require_session()?;
        let root = ctx.staging_root();

        let temp_directories = match Manifest::read(root) {
            Ok(manifest) => manifest.temp_directories,
            Err(e) => {
                warn!(error = %e, "manifest unreadable; kept generated trees are not removed");
                Vec::new()
            }
        };
        let (mut removed, mut failed) = remove_temp_directories(&temp_directories);

        match std::fs::remove_dir_all(root) {
            Ok(()) => removed.push(root.to_path_buf()),
            Err(e) => {
                warn!(path = %root.display(), error = %e, "failed to remove staging directory");
                failed.push(root.to_path_buf());
            }
        }

        info!(removed = removed.len(), failed = failed.len(), "migration abandoned");
        Ok(CommandOutcome::Abandoned(AbandonSummary { removed, failed }))
    }
}
