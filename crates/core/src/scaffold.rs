//! Reference scaffold generation.
//!
//! A [`ScaffoldGenerator`] materializes the pristine scaffold of a given
//! toolkit revision into an output directory. Two implementations exist:
//! [`CommandGenerator`] runs an external generator command, and
//! [`GitTemplateGenerator`] exports a revision of a template repository.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::config::{MigrateConfig, ScaffoldKind};
use crate::errors::{ConfigError, ScaffoldError};
use crate::tree::RevisionRef;
use crate::vcs::VersionControl;

/// Produces the reference scaffold for a revision.
#[allow(async_fn_in_trait)]
pub trait ScaffoldGenerator {
    /// Canonical id for `revision`. Generators without a revision store
    /// return it unchanged.
    fn resolve_revision(&self, revision: &str) -> Result<String, ScaffoldError> {
        Ok(revision.to_string())
    }

    /// Generate the scaffold of `revision` for `platforms` (empty = all)
    /// into `output`, which exists and is empty.
    async fn generate(
        &self,
        revision: &str,
        platforms: &[String],
        output: &Path,
    ) -> Result<RevisionRef, ScaffoldError>;
}

// ---------------------------------------------------------------------------
// External command
// ---------------------------------------------------------------------------

/// Runs an external generator with `{revision}`, `{platforms}`, and
/// `{output}` substituted into its arguments.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: String,
    args: Vec<String>,
    known_platforms: Vec<String>,
    timeout: Duration,
}

impl CommandGenerator {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            known_platforms: Vec::new(),
            timeout,
        }
    }

    /// Platforms substituted when no selection is given.
    pub fn with_known_platforms(mut self, known: Vec<String>) -> Self {
        self.known_platforms = known;
        self
    }

    /// Arguments after placeholder substitution.
    pub fn render_args(&self, revision: &str, platforms: &[String], output: &Path) -> Vec<String> {
        let platforms = if platforms.is_empty() {
            self.known_platforms.join(",")
        } else {
            platforms.join(",")
        };
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{revision}", revision)
                    .replace("{platforms}", &platforms)
                    .replace("{output}", &output)
            })
            .collect()
    }
}

impl ScaffoldGenerator for CommandGenerator {
    #[instrument(skip(self, platforms), fields(command = %self.command))]
    async fn generate(
        &self,
        revision: &str,
        platforms: &[String],
        output: &Path,
    ) -> Result<RevisionRef, ScaffoldError> {
        let args = self.render_args(revision, platforms, output);
        debug!(args = ?args, "running scaffold generator");

        let mut cmd = Command::new(&self.command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ScaffoldError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        let output_result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ScaffoldError::TimedOut {
                revision: revision.to_string(),
                secs: self.timeout.as_secs(),
            })??;

        if !output_result.status.success() {
            let stderr = String::from_utf8_lossy(&output_result.stderr).trim().to_string();
            let exit_code = output_result.status.code().unwrap_or(-1);
            warn!(exit_code, %stderr, "scaffold generator failed");
            return Err(ScaffoldError::Failed {
                revision: revision.to_string(),
                exit_code,
                stderr,
            });
        }

        ensure_not_empty(revision, output)?;
        info!(revision, output = %output.display(), "scaffold generated");
        Ok(RevisionRef::new(revision, output))
    }
}

// ---------------------------------------------------------------------------
// Template repository
// ---------------------------------------------------------------------------

/// Exports a revision of a template repository, keeping only the selected
/// platform directories.
#[derive(Debug, Clone)]
pub struct GitTemplateGenerator<V> {
    vcs: V,
    template_repo: PathBuf,
    known_platforms: Vec<String>,
}

impl<V: VersionControl> GitTemplateGenerator<V> {
    pub fn new(vcs: V, template_repo: impl Into<PathBuf>, known_platforms: Vec<String>) -> Self {
        Self {
            vcs,
            template_repo: template_repo.into(),
            known_platforms,
        }
    }
}

impl<V: VersionControl + Clone + 'static> ScaffoldGenerator for GitTemplateGenerator<V> {
    fn resolve_revision(&self, revision: &str) -> Result<String, ScaffoldError> {
        Ok(self.vcs.resolve_revision(&self.template_repo, revision)?)
    }

    #[instrument(skip(self, platforms), fields(template = %self.template_repo.display()))]
    async fn generate(
        &self,
        revision: &str,
        platforms: &[String],
        output: &Path,
    ) -> Result<RevisionRef, ScaffoldError> {
        let vcs = self.vcs.clone();
        let repo = self.template_repo.clone();
        let rev = revision.to_string();
        let dest = output.to_path_buf();
        let exported = tokio::task::spawn_blocking(move || vcs.export_tree(&repo, &rev, &dest))
            .await
            .map_err(|e| ScaffoldError::Task(e.to_string()))??;

        if !platforms.is_empty() {
            for platform in &self.known_platforms {
                if platforms.contains(platform) {
                    continue;
                }
                let dir = output.join(platform);
                if dir.is_dir() {
                    debug!(platform = %platform, "removing unselected platform");
                    tokio::fs::remove_dir_all(&dir).await?;
                }
            }
        }

        ensure_not_empty(revision, output)?;
        info!(revision = %exported.revision, "template exported");
        Ok(exported)
    }
}

// ---------------------------------------------------------------------------
// Configured generator
// ---------------------------------------------------------------------------

/// The generator selected by `[scaffold] kind`.
#[derive(Debug, Clone)]
pub enum ConfiguredGenerator<V> {
    Command(CommandGenerator),
    Git(GitTemplateGenerator<V>),
}

impl<V: VersionControl> ConfiguredGenerator<V> {
    pub fn from_config(config: &MigrateConfig, vcs: V) -> Result<Self, ConfigError> {
        let known = config.migrate.known_platforms.clone();
        match config.scaffold.kind {
            ScaffoldKind::Command => Ok(Self::Command(
                CommandGenerator::new(
                    config.scaffold.command.clone(),
                    config.scaffold.args.clone(),
                    Duration::from_secs(config.scaffold.timeout_secs),
                )
                .with_known_platforms(known),
            )),
            ScaffoldKind::Git => {
                let repo = config.scaffold.template_repo.clone().ok_or_else(|| {
                    ConfigError::InvalidValue {
                        field: "scaffold.template_repo".into(),
                        detail: "required when kind = \"git\"".into(),
                    }
                })?;
                Ok(Self::Git(GitTemplateGenerator::new(vcs, repo, known)))
            }
        }
    }
}

impl<V: VersionControl + Clone + 'static> ScaffoldGenerator for ConfiguredGenerator<V> {
    fn resolve_revision(&self, revision: &str) -> Result<String, ScaffoldError> {
        match self {
            Self::Command(g) => g.resolve_revision(revision),
            Self::Git(g) => g.resolve_revision(revision),
        }
    }

    async fn generate(
        &self,
        revision: &str,
        platforms: &[String],
        output: &Path,
    ) -> Result<RevisionRef, ScaffoldError> {
        match self {
            Self::Command(g) => g.generate(revision, platforms, output).await,
            Self::Git(g) => g.generate(revision, platforms, output).await,
        }
    }
}

fn ensure_not_empty(revision: &str, output: &Path) -> Result<(), ScaffoldError> {
    let mut entries = std::fs::read_dir(output)?;
    if entries.next().is_none() {
        return Err(ScaffoldError::EmptyTree(revision.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VcsError;

    #[test]
    fn test_render_args() {
        let generator = CommandGenerator::new(
            "gen",
            vec![
                "create".into(),
                "--rev={revision}".into(),
                "--platforms".into(),
                "{platforms}".into(),
                "{output}".into(),
            ],
            Duration::from_secs(5),
        )
        .with_known_platforms(vec!["android".into(), "ios".into()]);

        let args = generator.render_args("abc123", &[], Path::new("/tmp/out"));
        assert_eq!(
            args,
            vec!["create", "--rev=abc123", "--platforms", "android,ios", "/tmp/out"]
        );

        let args = generator.render_args("abc123", &["web".into()], Path::new("/tmp/out"));
        assert_eq!(args[3], "web");
    }

    #[tokio::test]
    async fn test_missing_command_is_spawn_error() {
        let out = tempfile::tempdir().unwrap();
        let generator =
            CommandGenerator::new("scaffold-migrate-no-such-binary", vec![], Duration::from_secs(5));
        let err = generator.generate("r1", &[], out.path()).await.unwrap_err();
        assert!(matches!(err, ScaffoldError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generates_tree() {
        let out = tempfile::tempdir().unwrap();
        let generator = CommandGenerator::new(
            "sh",
            vec![
                "-c".into(),
                "mkdir -p \"$1/lib\" && echo \"$0\" > \"$1/lib/rev.txt\"".into(),
                "{revision}".into(),
                "{output}".into(),
            ],
            Duration::from_secs(30),
        );
        let rev = generator.generate("r42", &[], out.path()).await.unwrap();
        assert_eq!(rev.revision, "r42");
        assert_eq!(
            std::fs::read_to_string(out.path().join("lib/rev.txt")).unwrap(),
            "r42\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_failure_carries_stderr() {
        let out = tempfile::tempdir().unwrap();
        let generator = CommandGenerator::new(
            "sh",
            vec!["-c".into(), "echo boom >&2; exit 3".into()],
            Duration::from_secs(30),
        );
        match generator.generate("r1", &[], out.path()).await.unwrap_err() {
            ScaffoldError::Failed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_timeout() {
        let out = tempfile::tempdir().unwrap();
        let generator = CommandGenerator::new(
            "sh",
            vec!["-c".into(), "sleep 5".into()],
            Duration::from_millis(100),
        );
        let err = generator.generate("r1", &[], out.path()).await.unwrap_err();
        assert!(matches!(err, ScaffoldError::TimedOut { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_output_is_rejected() {
        let out = tempfile::tempdir().unwrap();
        let generator = CommandGenerator::new("true", vec![], Duration::from_secs(30));
        let err = generator.generate("r1", &[], out.path()).await.unwrap_err();
        assert!(matches!(err, ScaffoldError::EmptyTree(_)));
    }

    /// Exports a fixed layout regardless of revision.
    #[derive(Clone)]
    struct FixedTreeVcs;

    impl VersionControl for FixedTreeVcs {
        fn repo_exists(&self, _: &Path) -> bool {
            true
        }
        fn uncommitted_paths(&self, _: &Path) -> Result<Vec<String>, VcsError> {
            Ok(Vec::new())
        }
        fn resolve_revision(&self, _: &Path, revision: &str) -> Result<String, VcsError> {
            Ok(format!("{revision}-resolved"))
        }
        fn export_tree(
            &self,
            _: &Path,
            revision: &str,
            dest: &Path,
        ) -> Result<RevisionRef, VcsError> {
            for dir in ["android", "ios", "lib"] {
                std::fs::create_dir_all(dest.join(dir))?;
                std::fs::write(dest.join(dir).join("file.txt"), dir)?;
            }
            Ok(RevisionRef::new(revision, dest))
        }
    }

    #[tokio::test]
    async fn test_git_template_filters_platforms() {
        let out = tempfile::tempdir().unwrap();
        let generator = GitTemplateGenerator::new(
            FixedTreeVcs,
            "/templates/app",
            vec!["android".into(), "ios".into()],
        );
        assert_eq!(generator.resolve_revision("v2").unwrap(), "v2-resolved");

        generator
            .generate("v2", &["ios".into()], out.path())
            .await
            .unwrap();
        assert!(!out.path().join("android").exists());
        assert!(out.path().join("ios/file.txt").exists());
        assert!(out.path().join("lib/file.txt").exists());
    }

    #[test]
    fn test_configured_generator_requires_template_repo() {
        let mut config = MigrateConfig::default();
        config.scaffold.kind = ScaffoldKind::Git;
        assert!(ConfiguredGenerator::from_config(&config, FixedTreeVcs).is_err());

        config.scaffold.template_repo = Some(PathBuf::from("/templates/app"));
        assert!(matches!(
            ConfiguredGenerator::from_config(&config, FixedTreeVcs).unwrap(),
            ConfiguredGenerator::Git(_)
        ));
    }

    /// Each export waits until the other export has started.
    #[derive(Clone, Default)]
    struct RendezvousVcs {
        arrived: std::sync::Arc<(std::sync::Mutex<usize>, std::sync::Condvar)>,
    }

    impl VersionControl for RendezvousVcs {
        fn repo_exists(&self, _: &Path) -> bool {
            true
        }
        fn uncommitted_paths(&self, _: &Path) -> Result<Vec<String>, VcsError> {
            Ok(Vec::new())
        }
        fn resolve_revision(&self, _: &Path, revision: &str) -> Result<String, VcsError> {
            Ok(revision.to_string())
        }
        fn export_tree(
            &self,
            _: &Path,
            revision: &str,
            dest: &Path,
        ) -> Result<RevisionRef, VcsError> {
            let (count, ready) = &*self.arrived;
            let mut count = count.lock().unwrap();
            *count += 1;
            ready.notify_all();
            let (count, wait) = ready
                .wait_timeout_while(count, Duration::from_secs(5), |n| *n < 2)
                .unwrap();
            if wait.timed_out() {
                return Err(VcsError::RevisionNotFound(format!(
                    "{revision}: other export never started ({} arrived)",
                    *count
                )));
            }
            std::fs::write(dest.join("file.txt"), revision)?;
            Ok(RevisionRef::new(revision, dest))
        }
    }

    #[tokio::test]
    async fn test_git_template_exports_run_concurrently() {
        let base = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let generator = GitTemplateGenerator::new(RendezvousVcs::default(), "/templates/app", vec![]);

        let (base_ref, target_ref) = tokio::try_join!(
            generator.generate("v1", &[], base.path()),
            generator.generate("v2", &[], target.path()),
        )
        .unwrap();
        assert_eq!(base_ref.revision, "v1");
        assert_eq!(target_ref.revision, "v2");
    }
}
