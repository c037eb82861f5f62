//! TOML-based configuration for scaffold-migrate.
//!
//! The configuration file is optional: every field has a default, and the
//! command line overrides whatever the file provides. A project usually
//! keeps its settings in `migrate.toml` at the project root.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

/// Default file name looked up in the project root.
pub const DEFAULT_CONFIG_FILE: &str = "migrate.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrateConfig {
    /// Migration session settings.
    #[serde(default)]
    pub migrate: MigrateSection,

    /// Reference scaffold generator settings.
    #[serde(default)]
    pub scaffold: ScaffoldConfig,

    /// Which files participate in a migration.
    #[serde(default)]
    pub files: FilesConfig,
}

// ---------------------------------------------------------------------------
// [migrate]
// ---------------------------------------------------------------------------

/// Session-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateSection {
    /// Staging directory, relative to the project root unless absolute.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Platforms to include. Empty means every platform.
    #[serde(default)]
    pub platforms: Vec<String>,

    /// Top-level directory names that hold platform-specific subprojects.
    #[serde(default = "default_known_platforms")]
    pub known_platforms: Vec<String>,

    /// Remove the generated base/target trees once staging completes.
    #[serde(default = "default_true")]
    pub delete_temp_directories: bool,

    /// Ignore the base revision and merge current against target directly.
    #[serde(default)]
    pub prefer_two_way_merge: bool,

    /// Permit falling back to `fallback_base_revision` when the project
    /// metadata does not record one.
    #[serde(default)]
    pub allow_fallback_base_revision: bool,

    /// Base revision used when fallback is allowed.
    #[serde(default)]
    pub fallback_base_revision: Option<String>,

    /// Explicit base revision; wins over the metadata file.
    #[serde(default)]
    pub base_revision: Option<String>,

    /// Revision to migrate to.
    #[serde(default)]
    pub target_revision: Option<String>,

    /// Project metadata file recording the scaffold revision.
    #[serde(default = "default_metadata_file")]
    pub metadata_file: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("migrate_working_dir")
}
fn default_known_platforms() -> Vec<String> {
    ["android", "ios", "linux", "macos", "web", "windows"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}
fn default_metadata_file() -> PathBuf {
    PathBuf::from(".migrate_metadata")
}
fn default_log_level() -> String {
    "warn".into()
}
fn default_true() -> bool {
    true
}

impl Default for MigrateSection {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            platforms: Vec::new(),
            known_platforms: default_known_platforms(),
            delete_temp_directories: true,
            prefer_two_way_merge: false,
            allow_fallback_base_revision: false,
            fallback_base_revision: None,
            base_revision: None,
            target_revision: None,
            metadata_file: default_metadata_file(),
            log_level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// [scaffold]
// ---------------------------------------------------------------------------

/// How reference trees are produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScaffoldKind {
    /// Run an external generator command per revision.
    #[default]
    Command,
    /// Export revisions of a template git repository.
    Git,
}

/// Reference scaffold generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaffoldConfig {
    #[serde(default)]
    pub kind: ScaffoldKind,

    /// Generator executable (for `kind = "command"`).
    #[serde(default = "default_scaffold_command")]
    pub command: String,

    /// Arguments; `{revision}`, `{platforms}` and `{output}` are substituted.
    #[serde(default = "default_scaffold_args")]
    pub args: Vec<String>,

    /// Template repository (for `kind = "git"`).
    #[serde(default)]
    pub template_repo: Option<PathBuf>,

    /// Seconds before a generator run is abandoned.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_scaffold_command() -> String {
    "scaffold-gen".into()
}
fn default_scaffold_args() -> Vec<String> {
    ["create", "--revision", "{revision}", "--platforms", "{platforms}", "{output}"]
        .iter()
        .map(|a| a.to_string())
        .collect()
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            kind: ScaffoldKind::default(),
            command: default_scaffold_command(),
            args: default_scaffold_args(),
            template_repo: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// [files]
// ---------------------------------------------------------------------------

/// File selection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Glob patterns excluded from all three trees.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Glob patterns for files the developer owns outright; never migrated.
    #[serde(default)]
    pub unmanaged_files: Vec<String>,
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl MigrateConfig {
    /// Load a [`MigrateConfig`] from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: MigrateConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Load `migrate.toml` from `project_dir` if present, defaults otherwise.
    pub fn load_or_default(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = project_dir.join(DEFAULT_CONFIG_FILE);
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate that values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.migrate.staging_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "migrate.staging_dir".into(),
                detail: "staging directory must not be empty".into(),
            });
        }
        let staging = &self.migrate.staging_dir;
        if staging.is_relative()
            && !lexical_normalize(staging)
                .components()
                .any(|c| matches!(c, Component::Normal(_)))
        {
            return Err(ConfigError::InvalidValue {
                field: "migrate.staging_dir".into(),
                detail: format!(
                    "'{}' resolves to the project directory or one of its parents",
                    staging.display()
                ),
            });
        }
        for platform in &self.migrate.platforms {
            if !self.migrate.known_platforms.contains(platform) {
                return Err(ConfigError::InvalidValue {
                    field: "migrate.platforms".into(),
                    detail: format!(
                        "unknown platform '{}' (known: {})",
                        platform,
                        self.migrate.known_platforms.join(", ")
                    ),
                });
            }
        }
        if self.migrate.allow_fallback_base_revision
            && self
                .migrate
                .fallback_base_revision
                .as_deref()
                .map_or(true, str::is_empty)
        {
            return Err(ConfigError::InvalidValue {
                field: "migrate.fallback_base_revision".into(),
                detail: "a fallback revision is required when allow_fallback_base_revision is set"
                    .into(),
            });
        }
        match self.scaffold.kind {
            ScaffoldKind::Command => {
                if self.scaffold.command.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "scaffold.command".into(),
                        detail: "generator command must not be empty".into(),
                    });
                }
                if !self.scaffold.args.iter().any(|a| a.contains("{output}")) {
                    return Err(ConfigError::InvalidValue {
                        field: "scaffold.args".into(),
                        detail: "arguments must reference {output}".into(),
                    });
                }
            }
            ScaffoldKind::Git => {
                if self.scaffold.template_repo.is_none() {
                    return Err(ConfigError::InvalidValue {
                        field: "scaffold.template_repo".into(),
                        detail: "template_repo is required when kind = \"git\"".into(),
                    });
                }
            }
        }
        if self.scaffold.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scaffold.timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        Ok(())
    }

    /// Absolute staging directory for `project_dir`.
    pub fn staging_root(&self, project_dir: &Path) -> PathBuf {
        if self.migrate.staging_dir.is_absolute() {
            self.migrate.staging_dir.clone()
        } else {
            project_dir.join(&self.migrate.staging_dir)
        }
    }

    /// Staging directory for `project_dir`, refusing the project itself and
    /// its ancestors.
    pub fn checked_staging_root(&self, project_dir: &Path) -> Result<PathBuf, ConfigError> {
        let root = self.staging_root(project_dir);
        if resolve(project_dir).starts_with(resolve(&root)) {
            return Err(ConfigError::InvalidValue {
                field: "migrate.staging_dir".into(),
                detail: format!(
                    "staging directory '{}' is the project directory '{}' or one of its parents",
                    root.display(),
                    project_dir.display()
                ),
            });
        }
        Ok(root)
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# scaffold-migrate configuration

[migrate]
staging_dir = "migrate_working_dir"
# platforms = ["android", "ios"]      # empty = all platforms
delete_temp_directories = true
prefer_two_way_merge = false
allow_fallback_base_revision = false
# fallback_base_revision = "v1.0.0"
# base_revision = "..."               # default: read from metadata_file
# target_revision = "..."
metadata_file = ".migrate_metadata"
log_level = "warn"

[scaffold]
kind = "command"
command = "scaffold-gen"
args = ["create", "--revision", "{revision}", "--platforms", "{platforms}", "{output}"]
# template_repo = "/path/to/template"  # for kind = "git"
timeout_secs = 300

[files]
ignore_patterns = ["build/**"]
unmanaged_files = []
"#
    }
}

/// Canonical form when the path exists, lexical form otherwise.
fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| lexical_normalize(path))
}

/// Drops `.` and folds `..` into the preceding component without touching
/// the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
