//! File-policy enforcement for tree snapshots.
//!
//! Provides [`FilePolicy`] which decides whether a relative path takes part
//! in a migration at all. The same policy is applied to the base, target,
//! and current trees so that an excluded path is invisible everywhere.
//!
//! # Decision model
//!
//! | Condition | Decision |
//! |-----------|----------|
//! | Under `.git/` or an excluded directory (staging) | `Ignored` |
//! | Matches an ignore or unmanaged pattern | `Ignored` |
//! | First component is a known platform outside the filter | `PlatformExcluded` |
//! | None of the above | `Allow` |

use tracing::debug;

use crate::config::MigrateConfig;

/// Version-control metadata directory, never part of any tree.
const VCS_DIR: &str = ".git";

// ---------------------------------------------------------------------------
// Decision enum
// ---------------------------------------------------------------------------

/// The outcome of evaluating a path against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePolicyDecision {
    /// Path participates in the migration.
    Allow,
    /// Path matches an exclusion rule.
    Ignored { pattern: String },
    /// Path belongs to a platform subproject not selected for this run.
    PlatformExcluded { platform: String },
}

impl FilePolicyDecision {
    /// `true` if the path should be included in tree snapshots.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Short human-readable label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Ignored { .. } => "ignored",
            Self::PlatformExcluded { .. } => "platform-excluded",
        }
    }
}

// ---------------------------------------------------------------------------
// FilePolicy
// ---------------------------------------------------------------------------

/// Evaluates relative paths against exclusion patterns and the platform filter.
#[derive(Debug, Clone, Default)]
pub struct FilePolicy {
    /// Glob patterns matched against the relative path.
    patterns: Vec<String>,
    /// Relative directories excluded wholesale (e.g. the staging directory).
    excluded_dirs: Vec<String>,
    /// Known platform directory names.
    known_platforms: Vec<String>,
    /// Selected platforms. Empty selects all.
    platforms: Vec<String>,
}

impl FilePolicy {
    /// Create a policy from exclusion patterns only.
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            ..Self::default()
        }
    }

    /// Build the policy a migration of `config` uses.
    ///
    /// `staging_rel` is the staging directory relative to the project root,
    /// when the staging directory lives inside the project.
    pub fn from_config(config: &MigrateConfig, staging_rel: Option<&str>) -> Self {
        let mut patterns = config.files.ignore_patterns.clone();
        patterns.extend(config.files.unmanaged_files.iter().cloned());
        patterns.push(normalize(&config.migrate.metadata_file.to_string_lossy()));

        let mut policy = Self::new(patterns)
            .with_platforms(&config.migrate.known_platforms, &config.migrate.platforms);
        if let Some(rel) = staging_rel {
            policy = policy.exclude_dir(rel);
        }
        policy
    }

    /// Restrict platform subprojects to `selected` (empty keeps all).
    pub fn with_platforms(mut self, known: &[String], selected: &[String]) -> Self {
        self.known_platforms = known.to_vec();
        self.platforms = selected.to_vec();
        self
    }

    /// Exclude a whole directory (relative, forward-slash separated).
    pub fn exclude_dir(mut self, rel_dir: &str) -> Self {
        let dir = normalize(rel_dir).trim_end_matches('/').to_string();
        if !dir.is_empty() {
            self.excluded_dirs.push(dir);
        }
        self
    }

    /// Evaluate a relative file path.
    pub fn evaluate(&self, rel_path: &str) -> FilePolicyDecision {
        let path = normalize(rel_path);

        if let Some(dir) = self.excluded_dir_of(&path) {
            return FilePolicyDecision::Ignored {
                pattern: format!("{}/**", dir),
            };
        }

        for pattern in &self.patterns {
            if glob_match::glob_match(&normalize(pattern), &path) {
                debug!(path = %path, pattern = pattern.as_str(), "path matches exclusion pattern");
                return FilePolicyDecision::Ignored {
                    pattern: pattern.clone(),
                };
            }
        }

        if !self.platforms.is_empty() {
            if let Some((first, _)) = path.split_once('/') {
                if self.known_platforms.iter().any(|p| p == first)
                    && !self.platforms.iter().any(|p| p == first)
                {
                    return FilePolicyDecision::PlatformExcluded {
                        platform: first.to_string(),
                    };
                }
            }
        }

        FilePolicyDecision::Allow
    }

    /// Whether a directory can be skipped without descending into it.
    pub fn skips_dir(&self, rel_dir: &str) -> bool {
        let dir = normalize(rel_dir);
        if self.excluded_dir_of(&format!("{}/", dir)).is_some() {
            return true;
        }
        if !self.platforms.is_empty()
            && !dir.contains('/')
            && self.known_platforms.iter().any(|p| *p == dir)
            && !self.platforms.iter().any(|p| *p == dir)
        {
            return true;
        }
        false
    }

    fn excluded_dir_of(&self, path: &str) -> Option<String> {
        if path == VCS_DIR || path.starts_with(".git/") {
            return Some(VCS_DIR.to_string());
        }
        self.excluded_dirs
            .iter()
            .find(|dir| path.starts_with(&format!("{}/", dir)))
            .cloned()
    }
}

/// Forward-slash separated form of a relative path.
pub(crate) fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Vec<String> {
        vec!["android".into(), "ios".into(), "web".into()]
    }

    #[test]
    fn test_allow_when_no_constraints() {
        let policy = FilePolicy::new(vec![]);
        let decision = policy.evaluate("lib/main.dart");
        assert_eq!(decision, FilePolicyDecision::Allow);
        assert!(decision.is_allowed());
        assert_eq!(decision.label(), "allow");
    }

    #[test]
    fn test_git_dir_always_ignored() {
        let policy = FilePolicy::new(vec![]);
        assert!(!policy.evaluate(".git/config").is_allowed());
        assert!(policy.skips_dir(".git"));
        assert!(policy.evaluate(".gitignore").is_allowed());
    }

    #[test]
    fn test_ignore_pattern_double_star() {
        let policy = FilePolicy::new(vec!["build/**".into()]);
        let decision = policy.evaluate("build/app/output.apk");
        assert!(matches!(decision, FilePolicyDecision::Ignored { .. }));
        assert_eq!(decision.label(), "ignored");
        assert!(policy.evaluate("lib/build.dart").is_allowed());
    }

    #[test]
    fn test_excluded_staging_dir() {
        let policy = FilePolicy::new(vec![]).exclude_dir("migrate_working_dir/");
        assert!(!policy.evaluate("migrate_working_dir/lib/a.txt").is_allowed());
        assert!(policy.skips_dir("migrate_working_dir"));
        assert!(!policy.skips_dir("lib"));
    }

    #[test]
    fn test_platform_filter() {
        let policy = FilePolicy::new(vec![]).with_platforms(&known(), &["ios".to_string()]);
        assert!(policy.evaluate("ios/Runner/Info.plist").is_allowed());
        assert_eq!(
            policy.evaluate("android/app/build.gradle"),
            FilePolicyDecision::PlatformExcluded {
                platform: "android".into()
            }
        );
        assert!(policy.skips_dir("android"));
        // Non-platform directories and root files are unaffected.
        assert!(policy.evaluate("lib/main.dart").is_allowed());
        assert!(policy.evaluate("android.txt").is_allowed());
    }

    #[test]
    fn test_empty_platform_filter_keeps_all() {
        let policy = FilePolicy::new(vec![]).with_platforms(&known(), &[]);
        assert!(policy.evaluate("android/app/build.gradle").is_allowed());
        assert!(!policy.skips_dir("android"));
    }

    #[test]
    fn test_from_config_excludes_metadata_and_unmanaged() {
        let mut config = MigrateConfig::default();
        config.files.unmanaged_files = vec!["lib/main.dart".into()];
        let policy = FilePolicy::from_config(&config, Some("migrate_working_dir"));
        assert!(!policy.evaluate(".migrate_metadata").is_allowed());
        assert!(!policy.evaluate("lib/main.dart").is_allowed());
        assert!(!policy.evaluate("migrate_working_dir/.migrate_manifest").is_allowed());
        assert!(policy.evaluate("lib/other.dart").is_allowed());
    }
}
