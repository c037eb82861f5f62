//! Per-file merge engine.
//!
//! Uses the `diffy` crate to perform line-based merges of the base, current
//! ("ours"), and target ("theirs") versions of a file. Binary content is
//! never merged: it is either taken from the target or flagged as a
//! conflict.

use diffy::{ConflictStyle, DiffOptions, Line, MergeOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::markers::{OURS_MARKER, SEPARATOR_MARKER, THEIRS_MARKER};

/// Bytes inspected for NUL when probing for binary content.
const BINARY_PROBE_LEN: usize = 8000;

/// Which merge algorithm applies to text files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Base → target changes replayed onto current.
    #[default]
    ThreeWay,
    /// Base ignored; current and target reconciled directly.
    TwoWay,
}

/// The outcome of merging one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    Text {
        path: String,
        /// May contain conflict markers when `has_conflict` is true.
        merged_content: String,
        has_conflict: bool,
    },
    Binary {
        path: String,
        merged_bytes: Vec<u8>,
        has_conflict: bool,
        /// Target bytes, kept for conflicts so "take target" stays possible.
        theirs_bytes: Option<Vec<u8>>,
    },
}

impl MergeResult {
    pub fn path(&self) -> &str {
        match self {
            Self::Text { path, .. } | Self::Binary { path, .. } => path,
        }
    }

    pub fn has_conflict(&self) -> bool {
        match self {
            Self::Text { has_conflict, .. } | Self::Binary { has_conflict, .. } => *has_conflict,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary { .. })
    }

    /// The bytes to stage.
    pub fn content_bytes(&self) -> &[u8] {
        match self {
            Self::Text { merged_content, .. } => merged_content.as_bytes(),
            Self::Binary { merged_bytes, .. } => merged_bytes,
        }
    }
}

/// Merged text plus whether markers were emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMerge {
    pub merged_content: String,
    pub has_conflicts: bool,
}

impl TextMerge {
    fn clean(content: &str) -> Self {
        Self {
            merged_content: content.to_string(),
            has_conflicts: false,
        }
    }
}

/// Stateless merge engine.
pub struct Merger;

impl Merger {
    /// Merge one file.
    ///
    /// `base` is absent when the file is new in both target and current;
    /// `current` is absent when the developer deleted a file the target
    /// changed. Output is a pure function of the inputs.
    pub fn merge(
        path: &str,
        base: Option<&[u8]>,
        target: &[u8],
        current: Option<&[u8]>,
        strategy: MergeStrategy,
    ) -> MergeResult {
        let any_binary = is_binary(target)
            || base.map_or(false, is_binary)
            || current.map_or(false, is_binary);
        if any_binary {
            return Self::merge_binary(path, base, target, current);
        }

        // Every buffer passed the UTF-8 probe above.
        let target_text = String::from_utf8_lossy(target);
        let base_text = base.map(String::from_utf8_lossy);
        let current_text = current.map(String::from_utf8_lossy);

        let merge = match (current_text.as_deref(), base_text.as_deref(), strategy) {
            (None, _, _) => {
                debug!(path, "current deleted, target changed: whole-file conflict");
                edit_delete_conflict(&target_text)
            }
            (Some(ours), Some(base), MergeStrategy::ThreeWay) => {
                Self::three_way_merge(base, ours, &target_text)
            }
            (Some(ours), _, _) => Self::two_way_merge(ours, &target_text),
        };

        MergeResult::Text {
            path: path.to_string(),
            merged_content: merge.merged_content,
            has_conflict: merge.has_conflicts,
        }
    }

    fn merge_binary(
        path: &str,
        base: Option<&[u8]>,
        target: &[u8],
        current: Option<&[u8]>,
    ) -> MergeResult {
        let untouched = matches!((current, base), (Some(c), Some(b)) if c == b);
        if untouched || current == Some(target) {
            debug!(path, "binary file untouched by user, taking target");
            return MergeResult::Binary {
                path: path.to_string(),
                merged_bytes: target.to_vec(),
                has_conflict: false,
                theirs_bytes: None,
            };
        }
        debug!(path, "binary file diverged, flagging conflict");
        MergeResult::Binary {
            path: path.to_string(),
            merged_bytes: current.unwrap_or(target).to_vec(),
            has_conflict: true,
            theirs_bytes: Some(target.to_vec()),
        }
    }

    /// Three-way merge of `base`, `ours` (current), and `theirs` (target).
    ///
    /// Conflicting regions are framed with `<<<<<<< ours` / `=======` /
    /// `>>>>>>> theirs` markers and `has_conflicts` is set.
    pub fn three_way_merge(base: &str, ours: &str, theirs: &str) -> TextMerge {
        // Fast path: if either side is identical to base, the other side wins cleanly.
        if ours == base {
            debug!("ours == base, theirs wins cleanly");
            return TextMerge::clean(theirs);
        }
        if theirs == base {
            debug!("theirs == base, ours wins cleanly");
            return TextMerge::clean(ours);
        }
        if ours == theirs {
            debug!("ours == theirs, identical changes");
            return TextMerge::clean(ours);
        }

        let mut options = MergeOptions::new();
        options.set_conflict_style(ConflictStyle::Merge);
        match options.merge(base, ours, theirs) {
            Ok(merged) => {
                debug!("clean three-way merge");
                TextMerge::clean(&merged)
            }
            Err(conflicted) => {
                info!("three-way merge produced conflicts");
                TextMerge {
                    merged_content: conflicted,
                    has_conflicts: true,
                }
            }
        }
    }

    /// Two-way merge of `ours` (current) and `theirs` (target).
    ///
    /// The lines both sides share act as the common ancestor, so lines only
    /// the target has are inserted, lines only the current has are kept,
    /// and regions where the two replace each other conflict.
    pub fn two_way_merge(ours: &str, theirs: &str) -> TextMerge {
        if ours == theirs {
            return TextMerge::clean(ours);
        }

        let common = common_lines(ours, theirs);
        let mut options = MergeOptions::new();
        options.set_conflict_style(ConflictStyle::Merge);
        match options.merge(&common, ours, theirs) {
            Ok(merged) => TextMerge::clean(&merged),
            Err(conflicted) => {
                info!("two-way merge produced conflicts");
                TextMerge {
                    merged_content: conflicted,
                    has_conflicts: true,
                }
            }
        }
    }
}

/// Whether `bytes` must be treated as binary: not UTF-8, or NUL in the
/// leading probe window.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_PROBE_LEN).any(|b| *b == 0) || std::str::from_utf8(bytes).is_err()
}

/// The longest common line subsequence of `a` and `b`, as text.
fn common_lines(a: &str, b: &str) -> String {
    let context = a.lines().count().max(b.lines().count()) + 1;
    let mut options = DiffOptions::new();
    options.set_context_len(context);
    let patch = options.create_patch(a, b);

    let mut common = String::new();
    for hunk in patch.hunks() {
        for line in hunk.lines() {
            if let Line::Context(text) = line {
                common.push_str(text);
            }
        }
    }
    common
}

/// Whole-file block for a file the developer deleted and the target changed.
fn edit_delete_conflict(theirs: &str) -> TextMerge {
    let mut out = String::with_capacity(theirs.len() + 40);
    out.push_str(OURS_MARKER);
    out.push_str(" ours\n");
    out.push_str(SEPARATOR_MARKER);
    out.push('\n');
    out.push_str(theirs);
    if !theirs.is_empty() && !theirs.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(THEIRS_MARKER);
    out.push_str(" theirs\n");
    TextMerge {
        merged_content: out,
        has_conflicts: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::markers::{find_conflict_regions, has_conflict_markers};

    fn text_of(result: &MergeResult) -> &str {
        match result {
            MergeResult::Text { merged_content, .. } => merged_content,
            MergeResult::Binary { .. } => panic!("expected text result"),
        }
    }

    #[test]
    fn test_identical_files() {
        let base = "line1\nline2\nline3\n";
        let result = Merger::three_way_merge(base, base, base);
        assert!(!result.has_conflicts);
        assert_eq!(result.merged_content, base);
    }

    #[test]
    fn test_current_equals_base_takes_target_verbatim() {
        let base = "line1\nline2\n";
        let target = "line1\nchanged\nline3\n";
        let result = Merger::merge(
            "a.txt",
            Some(base.as_bytes()),
            target.as_bytes(),
            Some(base.as_bytes()),
            MergeStrategy::ThreeWay,
        );
        assert!(!result.has_conflict());
        assert_eq!(text_of(&result), target);
    }

    #[test]
    fn test_only_ours_changed() {
        let base = "line1\nline2\nline3\n";
        let ours = "line1\nmodified\nline3\n";
        let result = Merger::three_way_merge(base, ours, base);
        assert!(!result.has_conflicts);
        assert_eq!(result.merged_content, ours);
    }

    #[test]
    fn test_non_overlapping_changes() {
        let base = "aaa\nbbb\nccc\nddd\neee\n";
        let ours = "AAA\nbbb\nccc\nddd\neee\n";
        let theirs = "aaa\nbbb\nccc\nddd\nEEE\n";
        let result = Merger::three_way_merge(base, ours, theirs);
        assert!(!result.has_conflicts);
        assert_eq!(result.merged_content, "AAA\nbbb\nccc\nddd\nEEE\n");
    }

    #[test]
    fn test_conflicting_changes() {
        let base = "line1\noriginal\nline3\n";
        let ours = "line1\nours_version\nline3\n";
        let theirs = "line1\ntheirs_version\nline3\n";
        let result = Merger::three_way_merge(base, ours, theirs);
        assert!(result.has_conflicts);
        let regions = find_conflict_regions(&result.merged_content);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].ours, "ours_version\n");
        assert_eq!(regions[0].theirs, "theirs_version\n");
    }

    #[test]
    fn test_overlapping_insert_scenario() {
        let result = Merger::merge(
            "a.txt",
            Some(b"1\n"),
            b"1\n2\n",
            Some(b"1\n3\n"),
            MergeStrategy::ThreeWay,
        );
        assert!(result.has_conflict());
        let regions = find_conflict_regions(text_of(&result));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].ours, "3\n");
        assert_eq!(regions[0].theirs, "2\n");
        assert!(text_of(&result).starts_with("1\n"));
    }

    #[test]
    fn test_same_change_both_sides() {
        let result = Merger::three_way_merge("old\n", "new\n", "new\n");
        assert!(!result.has_conflicts);
        assert_eq!(result.merged_content, "new\n");
    }

    #[test]
    fn test_merge_is_deterministic() {
        let run = || {
            Merger::merge(
                "f",
                Some(b"a\nb\nc\n"),
                b"a\nB\nc\nd\n",
                Some(b"a\nb2\nc\n"),
                MergeStrategy::ThreeWay,
            )
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_two_way_applies_target_insertions() {
        let ours = "a\nmine\nb\n";
        let theirs = "a\nb\nnew\n";
        let result = Merger::two_way_merge(ours, theirs);
        assert!(!result.has_conflicts);
        assert_eq!(result.merged_content, "a\nmine\nb\nnew\n");
    }

    #[test]
    fn test_two_way_conflicts_on_replacement() {
        let result = Merger::two_way_merge("a\nx\nb\n", "a\ny\nb\n");
        assert!(result.has_conflicts);
        let regions = find_conflict_regions(&result.merged_content);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].ours, "x\n");
        assert_eq!(regions[0].theirs, "y\n");
    }

    #[test]
    fn test_two_way_strategy_ignores_base() {
        // Three-way would take target cleanly (current == base); two-way
        // sees a replacement and flags it.
        let result = Merger::merge(
            "f",
            Some(b"a\nx\nb\n"),
            b"a\ny\nb\n",
            Some(b"a\nx\nb\n"),
            MergeStrategy::TwoWay,
        );
        assert!(result.has_conflict());
    }

    #[test]
    fn test_missing_base_uses_two_way() {
        let result = Merger::merge("f", None, b"a\nb\n", Some(b"a\n"), MergeStrategy::ThreeWay);
        assert!(!result.has_conflict());
        assert_eq!(text_of(&result), "a\nb\n");
    }

    #[test]
    fn test_deleted_by_user_is_whole_file_conflict() {
        let result = Merger::merge("f", Some(b"a\n"), b"a\nb", None, MergeStrategy::ThreeWay);
        assert!(result.has_conflict());
        let text = text_of(&result);
        assert!(has_conflict_markers(text));
        let regions = find_conflict_regions(text);
        assert_eq!(regions[0].ours, "");
        assert_eq!(regions[0].theirs, "a\nb\n");
    }

    #[test]
    fn test_is_binary() {
        assert!(!is_binary(b"plain text\n"));
        assert!(is_binary(&[0x89, b'P', b'N', b'G', 0x00]));
        assert!(is_binary(&[0xFF, 0xFE, 0x41]));
        assert!(!is_binary("héllo".as_bytes()));
    }

    #[test]
    fn test_binary_untouched_takes_target() {
        let base = [0u8, 1, 2];
        let target = [0u8, 9, 9];
        let result = Merger::merge("img.png", Some(&base), &target, Some(&base), MergeStrategy::ThreeWay);
        assert_eq!(
            result,
            MergeResult::Binary {
                path: "img.png".into(),
                merged_bytes: target.to_vec(),
                has_conflict: false,
                theirs_bytes: None,
            }
        );
    }

    #[test]
    fn test_binary_diverged_conflicts_and_keeps_current() {
        let base = [0u8, 1];
        let target = [0u8, 2];
        let current = [0u8, 3];
        let result = Merger::merge("img.png", Some(&base), &target, Some(&current), MergeStrategy::ThreeWay);
        assert!(result.is_binary());
        assert!(result.has_conflict());
        assert_eq!(result.content_bytes(), &current);
        if let MergeResult::Binary { theirs_bytes, .. } = result {
            assert_eq!(theirs_bytes, Some(target.to_vec()));
        }
    }

    #[test]
    fn test_binary_probe_on_any_side() {
        // Text target, binary current: still a binary merge.
        let result = Merger::merge("f", Some(b"a\n"), b"b\n", Some(&[0u8, 1]), MergeStrategy::ThreeWay);
        assert!(result.is_binary());
        assert!(result.has_conflict());
    }
}
