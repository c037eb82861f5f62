//! Conflict resolution on staged files.
//!
//! The [`ConflictResolver`] rewrites conflicted files inside the staging
//! directory according to a [`ConflictChooser`]. It never touches the
//! manifest: once markers are gone (or a binary sidecar is consumed), the
//! next scan reports the file as clean.

use std::path::Path;

use tracing::{debug, info};

use super::markers::{find_conflict_regions, resolve_regions, ConflictRegion, RegionChoice};

/// Picks a side for each conflict.
pub trait ConflictChooser {
    /// Choose how to resolve one block of a text file.
    fn choose_region(
        &mut self,
        path: &str,
        region: &ConflictRegion,
        index: usize,
        total: usize,
    ) -> RegionChoice;

    /// Choose how to resolve a binary file. `Both` is treated as `Skip`.
    fn choose_binary(&mut self, path: &str) -> RegionChoice;
}

/// Applies the same choice to every conflict.
#[derive(Debug, Clone, Copy)]
pub struct FixedChooser(pub RegionChoice);

impl ConflictChooser for FixedChooser {
    fn choose_region(&mut self, _: &str, _: &ConflictRegion, _: usize, _: usize) -> RegionChoice {
        self.0
    }

    fn choose_binary(&mut self, _: &str) -> RegionChoice {
        self.0
    }
}

/// What resolving a file did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileResolution {
    /// Every block was resolved; the staged file is clean.
    Resolved,
    /// Some blocks remain.
    Partial { remaining: usize },
    /// The staged file was removed, so apply keeps the project's version.
    Dropped,
    /// Nothing changed.
    Skipped,
}

/// Stateless resolution operations on staged files.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolve the conflict blocks of the staged text file `staged`.
    pub fn resolve_text(
        staged: &Path,
        rel_path: &str,
        chooser: &mut dyn ConflictChooser,
    ) -> std::io::Result<FileResolution> {
        let text = std::fs::read_to_string(staged)?;
        let regions = find_conflict_regions(&text);
        if regions.is_empty() {
            return Ok(FileResolution::Skipped);
        }
        let total = regions.len();
        let mut choices = Vec::with_capacity(total);

        let (resolved_text, resolved) = resolve_regions(&text, |region, index| {
            let choice = chooser.choose_region(rel_path, region, index, total);
            choices.push(choice);
            choice
        });

        if resolved == 0 {
            debug!(path = rel_path, "all blocks skipped");
            return Ok(FileResolution::Skipped);
        }

        // Keeping "ours" of a whole-file block means keeping the developer's deletion.
        if total == 1 && choices[0] == RegionChoice::Ours && is_whole_file_deletion(&text, &regions[0]) {
            std::fs::remove_file(staged)?;
            info!(path = rel_path, "kept local deletion, dropped staged file");
            return Ok(FileResolution::Dropped);
        }

        std::fs::write(staged, resolved_text)?;
        info!(path = rel_path, resolved, total, "resolved conflict blocks");
        if resolved == total {
            Ok(FileResolution::Resolved)
        } else {
            Ok(FileResolution::Partial {
                remaining: total - resolved,
            })
        }
    }

    /// Resolve a binary conflict using its target sidecar.
    ///
    /// `Theirs` moves the sidecar over the staged file; `Ours` removes both so
    /// the project's own bytes survive apply.
    pub fn resolve_binary(
        staged: &Path,
        sidecar: &Path,
        rel_path: &str,
        chooser: &mut dyn ConflictChooser,
    ) -> std::io::Result<FileResolution> {
        match chooser.choose_binary(rel_path) {
            RegionChoice::Theirs => {
                std::fs::rename(sidecar, staged)?;
                info!(path = rel_path, "binary conflict resolved: took target");
                Ok(FileResolution::Resolved)
            }
            RegionChoice::Ours => {
                if staged.exists() {
                    std::fs::remove_file(staged)?;
                }
                std::fs::remove_file(sidecar)?;
                info!(path = rel_path, "binary conflict resolved: kept current");
                Ok(FileResolution::Dropped)
            }
            RegionChoice::Both | RegionChoice::Skip => Ok(FileResolution::Skipped),
        }
    }
}

fn is_whole_file_deletion(text: &str, region: &ConflictRegion) -> bool {
    region.ours.is_empty()
        && region.start_line == 1
        && region.end_line == text.split_inclusive('\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Vec<RegionChoice>);

    impl ConflictChooser for Scripted {
        fn choose_region(&mut self, _: &str, _: &ConflictRegion, index: usize, _: usize) -> RegionChoice {
            self.0[index]
        }
        fn choose_binary(&mut self, _: &str) -> RegionChoice {
            self.0[0]
        }
    }

    const TWO_BLOCKS: &str =
        "<<<<<<< ours\na\n=======\nb\n>>>>>>> theirs\nmid\n<<<<<<< ours\nc\n=======\nd\n>>>>>>> theirs\n";

    #[test]
    fn test_resolve_text_theirs() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("f.txt");
        std::fs::write(&staged, TWO_BLOCKS).unwrap();

        let result =
            ConflictResolver::resolve_text(&staged, "f.txt", &mut FixedChooser(RegionChoice::Theirs))
                .unwrap();
        assert_eq!(result, FileResolution::Resolved);
        assert_eq!(std::fs::read_to_string(&staged).unwrap(), "b\nmid\nd\n");
    }

    #[test]
    fn test_resolve_text_partial() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("f.txt");
        std::fs::write(&staged, TWO_BLOCKS).unwrap();

        let mut chooser = Scripted(vec![RegionChoice::Ours, RegionChoice::Skip]);
        let result = ConflictResolver::resolve_text(&staged, "f.txt", &mut chooser).unwrap();
        assert_eq!(result, FileResolution::Partial { remaining: 1 });
        let text = std::fs::read_to_string(&staged).unwrap();
        assert!(text.starts_with("a\nmid\n<<<<<<< ours\n"));
    }

    #[test]
    fn test_resolve_text_without_markers_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("f.txt");
        std::fs::write(&staged, "clean\n").unwrap();
        let result =
            ConflictResolver::resolve_text(&staged, "f.txt", &mut FixedChooser(RegionChoice::Ours))
                .unwrap();
        assert_eq!(result, FileResolution::Skipped);
    }

    #[test]
    fn test_keep_deletion_drops_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("f.txt");
        std::fs::write(&staged, "<<<<<<< ours\n=======\nnew\n>>>>>>> theirs\n").unwrap();
        let result =
            ConflictResolver::resolve_text(&staged, "f.txt", &mut FixedChooser(RegionChoice::Ours))
                .unwrap();
        assert_eq!(result, FileResolution::Dropped);
        assert!(!staged.exists());
    }

    #[test]
    fn test_resolve_binary_theirs_and_ours() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("img.png");
        let sidecar = dir.path().join("img.png.theirs");

        std::fs::write(&staged, [0u8, 1]).unwrap();
        std::fs::write(&sidecar, [0u8, 2]).unwrap();
        let result = ConflictResolver::resolve_binary(
            &staged,
            &sidecar,
            "img.png",
            &mut FixedChooser(RegionChoice::Theirs),
        )
        .unwrap();
        assert_eq!(result, FileResolution::Resolved);
        assert_eq!(std::fs::read(&staged).unwrap(), vec![0u8, 2]);
        assert!(!sidecar.exists());

        std::fs::write(&sidecar, [0u8, 3]).unwrap();
        let result = ConflictResolver::resolve_binary(
            &staged,
            &sidecar,
            "img.png",
            &mut FixedChooser(RegionChoice::Ours),
        )
        .unwrap();
        assert_eq!(result, FileResolution::Dropped);
        assert!(!staged.exists());
        assert!(!sidecar.exists());
    }
}
