//! Merging, conflict markers, and conflict resolution.
//!
//! The merge subsystem is responsible for:
//! 1. **Merging** -- reconciling base, target, and current content per file.
//! 2. **Markers** -- finding conflict blocks left in staged text files.
//! 3. **Resolution** -- rewriting staged files with a chosen side.

pub mod markers;
pub mod merger;
pub mod resolver;

pub use markers::{find_conflict_regions, has_conflict_markers, ConflictRegion, RegionChoice};
pub use merger::{is_binary, MergeResult, MergeStrategy, Merger};
pub use resolver::{ConflictChooser, ConflictResolver, FileResolution, FixedChooser};
