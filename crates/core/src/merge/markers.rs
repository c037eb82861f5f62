//! Conflict-marker parsing and rewriting.
//!
//! Conflicted text files carry Git-style blocks:
//!
//! ```text
//! <<<<<<< ours
//! current content
//! ||||||| original        (optional)
//! base content
//! =======
//! target content
//! >>>>>>> theirs
//! ```
//!
//! The staging directory's conflict state is always recomputed from these
//! blocks, so the parser is deliberately strict about what a marker line is:
//! exactly seven marker characters, then end of line or a space.

use serde::{Deserialize, Serialize};

pub const OURS_MARKER: &str = "<<<<<<<";
pub const BASE_MARKER: &str = "|||||||";
pub const SEPARATOR_MARKER: &str = "=======";
pub const THEIRS_MARKER: &str = ">>>>>>>";

/// A complete conflict block within a text file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRegion {
    /// Line (1-indexed) of the `<<<<<<<` marker.
    pub start_line: usize,
    /// Line (1-indexed) of the `=======` marker.
    pub separator_line: usize,
    /// Line (1-indexed) of the `>>>>>>>` marker.
    pub end_line: usize,
    /// Current-side lines, terminators included.
    pub ours: String,
    /// Base lines when the block has a `|||||||` section.
    pub base: Option<String>,
    /// Target-side lines, terminators included.
    pub theirs: String,
}

/// Which content replaces a conflict block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionChoice {
    /// Keep the current (ours) lines.
    Ours,
    /// Take the target (theirs) lines.
    Theirs,
    /// Ours followed by theirs.
    Both,
    /// Leave the block in place.
    Skip,
}

fn is_marker(line: &str, marker: &str) -> bool {
    let line = line.trim_end_matches(['\n', '\r']);
    match line.strip_prefix(marker) {
        Some(rest) => rest.is_empty() || rest.starts_with(' '),
        None => false,
    }
}

enum State {
    Outside,
    Ours,
    Base,
    Theirs,
}

/// Parse every complete conflict block in `text`.
pub fn find_conflict_regions(text: &str) -> Vec<ConflictRegion> {
    let mut regions = Vec::new();
    let mut state = State::Outside;
    let mut start_line = 0;
    let mut separator_line = 0;
    let mut ours = String::new();
    let mut base: Option<String> = None;
    let mut theirs = String::new();

    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        state = match state {
            State::Outside => {
                if is_marker(line, OURS_MARKER) {
                    start_line = line_no;
                    ours.clear();
                    base = None;
                    theirs.clear();
                    State::Ours
                } else {
                    State::Outside
                }
            }
            State::Ours => {
                if is_marker(line, BASE_MARKER) {
                    base = Some(String::new());
                    State::Base
                } else if is_marker(line, SEPARATOR_MARKER) {
                    separator_line = line_no;
                    State::Theirs
                } else if is_marker(line, OURS_MARKER) {
                    // A nested opener restarts the block.
                    start_line = line_no;
                    ours.clear();
                    State::Ours
                } else {
                    ours.push_str(line);
                    State::Ours
                }
            }
            State::Base => {
                if is_marker(line, SEPARATOR_MARKER) {
                    separator_line = line_no;
                    State::Theirs
                } else {
                    if let Some(b) = base.as_mut() {
                        b.push_str(line);
                    }
                    State::Base
                }
            }
            State::Theirs => {
                if is_marker(line, THEIRS_MARKER) {
                    regions.push(ConflictRegion {
                        start_line,
                        separator_line,
                        end_line: line_no,
                        ours: std::mem::take(&mut ours),
                        base: base.take(),
                        theirs: std::mem::take(&mut theirs),
                    });
                    State::Outside
                } else {
                    theirs.push_str(line);
                    State::Theirs
                }
            }
        };
    }
    regions
}

/// Whether `text` still carries conflict markers.
///
/// Any complete block counts, and so does a stray `<<<<<<<` or `>>>>>>>`
/// line left behind by a partial manual edit. A lone `=======` does not,
/// since it is common in ordinary documents.
pub fn has_conflict_markers(text: &str) -> bool {
    !find_conflict_regions(text).is_empty()
        || text
            .split_inclusive('\n')
            .any(|line| is_marker(line, OURS_MARKER) || is_marker(line, THEIRS_MARKER))
}

/// Rewrite `text`, replacing each block with the content `choose` selects.
///
/// `choose` receives the block and its index. Returns the new text and the
/// number of blocks that were replaced.
pub fn resolve_regions<F>(text: &str, mut choose: F) -> (String, usize)
where
    F: FnMut(&ConflictRegion, usize) -> RegionChoice,
{
    let regions = find_conflict_regions(text);
    if regions.is_empty() {
        return (text.to_string(), 0);
    }

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut output = String::with_capacity(text.len());
    let mut resolved = 0;
    let mut next_line = 1;

    for (index, region) in regions.iter().enumerate() {
        for line in &lines[next_line - 1..region.start_line - 1] {
            output.push_str(line);
        }
        match choose(region, index) {
            RegionChoice::Ours => output.push_str(&region.ours),
            RegionChoice::Theirs => output.push_str(&region.theirs),
            RegionChoice::Both => {
                output.push_str(&region.ours);
                output.push_str(&region.theirs);
            }
            RegionChoice::Skip => {
                for line in &lines[region.start_line - 1..region.end_line] {
                    output.push_str(line);
                }
                next_line = region.end_line + 1;
                continue;
            }
        }
        resolved += 1;
        next_line = region.end_line + 1;
    }
    for line in &lines[next_line - 1..] {
        output.push_str(line);
    }
    (output, resolved)
}
