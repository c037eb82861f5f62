//! The project metadata file recording which toolkit revision the project's
//! scaffold was last generated or migrated from.
//!
//! The file is line oriented; the recorded revision is the value of the
//! first `revision:` line. Other lines are preserved on rewrite.

use std::path::Path;

use tracing::debug;

const REVISION_KEY: &str = "revision:";

/// Read the recorded revision, or `None` if the file or the line is absent.
pub fn read_revision(path: &Path) -> std::io::Result<Option<String>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(parse_revision(&contents))
}

fn parse_revision(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let value = line.trim_start().strip_prefix(REVISION_KEY)?;
        let value = value.trim().trim_matches('"').trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Record `revision`, replacing an existing `revision:` line or appending one.
pub fn write_revision(path: &Path, revision: &str) -> std::io::Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let line = format!("{} {}", REVISION_KEY, revision);
    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|l| {
            if !replaced && l.trim_start().starts_with(REVISION_KEY) {
                replaced = true;
                line.clone()
            } else {
                l.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(line);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, out)?;
    debug!(path = %path.display(), revision, "recorded project revision");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_revision() {
        assert_eq!(parse_revision("revision: abc123\n"), Some("abc123".into()));
        assert_eq!(
            parse_revision("# generated\n  revision: \"abc\"\nchannel: stable\n"),
            Some("abc".into())
        );
        assert_eq!(parse_revision("channel: stable\n"), None);
        assert_eq!(parse_revision("revision:\n"), None);
    }

    #[test]
    fn test_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_revision(&dir.path().join(".migrate_metadata")).unwrap(), None);
    }

    #[test]
    fn test_write_replaces_and_preserves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".migrate_metadata");
        std::fs::write(&path, "# keep\nrevision: old\nchannel: stable\n").unwrap();

        write_revision(&path, "new").unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# keep\nrevision: new\nchannel: stable\n"
        );
        assert_eq!(read_revision(&path).unwrap(), Some("new".into()));
    }

    #[test]
    fn test_write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".migrate_metadata");
        write_revision(&path, "abc").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "revision: abc\n");
    }
}
