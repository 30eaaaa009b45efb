//! Unified diff parser
//!
//! Parses `git diff -U0 --full-index` patch output into `FileDelta`s. Only
//! the constructs zero-context diffs emit are handled: file headers, mode
//! lines, rename lines, binary markers, hunks and the no-newline marker.

use std::sync::Arc;

use crate::diff::delta::{DeltaKind, FileChange, FileDelta, Hunk, Line};
use crate::errors::{CoreError, Result};

/// Parse a full patch stream into per-file deltas
pub fn parse_patch(patch: &[u8]) -> Result<Vec<FileDelta>> {
    let lines: Vec<&[u8]> = split_raw_lines(patch);
    let mut deltas = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if lines[i].starts_with(b"diff --git ") {
            let (delta, next) = parse_file_section(&lines, i)?;
            deltas.push(delta);
            i = next;
        } else {
            i += 1;
        }
    }
    Ok(deltas)
}

fn split_raw_lines(patch: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in patch.iter().enumerate() {
        if b == b'\n' {
            lines.push(&patch[start..i]);
            start = i + 1;
        }
    }
    if start < patch.len() {
        lines.push(&patch[start..]);
    }
    lines
}

struct SectionState {
    kind: Option<DeltaKind>,
    old_path: Option<String>,
    new_path: Option<String>,
    old_mode: Option<String>,
    new_mode: Option<String>,
    is_binary: bool,
    new_blob_id: Option<String>,
}

fn parse_file_section(lines: &[&[u8]], start: usize) -> Result<(FileDelta, usize)> {
    let header = String::from_utf8_lossy(lines[start]).to_string();
    let (header_old, header_new) = parse_git_header(&header)?;

    let mut state = SectionState {
        kind: None,
        old_path: Some(header_old),
        new_path: Some(header_new),
        old_mode: None,
        new_mode: None,
        is_binary: false,
        new_blob_id: None,
    };

    let mut i = start + 1;
    // header block
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with(b"diff --git ") || line.starts_with(b"@@ ") {
            break;
        }
        let text = String::from_utf8_lossy(line).to_string();
        if let Some(mode) = text.strip_prefix("new file mode ") {
            state.kind = Some(DeltaKind::Added);
            state.new_mode = Some(mode.trim().to_string());
        } else if let Some(mode) = text.strip_prefix("deleted file mode ") {
            state.kind = Some(DeltaKind::Deleted);
            state.old_mode = Some(mode.trim().to_string());
        } else if let Some(mode) = text.strip_prefix("old mode ") {
            state.old_mode = Some(mode.trim().to_string());
        } else if let Some(mode) = text.strip_prefix("new mode ") {
            state.new_mode = Some(mode.trim().to_string());
        } else if let Some(path) = text.strip_prefix("rename from ") {
            state.kind = Some(DeltaKind::Renamed);
            state.old_path = Some(unquote_path(path.trim()));
        } else if let Some(path) = text.strip_prefix("rename to ") {
            state.kind = Some(DeltaKind::Renamed);
            state.new_path = Some(unquote_path(path.trim()));
        } else if let Some(rest) = text.strip_prefix("index ") {
            parse_index_line(rest, &mut state);
        } else if text.starts_with("Binary files ") || text.starts_with("GIT binary patch") {
            state.is_binary = true;
        } else if let Some(path) = text.strip_prefix("--- ") {
            if path.trim() == "/dev/null" {
                state.old_path = None;
                state.kind.get_or_insert(DeltaKind::Added);
            }
        } else if let Some(path) = text.strip_prefix("+++ ") {
            if path.trim() == "/dev/null" {
                state.new_path = None;
                state.kind.get_or_insert(DeltaKind::Deleted);
            }
        }
        i += 1;
    }

    // hunk block
    let mut hunks = Vec::new();
    while i < lines.len() && lines[i].starts_with(b"@@ ") {
        let (hunk, next) = parse_hunk(lines, i)?;
        hunks.push(hunk);
        i = next;
    }

    let kind = state.kind.unwrap_or(DeltaKind::Modified);
    let change = FileChange {
        kind,
        old_path: if kind == DeltaKind::Added {
            None
        } else {
            state.old_path
        },
        new_path: if kind == DeltaKind::Deleted {
            None
        } else {
            state.new_path
        },
        old_mode: state.old_mode,
        new_mode: state.new_mode,
        is_binary: state.is_binary,
        new_blob_id: state.new_blob_id,
    };

    Ok((
        FileDelta {
            change: Arc::new(change),
            hunks,
        },
        i,
    ))
}

/// `diff --git a/<old> b/<new>` with optional quoting
fn parse_git_header(header: &str) -> Result<(String, String)> {
    let rest = header
        .strip_prefix("diff --git ")
        .ok_or_else(|| CoreError::gateway(format!("malformed diff header: {header}")))?;

    // Quoted paths may contain spaces; unquoted paths cannot, so splitting
    // on ` b/` is unambiguous for the unquoted case
    if let Some(stripped) = rest.strip_prefix('"') {
        let close = stripped
            .find('"')
            .ok_or_else(|| CoreError::gateway(format!("unterminated quote: {header}")))?;
        let old = unquote_path(&format!("\"{}\"", &stripped[..close]));
        let tail = stripped[close + 1..].trim_start();
        let new = unquote_path(tail);
        return Ok((strip_prefix_component(&old), strip_prefix_component(&new)));
    }

    let split = rest
        .find(" b/")
        .ok_or_else(|| CoreError::gateway(format!("malformed diff header: {header}")))?;
    let old = &rest[..split];
    let new = &rest[split + 1..];
    Ok((
        strip_prefix_component(&unquote_path(old)),
        strip_prefix_component(&unquote_path(new)),
    ))
}

fn strip_prefix_component(path: &str) -> String {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .to_string()
}

/// Undo git's C-style path quoting
fn unquote_path(path: &str) -> String {
    let inner = match path.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
        Some(inner) => inner,
        None => return path.to_string(),
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

/// `index <old>..<new>[ <mode>]`
fn parse_index_line(rest: &str, state: &mut SectionState) {
    let mut parts = rest.trim().split_whitespace();
    if let Some(ids) = parts.next() {
        if let Some((_, new_id)) = ids.split_once("..") {
            if new_id.chars().all(|c| c.is_ascii_hexdigit()) && new_id.len() >= 40 {
                state.new_blob_id = Some(new_id.to_string());
            }
        }
    }
    if let Some(mode) = parts.next() {
        if state.old_mode.is_none() {
            state.old_mode = Some(mode.to_string());
        }
        if state.new_mode.is_none() {
            state.new_mode = Some(mode.to_string());
        }
    }
}

/// One `@@ -l[,s] +l[,s] @@` hunk with its body
fn parse_hunk(lines: &[&[u8]], start: usize) -> Result<(Hunk, usize)> {
    let header = String::from_utf8_lossy(lines[start]).to_string();
    let (old_start, old_len, new_start, new_len) = parse_hunk_header(&header)?;

    let mut old_lines: Vec<Line> = Vec::with_capacity(old_len as usize);
    let mut new_lines: Vec<Line> = Vec::with_capacity(new_len as usize);
    // which side the last content line belonged to, for the no-newline marker
    let mut last_was_new = false;

    let mut i = start + 1;
    while i < lines.len() {
        let line = lines[i];
        match line.first().copied() {
            Some(b'-') => {
                let mut content = line[1..].to_vec();
                content.push(b'\n');
                old_lines.push(content);
                last_was_new = false;
            }
            Some(b'+') => {
                let mut content = line[1..].to_vec();
                content.push(b'\n');
                new_lines.push(content);
                last_was_new = true;
            }
            Some(b'\\') => {
                // `\ No newline at end of file` refers to the previous line
                let target = if last_was_new {
                    new_lines.last_mut()
                } else {
                    old_lines.last_mut()
                };
                if let Some(prev) = target {
                    if prev.last() == Some(&b'\n') {
                        prev.pop();
                    }
                }
            }
            Some(b' ') => {
                // context lines do not appear in zero-context diffs
                return Err(CoreError::gateway(
                    "unexpected context line in zero-context diff".to_string(),
                ));
            }
            _ => break,
        }
        i += 1;
    }

    if old_lines.len() != old_len as usize || new_lines.len() != new_len as usize {
        return Err(CoreError::gateway(format!(
            "hunk body does not match header {header}: -{} +{}",
            old_lines.len(),
            new_lines.len()
        )));
    }

    Ok((
        Hunk {
            old_start,
            new_start,
            old_lines,
            new_lines,
        },
        i,
    ))
}

fn parse_hunk_header(header: &str) -> Result<(u32, u32, u32, u32)> {
    let err = || CoreError::gateway(format!("malformed hunk header: {header}"));
    let inner = header
        .strip_prefix("@@ -")
        .and_then(|h| h.split(" @@").next())
        .ok_or_else(err)?;
    let (old_part, new_part) = inner.split_once(" +").ok_or_else(err)?;

    let parse_side = |side: &str| -> Result<(u32, u32)> {
        match side.split_once(',') {
            Some((start, len)) => Ok((
                start.parse().map_err(|_| err())?,
                len.parse().map_err(|_| err())?,
            )),
            None => Ok((side.parse().map_err(|_| err())?, 1)),
        }
    };
    let (old_start, old_len) = parse_side(old_part)?;
    let (new_start, new_len) = parse_side(new_part)?;
    Ok((old_start, old_len, new_start, new_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modified_file() {
        let patch = b"diff --git a/a.py b/a.py\n\
index 0000000000000000000000000000000000000000..1111111111111111111111111111111111111111 100644\n\
--- a/a.py\n\
+++ b/a.py\n\
@@ -2,1 +2,2 @@\n\
-    return 1\n\
+    return 2\n\
+    # done\n";
        let deltas = parse_patch(patch).unwrap();
        assert_eq!(deltas.len(), 1);
        let delta = &deltas[0];
        assert_eq!(delta.change.kind, DeltaKind::Modified);
        assert_eq!(delta.change.canonical_path(), "a.py");
        assert_eq!(delta.hunks.len(), 1);
        assert_eq!(delta.hunks[0].old_start, 2);
        assert_eq!(delta.hunks[0].old_lines, vec![b"    return 1\n".to_vec()]);
        assert_eq!(delta.hunks[0].new_lines.len(), 2);
    }

    #[test]
    fn test_added_file() {
        let patch = b"diff --git a/new.py b/new.py\n\
new file mode 100644\n\
index 0000000000000000000000000000000000000000..1111111111111111111111111111111111111111\n\
--- /dev/null\n\
+++ b/new.py\n\
@@ -0,0 +1,2 @@\n\
+def f():\n\
+    return 1\n";
        let deltas = parse_patch(patch).unwrap();
        let delta = &deltas[0];
        assert_eq!(delta.change.kind, DeltaKind::Added);
        assert_eq!(delta.change.old_path, None);
        assert_eq!(delta.change.new_mode.as_deref(), Some("100644"));
        assert_eq!(delta.hunks[0].old_start, 0);
        assert_eq!(delta.hunks[0].new_lines.len(), 2);
    }

    #[test]
    fn test_deleted_file() {
        let patch = b"diff --git a/gone.py b/gone.py\n\
deleted file mode 100644\n\
index 1111111111111111111111111111111111111111..0000000000000000000000000000000000000000\n\
--- a/gone.py\n\
+++ /dev/null\n\
@@ -1,1 +0,0 @@\n\
-print(1)\n";
        let deltas = parse_patch(patch).unwrap();
        let delta = &deltas[0];
        assert_eq!(delta.change.kind, DeltaKind::Deleted);
        assert_eq!(delta.change.new_path, None);
        assert_eq!(delta.change.old_path.as_deref(), Some("gone.py"));
    }

    #[test]
    fn test_rename_with_edit() {
        let patch = b"diff --git a/old.py b/new.py\n\
similarity index 90%\n\
rename from old.py\n\
rename to new.py\n\
index 1111111111111111111111111111111111111111..2222222222222222222222222222222222222222 100644\n\
--- a/old.py\n\
+++ b/new.py\n\
@@ -1,1 +1,1 @@\n\
-x = 1\n\
+x = 2\n";
        let deltas = parse_patch(patch).unwrap();
        let delta = &deltas[0];
        assert_eq!(delta.change.kind, DeltaKind::Renamed);
        assert_eq!(delta.change.old_path.as_deref(), Some("old.py"));
        assert_eq!(delta.change.new_path.as_deref(), Some("new.py"));
        assert_eq!(delta.hunks.len(), 1);
    }

    #[test]
    fn test_binary_passthrough() {
        let patch = b"diff --git a/logo.png b/logo.png\n\
index 1111111111111111111111111111111111111111..2222222222222222222222222222222222222222 100644\n\
Binary files a/logo.png and b/logo.png differ\n";
        let deltas = parse_patch(patch).unwrap();
        let delta = &deltas[0];
        assert!(delta.change.is_binary);
        assert!(delta.hunks.is_empty());
        assert_eq!(
            delta.change.new_blob_id.as_deref(),
            Some("2222222222222222222222222222222222222222")
        );
    }

    #[test]
    fn test_no_newline_marker() {
        let patch = b"diff --git a/a.txt b/a.txt\n\
index 1111111111111111111111111111111111111111..2222222222222222222222222222222222222222 100644\n\
--- a/a.txt\n\
+++ b/a.txt\n\
@@ -1,1 +1,1 @@\n\
-old\n\
\\ No newline at end of file\n\
+new\n\
\\ No newline at end of file\n";
        let deltas = parse_patch(patch).unwrap();
        let hunk = &deltas[0].hunks[0];
        assert_eq!(hunk.old_lines, vec![b"old".to_vec()]);
        assert_eq!(hunk.new_lines, vec![b"new".to_vec()]);
    }

    #[test]
    fn test_multiple_hunks_and_files() {
        let patch = b"diff --git a/a.py b/a.py\n\
index 1111111111111111111111111111111111111111..2222222222222222222222222222222222222222 100644\n\
--- a/a.py\n\
+++ b/a.py\n\
@@ -1,1 +1,1 @@\n\
-a\n\
+A\n\
@@ -9,0 +10,1 @@\n\
+tail\n\
diff --git a/b.py b/b.py\n\
index 3333333333333333333333333333333333333333..4444444444444444444444444444444444444444 100644\n\
--- a/b.py\n\
+++ b/b.py\n\
@@ -5,2 +5,0 @@\n\
-x\n\
-y\n";
        let deltas = parse_patch(patch).unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].hunks.len(), 2);
        assert_eq!(deltas[0].hunks[1].old_start, 9);
        assert_eq!(deltas[0].hunks[1].old_lines.len(), 0);
        assert_eq!(deltas[1].hunks[0].old_lines.len(), 2);
    }

    #[test]
    fn test_hunk_header_parsing() {
        assert_eq!(parse_hunk_header("@@ -1,2 +3,4 @@").unwrap(), (1, 2, 3, 4));
        assert_eq!(parse_hunk_header("@@ -7 +9 @@").unwrap(), (7, 1, 9, 1));
        assert_eq!(
            parse_hunk_header("@@ -0,0 +1,5 @@ def f():").unwrap(),
            (0, 0, 1, 5)
        );
        assert!(parse_hunk_header("not a header").is_err());
    }

    #[test]
    fn test_quoted_paths() {
        let (old, new) = parse_git_header("diff --git a/with space.py b/with space.py").unwrap();
        assert_eq!(old, "with space.py");
        assert_eq!(new, "with space.py");
    }
}
