//! Per-file delta model
//!
//! A `FileDelta` is one path's worth of change between the base tree and the
//! target tree, carrying zero-context hunks. Line content is kept as raw
//! bytes, each line including its trailing newline (the last line of a file
//! may lack one), so recomposition is byte-exact.

use std::sync::Arc;

/// A single line of content, including its `\n` terminator when present
pub type Line = Vec<u8>;

/// Split file content into lines, each keeping its newline terminator
pub fn split_lines(content: &[u8]) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in content.iter().enumerate() {
        if b == b'\n' {
            lines.push(content[start..=i].to_vec());
            start = i + 1;
        }
    }
    if start < content.len() {
        lines.push(content[start..].to_vec());
    }
    lines
}

/// Join lines back into file content
pub fn join_lines(lines: &[Line]) -> Vec<u8> {
    let mut out = Vec::with_capacity(lines.iter().map(|l| l.len()).sum());
    for line in lines {
        out.extend_from_slice(line);
    }
    out
}

/// Kind of change a delta represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    Added,
    Deleted,
    Modified,
    Renamed,
}

/// Identity of a changed file, shared by all of its chunks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileChange {
    pub kind: DeltaKind,
    /// Path in the base tree (None for additions)
    pub old_path: Option<String>,
    /// Path in the target tree (None for deletions)
    pub new_path: Option<String>,
    /// File mode in the base tree, e.g. "100644"
    pub old_mode: Option<String>,
    /// File mode in the target tree
    pub new_mode: Option<String>,
    /// Binary files pass through opaquely via their blob ids
    pub is_binary: bool,
    /// Target-side blob id (used for binary passthrough)
    pub new_blob_id: Option<String>,
}

impl FileChange {
    /// The path this change is keyed under for grouping and reporting
    pub fn canonical_path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }

    pub fn extension(&self) -> Option<&str> {
        std::path::Path::new(self.canonical_path())
            .extension()
            .and_then(|e| e.to_str())
    }
}

/// A contiguous zero-context edit inside one file
///
/// `old_start` is the 1-based first removed line; for pure insertions it is
/// the line *after which* the insertion happens (0 = top of file), matching
/// git's `@@ -N,0` convention. Same for `new_start` on the other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub new_start: u32,
    pub old_lines: Vec<Line>,
    pub new_lines: Vec<Line>,
}

impl Hunk {
    pub fn old_len(&self) -> u32 {
        self.old_lines.len() as u32
    }

    pub fn new_len(&self) -> u32 {
        self.new_lines.len() as u32
    }
}

/// One path's worth of change between base and target trees
#[derive(Debug, Clone)]
pub struct FileDelta {
    pub change: Arc<FileChange>,
    pub hunks: Vec<Hunk>,
}

impl FileDelta {
    pub fn new(change: FileChange, hunks: Vec<Hunk>) -> Self {
        Self {
            change: Arc::new(change),
            hunks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_join_roundtrip() {
        let content = b"a\nb\nc\n".to_vec();
        let lines = split_lines(&content);
        assert_eq!(lines.len(), 3);
        assert_eq!(join_lines(&lines), content);
    }

    #[test]
    fn test_split_without_trailing_newline() {
        let content = b"a\nb".to_vec();
        let lines = split_lines(&content);
        assert_eq!(lines, vec![b"a\n".to_vec(), b"b".to_vec()]);
        assert_eq!(join_lines(&lines), content);
    }

    #[test]
    fn test_split_empty() {
        assert!(split_lines(b"").is_empty());
    }

    #[test]
    fn test_canonical_path_prefers_new() {
        let change = FileChange {
            kind: DeltaKind::Renamed,
            old_path: Some("old.py".into()),
            new_path: Some("new.py".into()),
            old_mode: Some("100644".into()),
            new_mode: Some("100644".into()),
            is_binary: false,
            new_blob_id: None,
        };
        assert_eq!(change.canonical_path(), "new.py");
        assert_eq!(change.extension(), Some("py"));
    }
}
