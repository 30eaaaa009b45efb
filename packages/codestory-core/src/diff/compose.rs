//! Chunk composition arithmetic
//!
//! Applying a subset of a file's chunks to the base content: concatenate the
//! base slices between chunk old-ranges, substituting each chunk's new lines
//! at its old position. Because chunks are disjoint on both sides the
//! procedure is total and the result depends only on the subset, not on the
//! order the caller supplies it in.

use super::chunk::Chunk;
use super::delta::{join_lines, split_lines, Line};
use crate::errors::{CoreError, Result};

/// Apply `chunks` (any order, any subset of one file's chunks) to the base
/// content and return the produced bytes
pub fn compose_file(base: &[u8], chunks: &[&Chunk]) -> Result<Vec<u8>> {
    let base_lines = split_lines(base);
    let mut ordered: Vec<&Chunk> = chunks.iter().copied().filter(|c| !c.is_marker()).collect();
    ordered.sort_by_key(|c| c.old_order_key());

    let mut out: Vec<Line> = Vec::with_capacity(base_lines.len());
    let mut cursor = 0usize; // 0-based index of the next base line to copy

    for chunk in &ordered {
        let old_len = chunk.old_len() as usize;
        // number of base lines strictly before this chunk's old position
        let before = if old_len == 0 {
            chunk.old_start as usize
        } else {
            (chunk.old_start as usize).saturating_sub(1)
        };

        if before < cursor || before + old_len > base_lines.len() {
            return Err(CoreError::ChunkingInvariantViolated(format!(
                "chunk {} at old line {} does not fit base of {} lines (cursor {})",
                chunk.id,
                chunk.old_start,
                base_lines.len(),
                cursor
            )));
        }

        out.extend_from_slice(&base_lines[cursor..before]);
        for (i, line) in chunk.old_lines.iter().enumerate() {
            if &base_lines[before + i] != line {
                return Err(CoreError::ChunkingInvariantViolated(format!(
                    "chunk {} old content mismatch at line {}",
                    chunk.id,
                    chunk.old_start + i as u32
                )));
            }
        }
        out.extend(chunk.new_lines.iter().cloned());
        cursor = before + old_len;
    }
    out.extend_from_slice(&base_lines[cursor..]);

    Ok(join_lines(&out))
}

/// Prove chunk exhaustiveness for one file: applying every chunk to the base
/// must reproduce the target byte-for-byte
pub fn verify_exhaustive(base: &[u8], target: &[u8], chunks: &[&Chunk]) -> Result<()> {
    let produced = compose_file(base, chunks)?;
    if produced != target {
        let path = chunks
            .first()
            .map(|c| c.change.canonical_path().to_string())
            .unwrap_or_default();
        return Err(CoreError::ChunkingInvariantViolated(format!(
            "recomposed content for {path} does not match the target ({} vs {} bytes)",
            produced.len(),
            target.len()
        )));
    }
    Ok(())
}

/// Check pairwise disjointness of one file's chunks
pub fn verify_disjoint(chunks: &[&Chunk]) -> Result<()> {
    for (i, a) in chunks.iter().enumerate() {
        for b in chunks.iter().skip(i + 1) {
            if !a.is_disjoint_from(b) {
                return Err(CoreError::ChunkingInvariantViolated(format!(
                    "chunks {} and {} of {} overlap",
                    a.id,
                    b.id,
                    a.change.canonical_path()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::chunk::ChunkId;
    use crate::diff::delta::{DeltaKind, FileChange};
    use std::sync::Arc;

    fn change() -> Arc<FileChange> {
        Arc::new(FileChange {
            kind: DeltaKind::Modified,
            old_path: Some("a.py".into()),
            new_path: Some("a.py".into()),
            old_mode: Some("100644".into()),
            new_mode: Some("100644".into()),
            is_binary: false,
            new_blob_id: None,
        })
    }

    fn chunk(id: u32, old_start: u32, old: &[&str], new_start: u32, new: &[&str]) -> Chunk {
        Chunk {
            id: ChunkId(id),
            change: change(),
            old_start,
            new_start,
            old_lines: old.iter().map(|s| s.as_bytes().to_vec()).collect(),
            new_lines: new.iter().map(|s| s.as_bytes().to_vec()).collect(),
        }
    }

    const BASE: &[u8] = b"def f():\n    return 1\n";

    #[test]
    fn test_insert_at_top_and_bottom() {
        let top = chunk(0, 0, &[], 1, &["def g(): return 2\n"]);
        let bottom = chunk(1, 2, &[], 4, &["def h(): return 3\n"]);

        let out = compose_file(BASE, &[&top, &bottom]).unwrap();
        assert_eq!(
            out,
            b"def g(): return 2\ndef f():\n    return 1\ndef h(): return 3\n".to_vec()
        );
    }

    #[test]
    fn test_order_independence() {
        let top = chunk(0, 0, &[], 1, &["top\n"]);
        let bottom = chunk(1, 2, &[], 4, &["bottom\n"]);

        let forward = compose_file(BASE, &[&top, &bottom]).unwrap();
        let reversed = compose_file(BASE, &[&bottom, &top]).unwrap();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_subset_application() {
        let top = chunk(0, 0, &[], 1, &["top\n"]);
        let bottom = chunk(1, 2, &[], 4, &["bottom\n"]);

        let only_bottom = compose_file(BASE, &[&bottom]).unwrap();
        assert_eq!(only_bottom, b"def f():\n    return 1\nbottom\n".to_vec());
        let only_top = compose_file(BASE, &[&top]).unwrap();
        assert_eq!(only_top, b"top\ndef f():\n    return 1\n".to_vec());
        assert_eq!(compose_file(BASE, &[]).unwrap(), BASE.to_vec());
    }

    #[test]
    fn test_replacement() {
        let replace = chunk(0, 2, &["    return 1\n"], 2, &["    return 42\n"]);
        let out = compose_file(BASE, &[&replace]).unwrap();
        assert_eq!(out, b"def f():\n    return 42\n".to_vec());
    }

    #[test]
    fn test_deletion_to_empty() {
        let del = chunk(0, 1, &["def f():\n", "    return 1\n"], 0, &[]);
        let out = compose_file(BASE, &[&del]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_old_content_mismatch_is_invariant_violation() {
        let bad = chunk(0, 1, &["not the base line\n"], 1, &["x\n"]);
        assert!(compose_file(BASE, &[&bad]).is_err());
    }

    #[test]
    fn test_out_of_bounds_is_invariant_violation() {
        let bad = chunk(0, 99, &["zzz\n"], 99, &[]);
        assert!(compose_file(BASE, &[&bad]).is_err());
    }

    #[test]
    fn test_verify_exhaustive() {
        let replace = chunk(0, 2, &["    return 1\n"], 2, &["    return 42\n"]);
        let target = b"def f():\n    return 42\n";
        assert!(verify_exhaustive(BASE, target, &[&replace]).is_ok());
        assert!(verify_exhaustive(BASE, b"something else\n", &[&replace]).is_err());
    }

    #[test]
    fn test_verify_disjoint_flags_overlap() {
        let a = chunk(0, 1, &["def f():\n"], 1, &["def f2():\n"]);
        let b = chunk(1, 1, &["def f():\n"], 1, &["def f3():\n"]);
        assert!(verify_disjoint(&[&a, &b]).is_err());
    }
}
