//! Change decomposition: deltas, atomic chunks, composition arithmetic

pub mod chunk;
pub mod chunker;
pub mod compose;
pub mod delta;

pub use chunk::{Chunk, ChunkId};
pub use chunker::chunk_deltas;
pub use compose::{compose_file, verify_disjoint, verify_exhaustive};
pub use delta::{split_lines, DeltaKind, FileChange, FileDelta, Hunk, Line};
