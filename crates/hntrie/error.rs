use thiserror::Error;

/// Failures adopting a serialised buffer. In-memory operations never fail:
/// oversized needles are truncated, empty needles are no-ops and buffer
/// exhaustion is handled by growing in place.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrieError {
    #[error("snapshot of {0} bytes is shorter than the fixed header")]
    SnapshotTooShort(usize),
    #[error("corrupt snapshot header: {0}")]
    CorruptHeader(&'static str),
    #[error("cell {cell} links outside the cell region")]
    DanglingCell { cell: u32 },
    #[error("cell {cell} references bytes outside the segment pool")]
    DanglingSegment { cell: u32 },
}
