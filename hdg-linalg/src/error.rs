//! Error types for distributed linear algebra.

use thiserror::Error;

/// Errors raised by collective communication.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommError {
    /// Another rank of the group aborted, so the collective can never complete.
    #[error("communicator group was aborted while rank {rank} was waiting in a collective")]
    Aborted { rank: usize },
    /// A personalised exchange needs exactly one buffer per rank.
    #[error("expected one send buffer per rank ({expected}), got {actual}")]
    WrongBufferCount { expected: usize, actual: usize },
    /// A received buffer could not be decoded into whole elements.
    #[error("received {len} bytes, which is not a multiple of the element size {element_size}")]
    Truncated { len: usize, element_size: usize },
}

/// Unified error type for `hdg-linalg` operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinalgError {
    #[error(transparent)]
    Comm(#[from] CommError),
    /// Ownership ranges overlap, leave gaps, or disagree between ranks.
    #[error("inconsistent layout: {0}")]
    InconsistentLayout(String),
    #[error("global index {index} is out of range for global size {global_size}")]
    IndexOutOfRange { index: usize, global_size: usize },
    #[error("index {index} is not owned by rank {rank}")]
    NotOwned { index: usize, rank: usize },
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("operands do not share the same layout")]
    LayoutMismatch,
    /// Inserting the entry would exceed the preallocated capacity of the row.
    #[error("preallocation exceeded in row {row} while inserting column {col} into the {block} block")]
    PreallocationExceeded { row: usize, col: usize, block: &'static str },
    #[error("object has already been assembled; no further insertion is permitted")]
    AlreadyAssembled,
    #[error("object must be assembled before this operation")]
    NotAssembled,
    #[error("cannot mix insert and add modes before assembly")]
    MixedInsertModes,
    #[error("invalid scatter: {0}")]
    InvalidScatter(String),
    /// The scatter index pair was built for a different DOF set.
    #[error("stale scatter: index pair has generation {found}, current generation is {expected}")]
    StaleScatter { expected: u64, found: u64 },
    #[error("non-positive diagonal entry in local row {row}")]
    NonPositiveDiagonal { row: usize },
    #[error("coarse grid factorization failed")]
    CoarseSolveFailed,
    #[error("unknown Krylov solver type `{0}`")]
    UnknownKspType(String),
    #[error("unknown preconditioner type `{0}`")]
    UnknownPcType(String),
    #[error("sparse format error: {0}")]
    SparseFormat(String),
}
