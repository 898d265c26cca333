use thiserror::Error;

/// Domain errors the storage engine can report.
///
/// `storage-core` has no notion of the wire protocol's response codes —
/// that mapping belongs to the crate that speaks the protocol. Each variant
/// here corresponds 1:1 to one of the response codes in the protocol, which
/// keeps that mapping a trivial `match` at the handler boundary instead of
/// something that needs to be threaded through engine logic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    #[error("path '{0}' is empty, not absolute, or contains a comma")]
    InvalidPath(String),

    #[error("path '{0}' exceeds the maximum path length")]
    TooLongPath(String),

    #[error("'{0}' already exists")]
    FileAlreadyExists(String),

    #[error("'{0}' does not exist")]
    FileNotExists(String),

    #[error("'{0}' is already open on this connection")]
    FileAlreadyOpen(String),

    #[error("'{0}' is already locked by this connection")]
    FileAlreadyLocked(String),

    #[error("operation on '{0}' is not permitted for this connection")]
    OperationNotPermitted(String),

    #[error("content for '{0}' ({requested} bytes) exceeds the storage capacity ({max} bytes)")]
    TooLongContent { path: String, requested: usize, max: usize },

    #[error("could not evict enough capacity for '{0}'")]
    CouldNotEvict(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
