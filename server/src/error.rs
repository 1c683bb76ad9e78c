use shared::{ErrorKind, PlayerId};
use thiserror::Error;

/// Failures of the rank index cache. The index is rebuildable from best
/// records, so callers treat these as recoverable.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("rank index lock poisoned")]
    Poisoned,
    #[error("rank index unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("contact {0:?} is already registered")]
    DuplicateContact(String),
    #[error("journal I/O error: {0}")]
    Journal(#[from] std::io::Error),
    #[error("journal codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("journal writer has shut down")]
    Closed,
}

impl StoreError {
    /// Maps the error onto the wire-level error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::UnknownPlayer(_) => ErrorKind::NotFound,
            StoreError::DuplicateContact(_) => ErrorKind::Conflict,
            StoreError::Journal(_)
            | StoreError::Codec(_)
            | StoreError::Index(_)
            | StoreError::Closed => ErrorKind::Internal,
        }
    }
}
