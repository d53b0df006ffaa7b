//! Error taxonomy for the quad store.
//!
//! Recoverable conditions (an absent store on a non-create open, an add of a
//! triple that is already present, a remove of something that is not there)
//! are reported as ordinary return values and never appear here.

use crate::keys::TermId;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum StoreError {
    /// Operation attempted before `open` or after `close`.
    NotOpen,
    /// `open` with create requested over an existing, non-empty directory.
    AlreadyExists(PathBuf),
    /// Operation requires a closed store (`destroy`, or a second `open`).
    StoreIsOpen,
    /// Reverse dictionary lookup missed; the indexes reference an id that was never interned.
    UnknownId(TermId),
    /// A key or value read back from an index could not be decoded.
    CorruptEntry(String),
    /// The term codec rejected a stored encoding.
    InvalidTerm(String),
    /// Another process holds the store's exclusive lock.
    Locked(PathBuf),
    /// Underlying I/O error.
    Io(std::io::Error),
    /// Failure reported by the ordered key-value engine.
    Storage(String),
    /// Configuration could not be read, written or built.
    Config(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotOpen => write!(f, "the store must be open"),
            StoreError::AlreadyExists(p) => write!(
                f,
                "database {} already exists, please move or delete it",
                p.display()
            ),
            StoreError::StoreIsOpen => write!(f, "the store must be closed"),
            StoreError::UnknownId(id) => write!(f, "no term is interned under id {}", id),
            StoreError::CorruptEntry(m) => write!(f, "corrupt index entry: {}", m),
            StoreError::InvalidTerm(m) => write!(f, "invalid term encoding: {}", m),
            StoreError::Locked(p) => write!(
                f,
                "could not acquire exclusive lock on {}; another process has the store open",
                p.display()
            ),
            StoreError::Io(e) => write!(f, "{}", e),
            StoreError::Storage(m) => write!(f, "storage engine error: {}", m),
            StoreError::Config(m) => write!(f, "configuration error: {}", m),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Config(e.to_string())
    }
}

macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(e: $ty) -> Self {
                    StoreError::Storage(e.to_string())
                }
            }
        )*
    };
}

storage_error_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

pub type Result<T> = std::result::Result<T, StoreError>;
