//! Error types for the kvdb engine.

use kvdb_storage::StorageError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type KvdbResult<T> = Result<T, KvdbError>;

/// Coarse classification of a [`KvdbError`].
///
/// Host bindings map these onto their own error codes; callers that only
/// need to branch on the category should match on this instead of the
/// error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Size or format violation in an argument.
    InvalidArgument,
    /// Operation not allowed in the current lifecycle state.
    InvalidState,
    /// Named database or keyspace does not exist.
    NotFound,
    /// Named database or keyspace already exists.
    AlreadyExists,
    /// Target still has open handles.
    Busy,
    /// Backing store exists but is not accessible.
    PermissionDenied,
    /// Cursor view invalidated by a concurrent prefix delete.
    StaleView,
    /// A fixed limit or an allocation was exhausted.
    ResourceExhausted,
    /// Durability or maintenance failure in the storage substrate.
    Io,
    /// Persisted data failed validation.
    Corruption,
}

/// Errors returned by kvdb operations.
#[derive(Debug, Error)]
pub enum KvdbError {
    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// File system failure outside a backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An argument is out of bounds or malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong.
        message: String,
    },

    /// The object is not in a state that allows the operation.
    #[error("invalid state: {message}")]
    InvalidState {
        /// What was wrong.
        message: String,
    },

    /// A database or keyspace was not found.
    #[error("not found: {what}")]
    NotFound {
        /// The missing object.
        what: String,
    },

    /// A database or keyspace with that name exists.
    #[error("already exists: {what}")]
    AlreadyExists {
        /// The colliding object.
        what: String,
    },

    /// A keyspace cannot be dropped while handles are open.
    #[error("busy: {what}")]
    Busy {
        /// The busy object.
        what: String,
    },

    /// The database home is not accessible.
    #[error("permission denied: {}", path.display())]
    PermissionDenied {
        /// The inaccessible path.
        path: PathBuf,
    },

    /// A concurrent prefix delete overlapped the cursor's filter.
    #[error("cursor view is stale, update the view before reading")]
    StaleView,

    /// A fixed limit was reached.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Which limit.
        message: String,
    },

    /// A persisted record or file is malformed.
    #[error("corruption: {message}")]
    Corruption {
        /// What failed to validate.
        message: String,
    },

    /// A data log record failed its checksum.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },
}

impl KvdbError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid-state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates an already-exists error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    /// Creates a busy error.
    pub fn busy(what: impl Into<String>) -> Self {
        Self::Busy { what: what.into() }
    }

    /// Creates a resource-exhausted error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// The error returned by every call on a closed database.
    pub fn database_closed() -> Self {
        Self::invalid_state("database is closed")
    }

    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(e) => e.io_kind().map_or(ErrorKind::Io, io_kind),
            Self::Io(e) => io_kind(e.kind()),
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::StaleView => ErrorKind::StaleView,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::Corruption { .. } | Self::ChecksumMismatch { .. } => ErrorKind::Corruption,
        }
    }
}

fn io_kind(kind: io::ErrorKind) -> ErrorKind {
    match kind {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
        io::ErrorKind::OutOfMemory => ErrorKind::ResourceExhausted,
        _ => ErrorKind::Io,
    }
}
