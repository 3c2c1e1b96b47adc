use parley_shared::ValidationError;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (database directory, object files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The referenced record does not exist (or no longer exists).
    #[error("Record not found")]
    NotFound,

    /// The requester does not own the field it tried to change.
    #[error("Permission denied")]
    PermissionDenied,

    /// Content or attachment rejected before touching storage.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Per-user outbound throttle exhausted.
    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// A stored row violates the domain model.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Object storage unavailable (write, read, commit).
    #[error("Object storage error: {0}")]
    ObjectStorage(String),

    /// The object itself is unacceptable (empty, over the size cap).
    #[error("Object rejected: {0}")]
    ObjectRejected(String),

    /// Object path rejected (traversal, empty segment).
    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    /// The store lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
