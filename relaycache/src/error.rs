//! Error kinds shared by every backend, the caching handler, and the
//! snapshot codec.
//!
//! Each kind carries the HTTP status it maps to at a boundary (§7 of the
//! design), so callers building a response never re-derive the mapping.

use thiserror::Error;

/// The classification of a failure, independent of where it is reported.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key absent or expired.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed key, malformed TTL, non-directory to snapshot, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Network error, subprocess/pipe error, or upstream failure.
    #[error("transient error: {0}")]
    Transient(String),

    /// Cancellation specifically, reported distinctly from other transient
    /// failures so the HTTP boundary can choose 503/499 over 502.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Backend failure: disk full, corruption, I/O error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Admission refused because the object alone exceeds the backend's
    /// capacity. Reported as Internal at the boundary; never silently
    /// swallowed.
    #[error("capacity exceeded: {0}")]
    Capacity(String),
}

impl CacheError {
    /// HTTP status this error maps to at a boundary (§7).
    pub fn status(&self) -> u16 {
        match self {
            CacheError::NotFound(_) => 404,
            CacheError::InvalidArgument(_) => 400,
            CacheError::Transient(_) => 502,
            CacheError::Cancelled(_) => 499,
            CacheError::Internal(_) | CacheError::Capacity(_) => 500,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CacheError::Internal(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CacheError::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CacheError::InvalidArgument(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }

    /// Process exit code for the CLI (§7: "an exit code distinguishing
    /// usage errors (2), NotFound (3), and other failures (1)").
    pub fn exit_code(&self) -> i32 {
        match self {
            CacheError::NotFound(_) => 3,
            CacheError::InvalidArgument(_) => 2,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => CacheError::NotFound(e.to_string()),
            _ => CacheError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
