use thiserror::Error;

/// Failure modes of a [`crate::MetadataBackend`].
#[derive(Debug, Error, Clone)]
pub enum BackendError {
    /// A `put` targeted a key that already exists. This is what gives the
    /// distributed lock its mutual-exclusion guarantee: two racing
    /// `acquire()` calls both `put` the same block key, and exactly one
    /// wins.
    #[error("key already exists: {path}")]
    Conflict { path: String },

    /// A `get` or `delete` targeted a key that does not exist.
    #[error("key not found: {path}")]
    NotFound { path: String },

    /// The backend's storage layer failed (e.g. a real network-backed
    /// implementation's connection dropped).
    #[error("backend storage error: {0}")]
    Storage(String),
}
