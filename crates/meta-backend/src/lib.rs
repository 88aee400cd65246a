//! Metadata backend trait and an in-memory implementation.
//!
//! Item records (C8) and lock block reservations (C4) both go through a
//! [`MetadataBackend`]: a batched put/get/delete store keyed by
//! `(namespace, path)`. [`InMemoryBackend`] is the "locally linked metadata
//! backend" the original design assumes when no remote metadata server is
//! configured; it is also what the test suite uses to exercise C4/C7/C8
//! without a real server.

mod error;
mod in_memory;

pub use error::BackendError;
pub use in_memory::InMemoryBackend;
pub use wire_protocol::Safety;

/// A batched put/get/delete metadata store.
pub trait MetadataBackend: Send + Sync {
    /// Starts a batch of puts/deletes under `namespace`, to be finalised
    /// with [`MetaBatch::execute`].
    fn batch_start(&self, namespace: &str, safety: Safety) -> Result<Box<dyn MetaBatch>, BackendError>;

    /// Looks up a single document by path within `namespace`.
    fn get(&self, namespace: &str, path: &str) -> Result<Option<Vec<u8>>, BackendError>;
}

/// An in-flight batch of puts/deletes against one namespace.
///
/// `put` enforces create-once semantics: putting an existing key fails
/// immediately with [`BackendError::Conflict`] rather than silently
/// overwriting it, so the lock layer can use `put` as its reservation
/// primitive.
pub trait MetaBatch: Send {
    /// Creates `path` with `document`, failing if it already exists.
    fn put(&mut self, path: &str, document: Vec<u8>) -> Result<(), BackendError>;

    /// Removes `path`.
    fn delete(&mut self, path: &str) -> Result<(), BackendError>;

    /// Finalises the batch. For the in-memory backend puts/deletes are
    /// already visible by the time they return, so this only reports
    /// whether the backend itself is still healthy.
    fn execute(self: Box<Self>) -> Result<(), BackendError>;
}
