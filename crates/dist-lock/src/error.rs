use meta_backend::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    /// A block in the set is already held by another lock; the caller
    /// should back off and retry rather than treating this as terminal.
    #[error("block already reserved: {0}")]
    Contended(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
