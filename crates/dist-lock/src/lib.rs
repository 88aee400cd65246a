//! Distributed block locks built on the metadata backend's put-is-create
//! semantics (see `meta-backend`): reserving a block is a `put` of an
//! empty record under a well-known key, and the backend's refusal to
//! overwrite an existing key is what gives two racing clients mutual
//! exclusion on that block.

mod error;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub use error::LockError;
use meta_backend::{BackendError, MetadataBackend, Safety};
use tracing::{debug, instrument, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// A set of block reservations against one `(namespace, path)`.
///
/// Blocks are appended with [`Lock::add`] before [`Lock::acquire`]; once
/// acquired, the lock holds those reservations until [`Lock::release`] or
/// until it is dropped.
pub struct Lock {
    backend: Arc<dyn MetadataBackend>,
    namespace: String,
    path: String,
    blocks: Vec<u64>,
    acquired: bool,
}

impl Lock {
    pub fn new(backend: Arc<dyn MetadataBackend>, namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            path: path.into(),
            blocks: Vec::new(),
            acquired: false,
        }
    }

    /// Adds `block_id` to the reservation set. Must be called before
    /// `acquire`; duplicates are harmless (the second `put` of the same key
    /// within one batch attempt simply conflicts with itself the same way
    /// a foreign holder would).
    pub fn add(&mut self, block_id: u64) {
        if !self.blocks.contains(&block_id) {
            self.blocks.push(block_id);
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// Blocks until every reserved block is claimed, retrying on
    /// contention with bounded exponential backoff (1ms up to 50ms).
    #[instrument(skip(self), fields(namespace = %self.namespace, path = %self.path, blocks = self.blocks.len()))]
    pub fn acquire(&mut self) -> Result<(), LockError> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.try_acquire_once() {
                Ok(()) => {
                    self.acquired = true;
                    return Ok(());
                }
                Err(LockError::Contended(key)) => {
                    debug!(key, ?backoff, "lock contended, backing off");
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn try_acquire_once(&self) -> Result<(), LockError> {
        let mut batch = self.backend.batch_start(&self.namespace, Safety::Network)?;
        let mut placed = Vec::with_capacity(self.blocks.len());

        for &block_id in &self.blocks {
            let key = block_key(&self.path, block_id);
            match batch.put(&key, Vec::new()) {
                Ok(()) => placed.push(key),
                Err(BackendError::Conflict { path }) => {
                    self.rollback(&placed);
                    return Err(LockError::Contended(path));
                }
                Err(other) => {
                    self.rollback(&placed);
                    return Err(other.into());
                }
            }
        }

        batch.execute()?;
        Ok(())
    }

    /// Best-effort release of blocks placed earlier in a failed acquire
    /// attempt; failures here are logged but don't change the reported
    /// acquire error.
    fn rollback(&self, placed: &[String]) {
        if placed.is_empty() {
            return;
        }
        let Ok(mut batch) = self.backend.batch_start(&self.namespace, Safety::Network) else {
            warn!("rollback of partially placed blocks failed: could not start batch");
            return;
        };
        for key in placed {
            if let Err(err) = batch.delete(key) {
                warn!(key, %err, "rollback delete failed");
            }
        }
        if let Err(err) = batch.execute() {
            warn!(%err, "rollback batch failed to execute");
        }
    }

    /// Releases all reserved blocks. A no-op if the lock was never
    /// successfully acquired.
    #[instrument(skip(self), fields(namespace = %self.namespace, path = %self.path))]
    pub fn release(&mut self) -> Result<(), LockError> {
        if !self.acquired {
            return Ok(());
        }

        let mut batch = self.backend.batch_start(&self.namespace, Safety::Network)?;
        for &block_id in &self.blocks {
            batch.delete(&block_key(&self.path, block_id))?;
        }
        batch.execute()?;
        self.acquired = false;
        Ok(())
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if self.acquired {
            if let Err(err) = self.release() {
                warn!(%err, "releasing lock during drop failed");
            }
        }
    }
}

fn block_key(path: &str, block_id: u64) -> String {
    format!("{path}/{block_id}")
}
