use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use distribution::{Distribution, DistributionPolicy};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::model::collection::Collection;
use crate::model::credentials::Credentials;
use crate::model::object_id::ObjectId;
use crate::semantics::Concurrency;

/// Cached size/modification-time, as last observed from the data servers
/// or (under `Concurrency::None`) the metadata backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemStatus {
    pub size: u64,
    pub modification_time: u64,
}

struct ItemState {
    status: ItemStatus,
    refreshed_at: Option<Instant>,
    /// Per-server "has a DATA_CREATE been sent for this item" flag. Reset
    /// every process start; never persisted.
    created: Vec<bool>,
}

/// A named byte-array living in a collection. `name`, `credentials` and
/// `distribution` are fixed at creation; `status` and the per-server
/// create flags are the only interior-mutable state, guarded by one mutex
/// since engines may touch them from multiple background workers.
pub struct Item {
    id: ObjectId,
    name: String,
    collection: Arc<Collection>,
    credentials: Credentials,
    distribution: Distribution,
    state: Mutex<ItemState>,
}

#[derive(Serialize, Deserialize)]
struct StatusDocument {
    size: i64,
    modification_time: i64,
}

#[derive(Serialize, Deserialize)]
struct ItemDocument {
    id: [u8; 12],
    collection: [u8; 12],
    name: String,
    status: Option<StatusDocument>,
    credentials: Vec<u8>,
    distribution: DistributionPolicy,
}

impl Item {
    /// Creates a new item handle. `server_count` is `N_data`, fixing the
    /// size of the per-server create-flag vector and the distribution's
    /// server count for the lifetime of this handle.
    pub fn create(
        collection: Arc<Collection>,
        name: impl Into<String>,
        credentials: Credentials,
        policy: DistributionPolicy,
        server_count: u32,
    ) -> Result<Arc<Self>, StorageError> {
        let name = name.into();
        if name.contains('/') {
            return Err(StorageError::InvalidArgument(format!(
                "item name {name:?} must not contain '/'"
            )));
        }
        let distribution = Distribution::new(policy, server_count)?;

        Ok(Arc::new(Self {
            id: ObjectId::new(),
            name,
            collection,
            credentials,
            distribution,
            state: Mutex::new(ItemState {
                status: ItemStatus { size: 0, modification_time: 0 },
                refreshed_at: None,
                created: vec![false; server_count as usize],
            }),
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// The metadata-backend and lock-namespace path: `"<collection>/<item>"`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection.name(), self.name)
    }

    pub fn status(&self) -> ItemStatus {
        self.state.lock().unwrap().status
    }

    pub fn size(&self) -> u64 {
        self.state.lock().unwrap().status.size
    }

    pub fn modification_time(&self) -> u64 {
        self.state.lock().unwrap().status.modification_time
    }

    /// How long ago the cached status was last refreshed, or `None` if it
    /// never has been.
    pub fn status_age(&self) -> Option<Duration> {
        self.state.lock().unwrap().refreshed_at.map(|t| t.elapsed())
    }

    /// Raises `modification_time` to `max(current, candidate)`; never
    /// lowers it, per the monotonicity invariant.
    pub fn set_modification_time(&self, candidate: u64) {
        let mut state = self.state.lock().unwrap();
        state.status.modification_time = state.status.modification_time.max(candidate);
    }

    /// Overwrites the cached size and bumps modification_time monotonically,
    /// marking the status as freshly observed.
    pub fn refresh_status(&self, size: u64, modification_time: u64) {
        let mut state = self.state.lock().unwrap();
        state.status.size = size;
        state.status.modification_time = state.status.modification_time.max(modification_time);
        state.refreshed_at = Some(Instant::now());
    }

    /// Checks whether server `server_index` has already seen a DATA_CREATE
    /// for this item; if not, atomically marks it as seen and returns
    /// `true` so the caller knows to send one. Transitions false→true
    /// exactly once per (item, server) per process.
    pub(crate) fn mark_created_if_first(&self, server_index: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        let slot = &mut state.created[server_index as usize];
        if *slot {
            false
        } else {
            *slot = true;
            true
        }
    }

    /// Serialises the item's persisted fields. Size/modification_time are
    /// embedded only under `Concurrency::None`, where no concurrent writer
    /// can be invalidating them and the data servers need not be consulted.
    pub fn to_document(&self, concurrency: Concurrency) -> Result<Vec<u8>, StorageError> {
        let state = self.state.lock().unwrap();
        let status = matches!(concurrency, Concurrency::None).then(|| StatusDocument {
            size: state.status.size as i64,
            modification_time: state.status.modification_time as i64,
        });

        let doc = ItemDocument {
            id: *self.id.as_bytes(),
            collection: *self.collection.id().as_bytes(),
            name: self.name.clone(),
            status,
            credentials: self.credentials.as_bytes().to_vec(),
            distribution: self.distribution.policy(),
        };

        Ok(bincode::serialize(&doc)?)
    }

    /// Extracts just the optional status sub-document from a persisted
    /// item document, without needing a `Collection` to rebuild the full
    /// item. Used by the status fast path under `Concurrency::None`.
    pub(crate) fn status_from_document(bytes: &[u8]) -> Result<Option<ItemStatus>, StorageError> {
        let doc: ItemDocument = bincode::deserialize(bytes)?;
        Ok(doc
            .status
            .map(|s| ItemStatus { size: s.size as u64, modification_time: s.modification_time as u64 }))
    }

    /// Rebuilds an item handle from its persisted document. `server_count`
    /// must match the currently configured `N_data`; a fresh, all-`false`
    /// create-flag vector is always used, since a process that just
    /// deserialised this item has sent no DATA_CREATE of its own yet.
    pub fn from_document(
        bytes: &[u8],
        collection: Arc<Collection>,
        server_count: u32,
    ) -> Result<Arc<Self>, StorageError> {
        let doc: ItemDocument = bincode::deserialize(bytes)?;
        let distribution = Distribution::new(doc.distribution, server_count)?;

        let has_status = doc.status.is_some();
        let status = doc
            .status
            .map(|s| ItemStatus { size: s.size as u64, modification_time: s.modification_time as u64 })
            .unwrap_or(ItemStatus { size: 0, modification_time: 0 });
        let refreshed_at = has_status.then(Instant::now);

        Ok(Arc::new(Self {
            id: ObjectId::from_bytes(doc.id),
            name: doc.name,
            collection,
            credentials: Credentials::new(doc.credentials),
            distribution,
            state: Mutex::new(ItemState {
                status,
                refreshed_at,
                created: vec![false; server_count as usize],
            }),
        }))
    }
}
