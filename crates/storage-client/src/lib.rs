//! Client-side core of a striped object/metadata storage framework: items
//! living in collections, batched operations executed against pooled
//! connections to a set of data servers, and a pluggable metadata backend
//! for item records and distributed-lock block reservations.
//!
//! A [`StorageClient`] bundles the connection pool, metadata backend,
//! background worker pool and configuration; [`Batch`] collects
//! [`Operation`]s and dispatches them to the matching engine in
//! [`Batch::execute`].

mod batch;
mod client;
mod config;
mod engine;
mod error;
mod model;
mod semantics;

pub use batch::{Batch, Operation};
pub use client::StorageClient;
pub use config::{Config, ConfigError};
pub use error::StorageError;
pub use model::{Collection, Credentials, Item, ItemStatus, ObjectId};
pub use semantics::{Atomicity, Concurrency, Consistency, Ordering, Persistency, Safety, Semantics};

pub use distribution::DistributionPolicy;
