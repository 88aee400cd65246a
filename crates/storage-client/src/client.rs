use std::sync::Arc;

use bg_runner::BackgroundRunner;
use conn_pool::ConnectionPool;
use meta_backend::MetadataBackend;

use crate::config::Config;
use crate::error::StorageError;
use crate::model::{Collection, Credentials, Item};

/// Bundles everything an engine needs for one `execute` call: the
/// connection pool, the metadata backend, the shared background worker
/// pool, and the resolved configuration. Batches borrow a `StorageClient`
/// for the duration of `execute`; there is no process-global singleton.
pub struct StorageClient {
    config: Config,
    data_pool: Arc<ConnectionPool>,
    metadata_backend: Arc<dyn MetadataBackend>,
    runner: Arc<BackgroundRunner>,
}

impl StorageClient {
    pub fn new(config: Config, metadata_backend: Arc<dyn MetadataBackend>) -> Self {
        let max_connections = config.resolved_max_connections();
        let data_pool = Arc::new(ConnectionPool::new(
            config.data_servers.clone(),
            max_connections,
            conn_pool::DEFAULT_PORT,
        ));
        let worker_count = config.data_servers.len().max(1);

        Self {
            config,
            data_pool,
            metadata_backend,
            runner: Arc::new(BackgroundRunner::new(worker_count)),
        }
    }

    /// Test-only constructor that takes an already-built connection pool,
    /// so tests can point it at a fake server bound to an ephemeral port
    /// instead of the fixed wire-protocol port `new` always dials.
    #[cfg(test)]
    pub(crate) fn new_with_pool(
        config: Config,
        metadata_backend: Arc<dyn MetadataBackend>,
        data_pool: Arc<ConnectionPool>,
    ) -> Self {
        let worker_count = config.data_servers.len().max(1);
        Self {
            config,
            data_pool,
            metadata_backend,
            runner: Arc::new(BackgroundRunner::new(worker_count)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `N_data`: the number of configured data servers.
    pub fn server_count(&self) -> u32 {
        self.config.data_servers.len() as u32
    }

    pub(crate) fn data_pool(&self) -> &Arc<ConnectionPool> {
        &self.data_pool
    }

    pub(crate) fn metadata_backend(&self) -> &Arc<dyn MetadataBackend> {
        &self.metadata_backend
    }

    pub(crate) fn runner(&self) -> &Arc<BackgroundRunner> {
        &self.runner
    }

    /// Convenience constructor for a new item using this client's default
    /// distribution policy and server count. The item is not yet durable;
    /// callers still enqueue an `Operation::ItemCreate` and `execute` it.
    pub fn new_item(
        &self,
        collection: Arc<Collection>,
        name: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Arc<Item>, StorageError> {
        Item::create(collection, name, credentials, self.config.default_distribution, self.server_count())
    }
}
