use thiserror::Error;

/// Top-level error composing every crate boundary's own error enum, per
/// the error kinds InvalidArgument / NotFound / Conflict / Network /
/// BackendError / Exhausted / Config.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A caller-supplied argument violates an invariant (e.g. an item name
    /// containing `/`). The offending call returns an error and nothing is
    /// enqueued.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A metadata lookup returned nothing for the requested path.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("wire codec error: {0}")]
    Codec(#[from] wire_protocol::CodecError),

    #[error("connection pool error: {0}")]
    Pool(#[from] conn_pool::PoolError),

    #[error("distributed lock error: {0}")]
    Lock(#[from] dist_lock::LockError),

    #[error("metadata backend error: {0}")]
    Backend(#[from] meta_backend::BackendError),

    #[error("distribution error: {0}")]
    Distribution(#[from] distribution::DistributionError),

    #[error("background worker error: {0}")]
    Runner(#[from] bg_runner::RunnerError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("item document could not be (de)serialised: {0}")]
    Document(#[from] bincode::Error),
}
