use thiserror::Error;

/// Errors popping or establishing a pooled connection.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no pool configured for server index {0}")]
    UnknownServer(u32),

    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake with {address} failed: {source}")]
    Handshake {
        address: String,
        #[source]
        source: wire_protocol::CodecError,
    },

    #[error("connection pool is shutting down")]
    Closed,
}
