use thiserror::Error;

/// Errors constructing or driving a [`crate::Distribution`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DistributionError {
    /// A distribution policy was configured with a zero block size.
    #[error("block size must be non-zero")]
    ZeroBlockSize,

    /// A round-robin policy was configured with zero servers.
    #[error("server count must be non-zero")]
    ZeroServerCount,
}
