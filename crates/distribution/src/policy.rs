use serde::{Deserialize, Serialize};

/// Distribution policy tag plus its per-policy parameters, as persisted in
/// an item's `distribution` sub-document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionPolicy {
    /// Chunk k of a range lies on server `(start_index + floor(offset/block_size) + k) mod N`.
    RoundRobin { block_size: u64, start_index: u32 },
    /// Every chunk lies on one fixed server, still chunked at `block_size`
    /// boundaries so the same block ids can be used for locking.
    SingleServer { index: u32, block_size: u64 },
}

impl DistributionPolicy {
    /// A round-robin policy starting at server 0.
    pub fn round_robin(block_size: u64) -> Self {
        Self::RoundRobin { block_size, start_index: 0 }
    }

    /// A single-server policy pinned to `index`.
    pub fn single_server(index: u32, block_size: u64) -> Self {
        Self::SingleServer { index, block_size }
    }

    pub(crate) fn block_size(self) -> u64 {
        match self {
            Self::RoundRobin { block_size, .. } | Self::SingleServer { block_size, .. } => block_size,
        }
    }
}
