//! Distribution iterator: a pure function turning `(length, offset)` into a
//! deterministic sequence of `(server_index, chunk_length, chunk_offset,
//! block_id)` tuples under a selected policy.
//!
//! Iteration state (`Distribution::reset`) is created fresh per call and
//! never shared; the engine may drive independent iterators for concurrent
//! operations on the same item without synchronisation.

mod error;
mod policy;

pub use error::DistributionError;
pub use policy::DistributionPolicy;

/// One emitted chunk: a contiguous byte range that fits on a single server
/// without crossing a block boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub server_index: u32,
    pub chunk_length: u64,
    pub chunk_offset: u64,
    pub block_id: u64,
}

/// A distribution policy bound to a server count.
#[derive(Debug, Clone, Copy)]
pub struct Distribution {
    policy: DistributionPolicy,
    server_count: u32,
}

impl Distribution {
    pub fn new(policy: DistributionPolicy, server_count: u32) -> Result<Self, DistributionError> {
        if policy.block_size() == 0 {
            return Err(DistributionError::ZeroBlockSize);
        }
        if server_count == 0 {
            return Err(DistributionError::ZeroServerCount);
        }
        Ok(Self { policy, server_count })
    }

    /// The policy this distribution was constructed with, for persisting
    /// alongside an item's other metadata.
    pub fn policy(&self) -> DistributionPolicy {
        self.policy
    }

    pub fn server_count(&self) -> u32 {
        self.server_count
    }

    /// Starts iterating `length` bytes beginning at `offset`.
    pub fn reset(&self, length: u64, offset: u64) -> DistributionIter {
        DistributionIter {
            policy: self.policy,
            server_count: self.server_count,
            remaining: length,
            cursor: offset,
        }
    }
}

/// Per-call iteration state. Created by [`Distribution::reset`] and
/// exhausted by repeated calls to `next()` (via the `Iterator` impl).
pub struct DistributionIter {
    policy: DistributionPolicy,
    server_count: u32,
    remaining: u64,
    cursor: u64,
}

impl Iterator for DistributionIter {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.remaining == 0 {
            return None;
        }

        let block_size = self.policy.block_size();
        let block_index = self.cursor / block_size;
        let block_start = block_index * block_size;
        let offset_in_block = self.cursor - block_start;
        let room_in_block = block_size - offset_in_block;
        let chunk_length = room_in_block.min(self.remaining);

        let server_index = match self.policy {
            DistributionPolicy::RoundRobin { start_index, .. } => {
                (start_index as u64 + block_index) % self.server_count as u64
            }
            DistributionPolicy::SingleServer { index, .. } => index as u64,
        } as u32;

        let chunk = Chunk {
            server_index,
            chunk_length,
            chunk_offset: self.cursor,
            block_id: block_index,
        };

        self.cursor += chunk_length;
        self.remaining -= chunk_length;

        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_robin(block_size: u64, n: u32) -> Distribution {
        Distribution::new(DistributionPolicy::round_robin(block_size), n).unwrap()
    }

    #[test]
    fn s1_round_robin_two_servers_block_four() {
        let dist = round_robin(4, 2);
        let chunks: Vec<_> = dist.reset(8, 0).collect();
        assert_eq!(
            chunks,
            vec![
                Chunk { server_index: 0, chunk_length: 4, chunk_offset: 0, block_id: 0 },
                Chunk { server_index: 1, chunk_length: 4, chunk_offset: 4, block_id: 1 },
            ]
        );
    }

    #[test]
    fn single_server_all_chunks_on_one_index() {
        let dist = Distribution::new(DistributionPolicy::single_server(3, 4), 8).unwrap();
        let chunks: Vec<_> = dist.reset(10, 2).collect();
        assert!(chunks.iter().all(|c| c.server_index == 3));
        assert_eq!(chunks.iter().map(|c| c.chunk_length).sum::<u64>(), 10);
    }

    #[test]
    fn zero_length_yields_no_chunks() {
        let dist = round_robin(4, 2);
        assert_eq!(dist.reset(0, 100).count(), 0);
    }

    #[test]
    fn rejects_zero_block_size() {
        assert_eq!(
            Distribution::new(DistributionPolicy::round_robin(0), 2).unwrap_err(),
            DistributionError::ZeroBlockSize
        );
    }

    #[test]
    fn rejects_zero_server_count() {
        assert_eq!(
            Distribution::new(DistributionPolicy::round_robin(4), 0).unwrap_err(),
            DistributionError::ZeroServerCount
        );
    }

    proptest! {
        #[test]
        fn stripe_conservation(length in 0u64..10_000, offset in 0u64..10_000, block_size in 1u64..512, n in 1u32..16) {
            let dist = Distribution::new(DistributionPolicy::round_robin(block_size), n).unwrap();
            let chunks: Vec<_> = dist.reset(length, offset).collect();

            let total: u64 = chunks.iter().map(|c| c.chunk_length).sum();
            prop_assert_eq!(total, length);

            for c in &chunks {
                let block_start = c.block_id * block_size;
                prop_assert!(c.chunk_offset >= block_start);
                prop_assert!(c.chunk_offset + c.chunk_length <= block_start + block_size);
            }
        }

        #[test]
        fn block_ids_stable_across_runs(length in 1u64..10_000, offset in 0u64..10_000, block_size in 1u64..512, n in 1u32..16) {
            let dist = Distribution::new(DistributionPolicy::round_robin(block_size), n).unwrap();
            let first: Vec<_> = dist.reset(length, offset).collect();
            let second: Vec<_> = dist.reset(length, offset).collect();
            prop_assert_eq!(first, second);
        }
    }
}
