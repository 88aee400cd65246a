use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

static NEXT_COUNTER: AtomicU32 = AtomicU32::new(0);

/// A 12-byte opaque object id: 4 bytes of unix seconds, 4 bytes of process
/// id, 4 bytes of a per-process counter. Stable enough for a single client
/// process; uniqueness across processes relies on distinct pids, same as
/// the scheme it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        let pid = std::process::id();
        let counter = NEXT_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..8].copy_from_slice(&pid.to_be_bytes());
        bytes[8..12].copy_from_slice(&counter.to_be_bytes());
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_ids_within_a_process_are_distinct() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_raw_bytes() {
        let id = ObjectId::new();
        assert_eq!(ObjectId::from_bytes(*id.as_bytes()), id);
    }
}
