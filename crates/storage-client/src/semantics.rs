//! The semantics record: enumerated knobs consumed by the batch executor
//! and the item engines to pick code paths. Plain getters/setters, no
//! shared identity across batches — each `Batch` owns its own copy.

pub use wire_protocol::Safety;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Atomicity {
    None,
    Operation,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Eventual,
    Session,
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    None,
    Overlapping,
    NonOverlapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistency {
    None,
    Storage,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Strict,
    SemiRelaxed,
    Relaxed,
}

/// Six independently tunable knobs governing how a batch is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Semantics {
    atomicity: Atomicity,
    consistency: Consistency,
    concurrency: Concurrency,
    persistency: Persistency,
    safety: Safety,
    ordering: Ordering,
}

impl Default for Semantics {
    /// The "safe and correct by default" preset: every write is durable
    /// and acknowledged, overlapping writers are serialised through locks.
    fn default() -> Self {
        Self {
            atomicity: Atomicity::Batch,
            consistency: Consistency::Eventual,
            concurrency: Concurrency::Overlapping,
            persistency: Persistency::Network,
            safety: Safety::Network,
            ordering: Ordering::Strict,
        }
    }
}

impl Semantics {
    /// A preset tuned for throughput over individual operations: no
    /// locking, no forced replies, relaxed ordering. Callers must not rely
    /// on overlapping writers being serialised under this preset.
    pub fn relaxed() -> Self {
        Self {
            atomicity: Atomicity::None,
            consistency: Consistency::Eventual,
            concurrency: Concurrency::None,
            persistency: Persistency::Storage,
            safety: Safety::None,
            ordering: Ordering::Relaxed,
        }
    }

    pub fn atomicity(&self) -> Atomicity {
        self.atomicity
    }

    pub fn with_atomicity(mut self, value: Atomicity) -> Self {
        self.atomicity = value;
        self
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    pub fn with_consistency(mut self, value: Consistency) -> Self {
        self.consistency = value;
        self
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    pub fn with_concurrency(mut self, value: Concurrency) -> Self {
        self.concurrency = value;
        self
    }

    pub fn persistency(&self) -> Persistency {
        self.persistency
    }

    pub fn with_persistency(mut self, value: Persistency) -> Self {
        self.persistency = value;
        self
    }

    pub fn safety(&self) -> Safety {
        self.safety
    }

    pub fn with_safety(mut self, value: Safety) -> Self {
        self.safety = value;
        self
    }

    pub fn ordering(&self) -> Ordering {
        self.ordering
    }

    pub fn with_ordering(mut self, value: Ordering) -> Self {
        self.ordering = value;
        self
    }
}
