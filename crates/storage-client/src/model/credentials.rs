use serde::{Deserialize, Serialize};

/// Opaque, serialisable credential blob associated with each item. The
/// client never interprets its contents; it is carried through to the
/// metadata document unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials(Vec<u8>);

impl Credentials {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
