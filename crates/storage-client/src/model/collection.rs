use std::sync::Arc;

use crate::error::StorageError;
use crate::model::object_id::ObjectId;

/// A named grouping of items. Collections do not keep a membership list on
/// the client; an item references its collection, not the reverse.
#[derive(Debug)]
pub struct Collection {
    id: ObjectId,
    name: String,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Result<Arc<Self>, StorageError> {
        let name = name.into();
        if name.is_empty() {
            return Err(StorageError::InvalidArgument(
                "collection name must not be empty".to_string(),
            ));
        }
        Ok(Arc::new(Self { id: ObjectId::new(), name }))
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
