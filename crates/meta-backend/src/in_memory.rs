use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use wire_protocol::Safety;

use crate::error::BackendError;
use crate::{MetaBatch, MetadataBackend};

fn full_key(namespace: &str, path: &str) -> String {
    format!("{namespace}/{path}")
}

/// An in-process metadata store behind a single mutex, standing in for the
/// "locally linked metadata backend" the original design assumes.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataBackend for InMemoryBackend {
    fn batch_start(&self, namespace: &str, _safety: Safety) -> Result<Box<dyn MetaBatch>, BackendError> {
        Ok(Box::new(InMemoryBatch {
            store: Arc::clone(&self.store),
            namespace: namespace.to_string(),
        }))
    }

    fn get(&self, namespace: &str, path: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let store = self.store.lock().unwrap();
        Ok(store.get(&full_key(namespace, path)).cloned())
    }
}

struct InMemoryBatch {
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    namespace: String,
}

impl MetaBatch for InMemoryBatch {
    fn put(&mut self, path: &str, document: Vec<u8>) -> Result<(), BackendError> {
        let key = full_key(&self.namespace, path);
        let mut store = self.store.lock().unwrap();
        if store.contains_key(&key) {
            return Err(BackendError::Conflict { path: key });
        }
        store.insert(key, document);
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<(), BackendError> {
        let key = full_key(&self.namespace, path);
        let mut store = self.store.lock().unwrap();
        store.remove(&key);
        Ok(())
    }

    fn execute(self: Box<Self>) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_create_once() {
        let backend = InMemoryBackend::new();
        let mut batch = backend.batch_start("locks", Safety::Network).unwrap();
        batch.put("a/0", Vec::new()).unwrap();

        let mut batch2 = backend.batch_start("locks", Safety::Network).unwrap();
        let err = batch2.put("a/0", Vec::new()).unwrap_err();
        assert!(matches!(err, BackendError::Conflict { .. }));
    }

    #[test]
    fn delete_then_put_succeeds() {
        let backend = InMemoryBackend::new();
        let mut batch = backend.batch_start("locks", Safety::Network).unwrap();
        batch.put("a/0", Vec::new()).unwrap();
        batch.delete("a/0").unwrap();
        batch.execute().unwrap();

        let mut batch2 = backend.batch_start("locks", Safety::Network).unwrap();
        batch2.put("a/0", Vec::new()).unwrap();
    }

    #[test]
    fn get_roundtrips_document() {
        let backend = InMemoryBackend::new();
        let mut batch = backend.batch_start("items", Safety::Network).unwrap();
        batch.put("coll/item", vec![1, 2, 3]).unwrap();

        assert_eq!(backend.get("items", "coll/item").unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(backend.get("items", "missing").unwrap(), None);
    }
}
