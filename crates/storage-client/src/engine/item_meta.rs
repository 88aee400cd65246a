//! Item metadata engine (C8): create/get/delete against the metadata
//! backend, serialising items to and from their binary document form.

use std::sync::Arc;

use tracing::instrument;

use crate::batch::Operation;
use crate::client::StorageClient;
use crate::model::Item;
use crate::semantics::Semantics;

#[instrument(skip(client, semantics, ops), fields(ops = ops.len()))]
pub fn create(client: &StorageClient, semantics: &Semantics, ops: Vec<Operation>) -> bool {
    let mut batch = match client.metadata_backend().batch_start("items", semantics.safety()) {
        Ok(batch) => batch,
        Err(_) => return false,
    };

    let mut overall = true;
    for op in &ops {
        let Operation::ItemCreate { item, .. } = op else {
            unreachable!("create group must contain only ItemCreate operations")
        };

        let doc = match item.to_document(semantics.concurrency()) {
            Ok(doc) => doc,
            Err(_) => {
                overall = false;
                continue;
            }
        };

        if batch.put(&item.path(), doc).is_err() {
            overall = false;
        }
    }

    if batch.execute().is_err() {
        overall = false;
    }

    overall
}

#[instrument(skip(client, _semantics, ops), fields(ops = ops.len()))]
pub fn get(client: &StorageClient, _semantics: &Semantics, ops: Vec<Operation>) -> bool {
    let mut overall = true;

    for op in ops {
        let Operation::ItemGet { collection, name, out } = op else {
            unreachable!("get group must contain only ItemGet operations")
        };
        let path = format!("{}/{}", collection.name(), name);

        let result = client.metadata_backend().get("items", &path).ok().flatten().and_then(|bytes| {
            Item::from_document(&bytes, Arc::clone(&collection), client.server_count()).ok()
        });

        if result.is_none() {
            overall = false;
        }
        *out.lock().unwrap() = result;
    }

    overall
}

/// The metadata half of item deletion; see `item_io::delete_data` for the
/// data-server half this runs alongside.
#[instrument(skip(client, semantics, ops), fields(ops = ops.len()))]
pub fn delete_metadata(client: &StorageClient, semantics: &Semantics, ops: &[Operation]) -> bool {
    let mut batch = match client.metadata_backend().batch_start("items", semantics.safety()) {
        Ok(batch) => batch,
        Err(_) => return false,
    };

    let mut overall = true;
    for op in ops {
        let Operation::ItemDelete { item } = op else {
            unreachable!("delete group must contain only ItemDelete operations")
        };
        if batch.delete(&item.path()).is_err() {
            overall = false;
        }
    }

    if batch.execute().is_err() {
        overall = false;
    }

    overall
}
