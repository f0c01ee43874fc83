use std::collections::{btree_map::Entry, BTreeMap, HashMap};

use async_trait::async_trait;
use document_store::{
    merge_document, CollectionPath, Document, MutateOptions, Snapshot, SnapshotHub,
    SnapshotStream, StoreConnection,
};
use serde_json::Value;
use shared::{domain::DocumentId, error::StoreError};
use tokio::sync::Mutex;

use crate::new_document_id;

type Collection = BTreeMap<DocumentId, Value>;

/// Process-local document store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
    collections: Mutex<HashMap<CollectionPath, Collection>>,
    hub: SnapshotHub,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document(&self, path: &CollectionPath, doc_id: &DocumentId) -> Option<Value> {
        let collections = self.collections.lock().await;
        collections.get(path)?.get(doc_id).cloned()
    }

    pub async fn len(&self, path: &CollectionPath) -> usize {
        let collections = self.collections.lock().await;
        collections.get(path).map(BTreeMap::len).unwrap_or(0)
    }

    fn snapshot_of(path: &CollectionPath, collection: Option<&Collection>) -> Snapshot {
        let documents = collection
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Snapshot {
            path: path.clone(),
            documents,
        }
    }
}

#[async_trait]
impl StoreConnection for MemoryStorage {
    async fn subscribe(&self, path: &CollectionPath) -> Result<SnapshotStream, StoreError> {
        let receiver = self.hub.receiver(path).await;
        let initial = self.query_once(path).await?;
        Ok(SnapshotHub::into_stream(initial, receiver))
    }

    async fn mutate(
        &self,
        path: &CollectionPath,
        doc_id: Option<&DocumentId>,
        data: Value,
        options: MutateOptions,
    ) -> Result<DocumentId, StoreError> {
        let doc_id = doc_id.cloned().unwrap_or_else(new_document_id);
        let mut collections = self.collections.lock().await;
        let collection = collections.entry(path.clone()).or_default();
        match collection.entry(doc_id.clone()) {
            Entry::Occupied(mut slot) if options.merge => merge_document(slot.get_mut(), data),
            Entry::Occupied(mut slot) => {
                slot.insert(data);
            }
            Entry::Vacant(slot) => {
                slot.insert(data);
            }
        }
        // Publish under the lock so subscribers see snapshots in write order.
        let snapshot = Self::snapshot_of(path, Some(collection));
        self.hub.publish(snapshot).await;
        Ok(doc_id)
    }

    async fn delete(&self, path: &CollectionPath, doc_id: &DocumentId) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().await;
        let Some(collection) = collections.get_mut(path) else {
            return Ok(());
        };
        if collection.remove(doc_id).is_some() {
            let snapshot = Self::snapshot_of(path, Some(collection));
            self.hub.publish(snapshot).await;
        }
        Ok(())
    }

    async fn query_once(&self, path: &CollectionPath) -> Result<Snapshot, StoreError> {
        let collections = self.collections.lock().await;
        Ok(Self::snapshot_of(path, collections.get(path)))
    }
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
