//! Contract between the control core and whatever document store backs it.
//!
//! A subscription yields the *full* contents of a collection every time it
//! changes, never a diff. Implementations share [`SnapshotHub`] to fan those
//! snapshots out to every live subscriber.

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{domain::DocumentId, error::StoreError};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::debug;

pub const PROFILES: &str = "profiles";
pub const INVENTORY: &str = "inventory";
pub const DOSING_HISTORY: &str = "dosing_history";

const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn profiles() -> Self {
        Self::new(PROFILES)
    }

    pub fn inventory() -> Self {
        Self::new(INVENTORY)
    }

    pub fn dosing_history() -> Self {
        Self::new(DOSING_HISTORY)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: CollectionPath,
    pub documents: Vec<Document>,
}

impl Snapshot {
    pub fn empty(path: CollectionPath) -> Self {
        Self {
            path,
            documents: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum SnapshotEvent {
    Snapshot(Snapshot),
    Failed(StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutateOptions {
    pub merge: bool,
}

impl MutateOptions {
    pub fn replace() -> Self {
        Self { merge: false }
    }

    pub fn merge() -> Self {
        Self { merge: true }
    }
}

pub type SnapshotStream = BoxStream<'static, SnapshotEvent>;

#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// The first item of the stream is the collection as it is right now.
    async fn subscribe(&self, path: &CollectionPath) -> Result<SnapshotStream, StoreError>;
    /// Writes one document and returns its id; `None` lets the store pick one.
    async fn mutate(
        &self,
        path: &CollectionPath,
        doc_id: Option<&DocumentId>,
        data: Value,
        options: MutateOptions,
    ) -> Result<DocumentId, StoreError>;
    async fn delete(&self, path: &CollectionPath, doc_id: &DocumentId) -> Result<(), StoreError>;
    async fn query_once(&self, path: &CollectionPath) -> Result<Snapshot, StoreError>;
}

pub struct MissingStoreConnection;

#[async_trait]
impl StoreConnection for MissingStoreConnection {
    async fn subscribe(&self, path: &CollectionPath) -> Result<SnapshotStream, StoreError> {
        Err(StoreError::unavailable(format!(
            "document store unavailable for collection {path}"
        )))
    }

    async fn mutate(
        &self,
        path: &CollectionPath,
        _doc_id: Option<&DocumentId>,
        _data: Value,
        _options: MutateOptions,
    ) -> Result<DocumentId, StoreError> {
        Err(StoreError::unavailable(format!(
            "document store unavailable for collection {path}"
        )))
    }

    async fn delete(&self, path: &CollectionPath, _doc_id: &DocumentId) -> Result<(), StoreError> {
        Err(StoreError::unavailable(format!(
            "document store unavailable for collection {path}"
        )))
    }

    async fn query_once(&self, path: &CollectionPath) -> Result<Snapshot, StoreError> {
        Err(StoreError::unavailable(format!(
            "document store unavailable for collection {path}"
        )))
    }
}

/// Applies `patch` on top of `existing`. Objects merge key by key at the top
/// level; anything else is replaced outright.
pub fn merge_document(existing: &mut Value, patch: Value) {
    match (existing, patch) {
        (Value::Object(current), Value::Object(incoming)) => {
            for (key, value) in incoming {
                current.insert(key, value);
            }
        }
        (slot, patch) => *slot = patch,
    }
}

#[derive(Default)]
pub struct SnapshotHub {
    channels: Mutex<HashMap<CollectionPath, broadcast::Sender<SnapshotEvent>>>,
}

impl SnapshotHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest before reading the initial snapshot so that no
    /// write landing in between is lost.
    pub async fn receiver(&self, path: &CollectionPath) -> broadcast::Receiver<SnapshotEvent> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(path.clone())
            .or_insert_with(|| broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub async fn publish(&self, snapshot: Snapshot) -> usize {
        let path = snapshot.path.clone();
        self.send(&path, SnapshotEvent::Snapshot(snapshot)).await
    }

    pub async fn publish_failure(&self, path: &CollectionPath, err: StoreError) -> usize {
        self.send(path, SnapshotEvent::Failed(err)).await
    }

    async fn send(&self, path: &CollectionPath, event: SnapshotEvent) -> usize {
        let channels = self.channels.lock().await;
        let Some(sender) = channels.get(path) else {
            return 0;
        };
        sender.send(event).unwrap_or(0)
    }

    pub fn into_stream(
        initial: Snapshot,
        receiver: broadcast::Receiver<SnapshotEvent>,
    ) -> SnapshotStream {
        let live = BroadcastStream::new(receiver).filter_map(|item| async move {
            match item {
                Ok(event) => Some(event),
                // Every snapshot is complete, so skipping stale ones loses nothing.
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!("store: subscriber lagged skipped={skipped}");
                    None
                }
            }
        });
        stream::once(async move { SnapshotEvent::Snapshot(initial) })
            .chain(live)
            .boxed()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
