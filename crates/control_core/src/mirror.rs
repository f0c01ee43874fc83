//! Subscribe-and-cache adapter for one remote collection.
//!
//! Each snapshot replaces the cached records wholesale and rebuilds the
//! derived view, so the cache is always a function of the latest snapshot.
//! Only the listener task writes to the cache; everyone else reads the
//! published view or asks the store for a mutation.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use document_store::{
    CollectionPath, Document, MutateOptions, Snapshot, SnapshotEvent, StoreConnection,
};
use futures::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use shared::{domain::DocumentId, error::StoreError};
use tokio::{
    sync::{broadcast, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::StatusSink;

const VIEW_CHANNEL_CAPACITY: usize = 32;

/// A typed projection over one collection.
pub trait CollectionView: Default + fmt::Debug + Send + Sync + 'static {
    type Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    const LABEL: &'static str;

    fn collection() -> CollectionPath;

    fn decode(document: &Document) -> serde_json::Result<Self::Record> {
        serde_json::from_value(document.data.clone())
    }

    /// Key under which the record is cached.
    fn key(document_id: &DocumentId, record: &Self::Record) -> String;

    fn project(records: &BTreeMap<String, Self::Record>) -> Self;

    /// Written to the store when the collection is first seen empty.
    fn seed_records() -> Vec<(DocumentId, Self::Record)> {
        Vec::new()
    }

    /// Held in memory only, while the store cannot be reached.
    fn offline_records() -> Option<Vec<(DocumentId, Self::Record)>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorStatus {
    Connecting,
    Live,
    Offline,
}

struct MirrorState<V: CollectionView> {
    records: BTreeMap<String, V::Record>,
    view: Arc<V>,
    status: MirrorStatus,
    snapshots_seen: u64,
    seeded: bool,
    // Document count that marks the seed writes as landed.
    pending_seed: Option<usize>,
    failure_reported: bool,
}

pub struct RemoteMirror<V: CollectionView> {
    store: Arc<dyn StoreConnection>,
    status_sink: Arc<dyn StatusSink>,
    path: CollectionPath,
    state: RwLock<MirrorState<V>>,
    updates: broadcast::Sender<Arc<V>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<V: CollectionView> RemoteMirror<V> {
    pub fn new(store: Arc<dyn StoreConnection>, status_sink: Arc<dyn StatusSink>) -> Arc<Self> {
        let (updates, _) = broadcast::channel(VIEW_CHANNEL_CAPACITY);
        Arc::new(Self {
            store,
            status_sink,
            path: V::collection(),
            state: RwLock::new(MirrorState {
                records: BTreeMap::new(),
                view: Arc::new(V::default()),
                status: MirrorStatus::Connecting,
                snapshots_seen: 0,
                seeded: false,
                pending_seed: None,
                failure_reported: false,
            }),
            updates,
            listener: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    /// Current view. The returned `Arc` is a stable snapshot; later updates
    /// never change it.
    pub async fn view(&self) -> Arc<V> {
        Arc::clone(&self.state.read().await.view)
    }

    pub async fn status(&self) -> MirrorStatus {
        self.state.read().await.status
    }

    pub async fn records(&self) -> Vec<V::Record> {
        self.state.read().await.records.values().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<V>> {
        self.updates.subscribe()
    }

    /// Opens the store subscription and starts applying snapshots. Calling it
    /// again replaces the previous subscription.
    pub async fn start(self: &Arc<Self>) {
        let mut stream = match self.store.subscribe(&self.path).await {
            Ok(stream) => stream,
            Err(err) => {
                self.handle_failure(err).await;
                return;
            }
        };

        let mirror = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                match event {
                    SnapshotEvent::Snapshot(snapshot) => mirror.apply_snapshot(snapshot).await,
                    SnapshotEvent::Failed(err) => mirror.handle_failure(err).await,
                }
            }
            debug!("mirror: snapshot stream ended collection={}", mirror.path);
        });

        let previous = self.listener.lock().await.replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!("mirror: subscribed collection={}", self.path);
    }

    pub async fn stop(&self) {
        if let Some(task) = self.listener.lock().await.take() {
            task.abort();
        }
    }

    /// True once the first snapshot (and any seeding it triggered) has landed,
    /// or the store was found unreachable.
    pub async fn wait_until_loaded(&self, timeout: Duration) -> bool {
        let mut updates = self.updates.subscribe();
        if self.is_settled().await {
            return true;
        }

        let settled = tokio::time::timeout(timeout, async {
            loop {
                match updates.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.is_settled().await {
                            return true;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        })
        .await;
        settled.unwrap_or(false)
    }

    async fn is_settled(&self) -> bool {
        let state = self.state.read().await;
        state.status != MirrorStatus::Connecting && state.pending_seed.is_none()
    }

    pub(crate) async fn apply_snapshot(&self, snapshot: Snapshot) {
        let (view, seed) = {
            let mut state = self.state.write().await;
            let first = state.snapshots_seen == 0;
            state.snapshots_seen += 1;
            state.status = MirrorStatus::Live;
            state.failure_reported = false;

            state.records = decode_records::<V>(&snapshot);
            state.view = Arc::new(V::project(&state.records));

            let seed = first && snapshot.is_empty() && !state.seeded;
            if seed {
                state.seeded = true;
                let expected = V::seed_records().len();
                state.pending_seed = (expected > 0).then_some(expected);
            } else if state
                .pending_seed
                .is_some_and(|expected| snapshot.documents.len() >= expected)
            {
                state.pending_seed = None;
            }
            (Arc::clone(&state.view), seed)
        };

        debug!(
            "mirror: rebuilt collection={} documents={}",
            self.path,
            snapshot.documents.len()
        );
        let _ = self.updates.send(view);

        if seed {
            self.seed_defaults().await;
        }
    }

    pub(crate) async fn handle_failure(&self, err: StoreError) {
        let (view, first_report) = {
            let mut state = self.state.write().await;
            state.status = MirrorStatus::Offline;
            state.pending_seed = None;
            let first_report = !state.failure_reported;
            state.failure_reported = true;

            state.records = V::offline_records()
                .map(|records| {
                    records
                        .into_iter()
                        .map(|(id, record)| (V::key(&id, &record), record))
                        .collect()
                })
                .unwrap_or_default();
            state.view = Arc::new(V::project(&state.records));
            (Arc::clone(&state.view), first_report)
        };

        if first_report {
            error!("mirror: store failure collection={} error={err}", self.path);
            let fallback = if V::offline_records().is_some() {
                "using built-in defaults"
            } else {
                "showing no data"
            };
            self.status_sink
                .report(&format!("{} unavailable ({err}); {fallback}", V::LABEL));
        }
        let _ = self.updates.send(view);
    }

    async fn seed_defaults(&self) {
        let records = V::seed_records();
        if records.is_empty() {
            return;
        }
        info!(
            "mirror: seeding empty collection={} records={}",
            self.path,
            records.len()
        );

        for (id, record) in records {
            let written = match serde_json::to_value(&record) {
                Ok(data) => self
                    .store
                    .mutate(&self.path, Some(&id), data, MutateOptions::replace())
                    .await
                    .map_err(|err| err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            if let Err(err) = written {
                warn!(
                    "mirror: seed write failed collection={} id={id} error={err}",
                    self.path
                );
                self.status_sink
                    .report(&format!("could not seed {}: {err}", V::LABEL));
                self.state.write().await.pending_seed = None;
                let _ = self.updates.send(self.view().await);
                return;
            }
        }
    }
}

fn decode_records<V: CollectionView>(snapshot: &Snapshot) -> BTreeMap<String, V::Record> {
    let mut records = BTreeMap::new();
    for document in &snapshot.documents {
        match V::decode(document) {
            Ok(record) => {
                records.insert(V::key(&document.id, &record), record);
            }
            Err(err) => {
                warn!(
                    "mirror: skipping malformed document collection={} id={} error={err}",
                    snapshot.path, document.id
                );
            }
        }
    }
    records
}

#[cfg(test)]
#[path = "tests/mirror_tests.rs"]
mod tests;
