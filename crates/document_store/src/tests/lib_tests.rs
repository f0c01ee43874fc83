use super::*;
use serde_json::json;
use shared::error::StoreErrorCode;

fn doc(id: &str, data: Value) -> Document {
    Document {
        id: DocumentId::new(id),
        data,
    }
}

#[test]
fn merge_document_overlays_top_level_keys() {
    let mut existing = json!({"name": "Calcium Nitrate", "stockKg": 12.0, "costPerKg": 1800.0});
    merge_document(&mut existing, json!({"stockKg": 11.5}));
    assert_eq!(
        existing,
        json!({"name": "Calcium Nitrate", "stockKg": 11.5, "costPerKg": 1800.0})
    );
}

#[test]
fn merge_document_replaces_non_objects() {
    let mut existing = json!(["a", "b"]);
    merge_document(&mut existing, json!({"stockKg": 1.0}));
    assert_eq!(existing, json!({"stockKg": 1.0}));
}

#[tokio::test]
async fn hub_stream_yields_initial_then_published_snapshots() {
    let hub = SnapshotHub::new();
    let path = CollectionPath::inventory();
    let receiver = hub.receiver(&path).await;
    let mut stream = SnapshotHub::into_stream(Snapshot::empty(path.clone()), receiver);

    let published = Snapshot {
        path: path.clone(),
        documents: vec![doc("a", json!({"stockKg": 1.0}))],
    };
    assert_eq!(hub.publish(published.clone()).await, 1);

    match stream.next().await {
        Some(SnapshotEvent::Snapshot(first)) => assert!(first.is_empty()),
        other => panic!("unexpected first event: {other:?}"),
    }
    match stream.next().await {
        Some(SnapshotEvent::Snapshot(second)) => assert_eq!(second, published),
        other => panic!("unexpected second event: {other:?}"),
    }
}

#[tokio::test]
async fn hub_publish_without_subscribers_reaches_nobody() {
    let hub = SnapshotHub::new();
    let delivered = hub
        .publish(Snapshot::empty(CollectionPath::profiles()))
        .await;
    assert_eq!(delivered, 0);
}

#[tokio::test]
async fn hub_forwards_failures_to_subscribers() {
    let hub = SnapshotHub::new();
    let path = CollectionPath::profiles();
    let receiver = hub.receiver(&path).await;
    let mut stream = SnapshotHub::into_stream(Snapshot::empty(path.clone()), receiver);
    hub.publish_failure(&path, StoreError::unavailable("offline"))
        .await;

    let _initial = stream.next().await;
    match stream.next().await {
        Some(SnapshotEvent::Failed(err)) => assert_eq!(err.code, StoreErrorCode::Unavailable),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn missing_store_reports_unavailable() {
    let store = MissingStoreConnection;
    let err = match store.subscribe(&CollectionPath::profiles()).await {
        Ok(_) => panic!("subscribe must fail"),
        Err(err) => err,
    };
    assert!(err.is_connectivity());
}
