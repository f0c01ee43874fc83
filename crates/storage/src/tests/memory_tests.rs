use super::*;
use document_store::SnapshotEvent;
use futures::StreamExt;
use serde_json::json;

#[tokio::test]
async fn merge_overlays_existing_document() {
    let store = MemoryStorage::new();
    let path = CollectionPath::inventory();
    let id = DocumentId::new("cano3");
    store
        .mutate(
            &path,
            Some(&id),
            json!({"name": "Calcium Nitrate", "stockKg": 12.0}),
            MutateOptions::replace(),
        )
        .await
        .expect("insert");
    store
        .mutate(&path, Some(&id), json!({"stockKg": 11.0}), MutateOptions::merge())
        .await
        .expect("merge");

    assert_eq!(
        store.document(&path, &id).await,
        Some(json!({"name": "Calcium Nitrate", "stockKg": 11.0}))
    );
}

#[tokio::test]
async fn replace_drops_previous_fields() {
    let store = MemoryStorage::new();
    let path = CollectionPath::profiles();
    let id = DocumentId::new("Lettuce");
    store
        .mutate(&path, Some(&id), json!({"N": 140.0, "Ca": 150.0}), MutateOptions::replace())
        .await
        .expect("insert");
    store
        .mutate(&path, Some(&id), json!({"N": 150.0}), MutateOptions::replace())
        .await
        .expect("replace");
    assert_eq!(store.document(&path, &id).await, Some(json!({"N": 150.0})));
}

#[tokio::test]
async fn subscribers_receive_full_collection_on_every_write() {
    let store = MemoryStorage::new();
    let path = CollectionPath::dosing_history();
    let mut stream = store.subscribe(&path).await.expect("subscribe");
    let _initial = stream.next().await;

    store
        .mutate(&path, None, json!({"n": 1}), MutateOptions::replace())
        .await
        .expect("first");
    store
        .mutate(&path, None, json!({"n": 2}), MutateOptions::replace())
        .await
        .expect("second");

    let mut sizes = Vec::new();
    for _ in 0..2 {
        match stream.next().await {
            Some(SnapshotEvent::Snapshot(snapshot)) => sizes.push(snapshot.documents.len()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(sizes, vec![1, 2]);
    assert_eq!(store.len(&path).await, 2);
}
