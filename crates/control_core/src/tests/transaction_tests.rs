use std::time::Duration;

use tokio::sync::Mutex;

use super::*;
use crate::{
    caches::HistoryCache,
    mirror::RemoteMirror,
    registry::PanelRegistry,
    test_support::{
        approx_eq, inventory_json, plan, profile_json, FlakyStore, RecordingRenderer,
        RecordingStatus,
    },
    window::WindowManager,
    AnimationCue,
};

const PROFILE: &str = "Lettuce (Vegetative)";
const CALCIUM: &str = "Calcium Nitrate";
const MAGNESIUM: &str = "Magnesium Sulfate";
const LOAD_TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    store: Arc<FlakyStore>,
    renderer: Arc<RecordingRenderer>,
    history: Arc<HistoryCache>,
    coordinator: DosingCoordinator,
}

async fn harness() -> Harness {
    let store = FlakyStore::new();
    store
        .put(&CollectionPath::profiles(), PROFILE, profile_json(PROFILE))
        .await;
    store
        .put(&CollectionPath::inventory(), "cn", inventory_json(CALCIUM, 15.0))
        .await;
    store
        .put(&CollectionPath::inventory(), "ms", inventory_json(MAGNESIUM, 2.5))
        .await;

    let status = Arc::new(RecordingStatus::default());
    let renderer = Arc::new(RecordingRenderer::default());
    let profiles = RemoteMirror::new(store.clone(), status.clone());
    let inventory = RemoteMirror::new(store.clone(), status.clone());
    let history = RemoteMirror::new(store.clone(), status);
    profiles.start().await;
    inventory.start().await;
    history.start().await;
    assert!(profiles.wait_until_loaded(LOAD_TIMEOUT).await);
    assert!(inventory.wait_until_loaded(LOAD_TIMEOUT).await);
    assert!(history.wait_until_loaded(LOAD_TIMEOUT).await);

    let windows = Arc::new(Mutex::new(WindowManager::new(
        PanelRegistry::standard(),
        renderer.clone(),
    )));
    let animation = Arc::new(PumpAnimation::new(windows, renderer.clone()));
    let coordinator = DosingCoordinator::new(store.clone(), profiles, inventory, animation);

    Harness {
        store,
        renderer,
        history,
        coordinator,
    }
}

fn request(lines: &[(&str, f64)]) -> DoseRequest {
    DoseRequest {
        profile_name: PROFILE.to_string(),
        volume_liters: 100.0,
        plan: plan(PROFILE, 100.0, lines),
    }
}

async fn history_len(store: &FlakyStore) -> usize {
    store.inner.len(&CollectionPath::dosing_history()).await
}

fn partial(err: CoreError) -> PartialDoseFailure {
    match err {
        CoreError::PartialDoseFailure(failure) => failure,
        other => panic!("expected partial failure, got {other:?}"),
    }
}

#[tokio::test]
async fn commit_decrements_each_salt_and_appends_one_entry() {
    let harness = harness().await;
    let mut history_updates = harness.history.subscribe();

    let receipt = harness
        .coordinator
        .commit(request(&[(CALCIUM, 10.0), (MAGNESIUM, 5.0)]))
        .await
        .expect("commit");

    assert!(approx_eq(harness.store.stock_of("cn").await, 14.99));
    assert!(approx_eq(harness.store.stock_of("ms").await, 2.495));
    assert_eq!(history_len(&harness.store).await, 1);

    let names: Vec<_> = receipt
        .entry
        .doses_applied
        .iter()
        .map(|dose| dose.name.as_str())
        .collect();
    assert_eq!(names, vec![CALCIUM, MAGNESIUM]);
    assert!(receipt.entry.doses_applied.iter().all(|dose| dose.persisted));
    assert_eq!(receipt.entry.ec_final, "1.85");
    assert_eq!(receipt.entry.ph_final, "5.80");
    assert!(receipt.lines.iter().all(LineOutcome::succeeded));

    let view = tokio::time::timeout(LOAD_TIMEOUT, history_updates.recv())
        .await
        .expect("history update in time")
        .expect("history update");
    assert_eq!(view.len(), 1);
    assert_eq!(harness.renderer.cues().first(), Some(&AnimationCue::Start));
}

#[tokio::test]
async fn one_failed_salt_still_commits_the_rest() {
    let harness = harness().await;
    harness.store.fail_document("ms");

    let err = harness
        .coordinator
        .commit(request(&[(CALCIUM, 10.0), (MAGNESIUM, 5.0)]))
        .await
        .expect_err("partial failure");

    let failure = partial(err);
    assert_eq!(failure.failed_salts(), vec![MAGNESIUM]);
    assert_eq!(failure.committed, vec![CALCIUM.to_string()]);
    assert!(matches!(failure.history, HistoryWrite::Appended(_)));
    assert!(failure.to_string().contains(MAGNESIUM));
    assert!(!failure.to_string().contains(CALCIUM));

    assert!(approx_eq(harness.store.stock_of("cn").await, 14.99));
    assert!(approx_eq(harness.store.stock_of("ms").await, 2.5));
    assert_eq!(history_len(&harness.store).await, 1);
}

#[tokio::test]
async fn history_records_unpersisted_lines() {
    let harness = harness().await;
    harness.store.fail_document("ms");
    let _ = harness
        .coordinator
        .commit(request(&[(CALCIUM, 10.0), (MAGNESIUM, 5.0)]))
        .await;

    let snapshot = harness
        .store
        .inner
        .query_once(&CollectionPath::dosing_history())
        .await
        .expect("history");
    let entry: DosingHistoryEntry =
        serde_json::from_value(snapshot.documents[0].data.clone()).expect("entry");
    let magnesium = entry
        .doses_applied
        .iter()
        .find(|dose| dose.name == MAGNESIUM)
        .expect("magnesium line");
    assert!(!magnesium.persisted);
    assert!(magnesium.failure.is_some());
}

#[tokio::test]
async fn stock_never_goes_negative() {
    let harness = harness().await;

    harness
        .coordinator
        .commit(request(&[(MAGNESIUM, 20_000.0)]))
        .await
        .expect("commit");

    assert_eq!(harness.store.stock_of("ms").await, 0.0);
}

#[tokio::test]
async fn invalid_requests_write_nothing() {
    let harness = harness().await;
    let mut unknown_profile = request(&[(CALCIUM, 10.0)]);
    unknown_profile.profile_name = "Basil".to_string();
    unknown_profile.plan.profile_name = "Basil".to_string();
    let mut zero_volume = request(&[(CALCIUM, 10.0)]);
    zero_volume.volume_liters = 0.0;
    let mut other_plan = request(&[(CALCIUM, 10.0)]);
    other_plan.plan.profile_name = "Tomato (Flowering)".to_string();
    let mut other_volume = request(&[(CALCIUM, 10.0)]);
    other_volume.plan.volume_liters = 50.0;

    for bad in [
        unknown_profile,
        zero_volume,
        other_plan,
        other_volume,
        request(&[]),
        request(&[(CALCIUM, -1.0)]),
        request(&[(CALCIUM, f64::NAN)]),
        request(&[("  ", 1.0)]),
        request(&[(CALCIUM, 1e308), (CALCIUM, 1e308)]),
    ] {
        let err = harness.coordinator.commit(bad).await.expect_err("rejected");
        assert!(matches!(err, CoreError::InvalidDoseRequest(_)), "{err:?}");
    }

    assert_eq!(harness.store.mutate_count(), 0);
    assert!(harness.renderer.cues().is_empty());
}

#[tokio::test]
async fn unmatched_salt_fails_without_a_store_call() {
    let harness = harness().await;

    let err = harness
        .coordinator
        .commit(request(&[("Iron Chelate", 2.0), (CALCIUM, 10.0)]))
        .await
        .expect_err("partial failure");

    assert_eq!(partial(err).failed_salts(), vec!["Iron Chelate"]);
    // Calcium decrement plus the history entry.
    assert_eq!(harness.store.mutate_count(), 2);
}

#[tokio::test]
async fn nothing_persisted_means_no_history() {
    let harness = harness().await;
    harness.store.fail_document("cn");
    harness.store.fail_document("ms");

    let err = harness
        .coordinator
        .commit(request(&[(CALCIUM, 10.0), (MAGNESIUM, 5.0)]))
        .await
        .expect_err("failure");

    let failure = partial(err);
    assert_eq!(failure.history, HistoryWrite::Skipped);
    assert!(failure.committed.is_empty());
    assert_eq!(history_len(&harness.store).await, 0);
}

#[tokio::test]
async fn failed_history_append_is_reported() {
    let harness = harness().await;
    harness.store.fail_new_documents();

    let err = harness
        .coordinator
        .commit(request(&[(CALCIUM, 10.0)]))
        .await
        .expect_err("history failure");

    let failure = partial(err);
    assert!(failure.failed.is_empty());
    assert!(matches!(failure.history, HistoryWrite::Failed(_)));
    assert!(approx_eq(harness.store.stock_of("cn").await, 14.99));
}

#[tokio::test]
async fn duplicate_lines_are_merged_before_writing() {
    let harness = harness().await;

    let receipt = harness
        .coordinator
        .commit(request(&[(CALCIUM, 10.0), ("calcium nitrate ", 5.0)]))
        .await
        .expect("commit");

    assert_eq!(receipt.lines.len(), 1);
    assert!(approx_eq(harness.store.stock_of("cn").await, 14.985));
}

#[test]
fn consolidate_keeps_first_position_and_clamps() {
    let lines = consolidate_lines(&[
        PlanLine {
            salt_name: "B".to_string(),
            grams: 0.0,
        },
        PlanLine {
            salt_name: "A".to_string(),
            grams: 2.0,
        },
        PlanLine {
            salt_name: " b".to_string(),
            grams: 0.0,
        },
    ]);

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].salt_name, "B");
    assert_eq!(lines[0].grams, MIN_DOSE_GRAMS);
    assert_eq!(lines[1].grams, 2.0);
}

#[test]
fn missing_estimates_format_as_not_available() {
    assert_eq!(format_estimate(None), "n/a");
    assert_eq!(format_estimate(Some(f64::NAN)), "n/a");
    assert_eq!(format_estimate(Some(1.234)), "1.23");
}
