use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use document_store::{
    CollectionPath, MutateOptions, Snapshot, SnapshotStream, StoreConnection,
};
use serde_json::{json, Value};
use shared::{
    domain::{DocumentId, PanelId},
    error::{StoreError, StoreErrorCode},
    protocol::{DosePlan, NutrientProfile, PlanLine},
};
use storage::MemoryStorage;

use crate::{AnimationCue, ComputationService, Renderer, StatusSink};

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    Show(String),
    Hide(String),
    ZIndex(String, i32),
    Inspector(String, bool),
    Cue(AnimationCue),
}

#[derive(Default)]
pub struct RecordingRenderer {
    pub calls: Mutex<Vec<RenderCall>>,
}

impl RecordingRenderer {
    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().expect("renderer calls").clone()
    }

    pub fn cues(&self) -> Vec<AnimationCue> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RenderCall::Cue(cue) => Some(cue),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: RenderCall) {
        self.calls.lock().expect("renderer calls").push(call);
    }
}

impl Renderer for RecordingRenderer {
    fn show_panel(&self, id: &PanelId) {
        self.push(RenderCall::Show(id.to_string()));
    }

    fn hide_panel(&self, id: &PanelId) {
        self.push(RenderCall::Hide(id.to_string()));
    }

    fn set_z_index(&self, id: &PanelId, z_index: i32) {
        self.push(RenderCall::ZIndex(id.to_string(), z_index));
    }

    fn set_inspector_active(&self, id: &PanelId, active: bool) {
        self.push(RenderCall::Inspector(id.to_string(), active));
    }

    fn animation_cue(&self, cue: AnimationCue) {
        self.push(RenderCall::Cue(cue));
    }
}

#[derive(Default)]
pub struct RecordingStatus {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingStatus {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("status messages").clone()
    }
}

impl StatusSink for RecordingStatus {
    fn report(&self, message: &str) {
        self.messages
            .lock()
            .expect("status messages")
            .push(message.to_string());
    }
}

/// Memory store that can be taken offline or told to refuse writes to
/// specific documents.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStorage,
    offline: AtomicBool,
    failing_documents: Mutex<HashSet<String>>,
    fail_new_documents: AtomicBool,
    pub mutate_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn offline() -> Arc<Self> {
        let store = Self::default();
        store.offline.store(true, Ordering::SeqCst);
        Arc::new(store)
    }

    pub fn fail_document(&self, doc_id: &str) {
        self.failing_documents
            .lock()
            .expect("failing documents")
            .insert(doc_id.to_string());
    }

    pub fn fail_new_documents(&self) {
        self.fail_new_documents.store(true, Ordering::SeqCst);
    }

    pub fn mutate_count(&self) -> usize {
        self.mutate_calls.load(Ordering::SeqCst)
    }

    pub async fn put(&self, path: &CollectionPath, doc_id: &str, data: Value) {
        self.inner
            .mutate(
                path,
                Some(&DocumentId::new(doc_id)),
                data,
                MutateOptions::replace(),
            )
            .await
            .expect("seed document");
    }

    pub async fn stock_of(&self, doc_id: &str) -> f64 {
        self.inner
            .document(&CollectionPath::inventory(), &DocumentId::new(doc_id))
            .await
            .and_then(|doc| doc["stockKg"].as_f64())
            .expect("stock value")
    }

    fn is_failing(&self, doc_id: &DocumentId) -> bool {
        self.failing_documents
            .lock()
            .expect("failing documents")
            .contains(doc_id.as_str())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for FlakyStore {
    async fn subscribe(&self, path: &CollectionPath) -> Result<SnapshotStream, StoreError> {
        self.check_online()?;
        self.inner.subscribe(path).await
    }

    async fn mutate(
        &self,
        path: &CollectionPath,
        doc_id: Option<&DocumentId>,
        data: Value,
        options: MutateOptions,
    ) -> Result<DocumentId, StoreError> {
        self.mutate_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let rejected = match doc_id {
            Some(id) => self.is_failing(id),
            None => self.fail_new_documents.load(Ordering::SeqCst),
        };
        if rejected {
            let target = doc_id.map(ToString::to_string).unwrap_or_default();
            return Err(StoreError::new(
                StoreErrorCode::Rejected,
                format!("write to {path}/{target} rejected"),
            ));
        }
        self.inner.mutate(path, doc_id, data, options).await
    }

    async fn delete(&self, path: &CollectionPath, doc_id: &DocumentId) -> Result<(), StoreError> {
        self.check_online()?;
        self.inner.delete(path, doc_id).await
    }

    async fn query_once(&self, path: &CollectionPath) -> Result<Snapshot, StoreError> {
        self.check_online()?;
        self.inner.query_once(path).await
    }
}

pub struct FixedComputation {
    pub lines: Vec<(String, f64)>,
    pub fail_with: Option<String>,
}

impl FixedComputation {
    pub fn ok(lines: &[(&str, f64)]) -> Self {
        Self {
            lines: lines
                .iter()
                .map(|(name, grams)| (name.to_string(), *grams))
                .collect(),
            fail_with: None,
        }
    }

    pub fn failing(err: impl Into<String>) -> Self {
        Self {
            lines: Vec::new(),
            fail_with: Some(err.into()),
        }
    }
}

#[async_trait]
impl ComputationService for FixedComputation {
    async fn compute_dose_plan(
        &self,
        profile: &NutrientProfile,
        volume_liters: f64,
    ) -> Result<DosePlan> {
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        Ok(DosePlan {
            volume_liters,
            profile_name: profile.name.clone(),
            line_items: self
                .lines
                .iter()
                .map(|(salt_name, grams)| PlanLine {
                    salt_name: salt_name.clone(),
                    grams: *grams,
                })
                .collect(),
            ec_estimated: Some(1.85),
            ph_estimated: Some(5.8),
        })
    }
}

pub fn profile_json(name: &str) -> Value {
    json!({"name": name, "N": 150.0, "P": 50.0, "K": 210.0, "EC": 1.6, "pH": 5.9})
}

pub fn inventory_json(name: &str, stock_kg: f64) -> Value {
    json!({"name": name, "stockKg": stock_kg, "costPerKg": 1500.0})
}

pub fn plan(profile: &str, volume_liters: f64, lines: &[(&str, f64)]) -> DosePlan {
    DosePlan {
        volume_liters,
        profile_name: profile.to_string(),
        line_items: lines
            .iter()
            .map(|(salt_name, grams)| PlanLine {
                salt_name: salt_name.to_string(),
                grams: *grams,
            })
            .collect(),
        ec_estimated: Some(1.85),
        ph_estimated: Some(5.8),
    }
}

pub fn approx_eq(left: f64, right: f64) -> bool {
    (left - right).abs() < 1e-9
}
