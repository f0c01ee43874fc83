//! Dose commits: one inventory decrement per salt, then one history entry.
//!
//! Salt updates are independent documents and are issued together; a failed
//! update does not undo the others. The history entry records every line,
//! including the ones whose decrement did not persist.

use std::sync::Arc;

use chrono::Utc;
use document_store::{CollectionPath, MutateOptions, StoreConnection};
use futures::future::join_all;
use serde_json::json;
use shared::{
    domain::DocumentId,
    protocol::{AppliedDose, DosePlan, DosingHistoryEntry, PlanLine},
};
use tracing::{info, warn};

use crate::{
    animation::PumpAnimation,
    caches::{normalize_name, InventoryCache, InventoryView, ProfileCache},
    error::{CoreError, FailedLine, HistoryWrite, PartialDoseFailure},
};

/// Smallest amount a line is ever reported or applied with.
pub const MIN_DOSE_GRAMS: f64 = 0.01;

const VOLUME_TOLERANCE_LITERS: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct DoseRequest {
    pub profile_name: String,
    pub volume_liters: f64,
    pub plan: DosePlan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineOutcome {
    pub salt_name: String,
    pub grams: f64,
    pub inventory_id: Option<String>,
    pub stock_after_kg: Option<f64>,
    pub result: Result<(), String>,
}

impl LineOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoseReceipt {
    pub history_id: DocumentId,
    pub entry: DosingHistoryEntry,
    pub lines: Vec<LineOutcome>,
}

pub struct DosingCoordinator {
    store: Arc<dyn StoreConnection>,
    profiles: Arc<ProfileCache>,
    inventory: Arc<InventoryCache>,
    animation: Arc<PumpAnimation>,
}

impl DosingCoordinator {
    pub fn new(
        store: Arc<dyn StoreConnection>,
        profiles: Arc<ProfileCache>,
        inventory: Arc<InventoryCache>,
        animation: Arc<PumpAnimation>,
    ) -> Self {
        Self {
            store,
            profiles,
            inventory,
            animation,
        }
    }

    pub async fn commit(&self, request: DoseRequest) -> Result<DoseReceipt, CoreError> {
        self.validate(&request).await?;
        let lines = consolidate_lines(&request.plan.line_items);
        if let Some(line) = lines.iter().find(|line| !line.grams.is_finite()) {
            return Err(CoreError::InvalidDoseRequest(format!(
                "combined amount for {} is out of range",
                line.salt_name
            )));
        }

        self.animation.start().await;
        info!(
            "dosing: commit started profile={} volume_liters={} lines={}",
            request.profile_name,
            request.volume_liters,
            lines.len()
        );

        // Every line is resolved against the same inventory snapshot.
        let inventory = self.inventory.view().await;
        let outcomes = join_all(
            lines
                .iter()
                .map(|line| self.apply_line(&inventory, line)),
        )
        .await;

        let failed: Vec<FailedLine> = outcomes
            .iter()
            .filter_map(|outcome| match &outcome.result {
                Ok(()) => None,
                Err(reason) => Some(FailedLine {
                    salt_name: outcome.salt_name.clone(),
                    grams: outcome.grams,
                    reason: reason.clone(),
                }),
            })
            .collect();
        let committed: Vec<String> = outcomes
            .iter()
            .filter(|outcome| outcome.succeeded())
            .map(|outcome| outcome.salt_name.clone())
            .collect();

        if committed.is_empty() {
            warn!(
                "dosing: no inventory update persisted profile={} failed={}",
                request.profile_name,
                failed.len()
            );
            return Err(CoreError::PartialDoseFailure(PartialDoseFailure {
                failed,
                committed,
                history: HistoryWrite::Skipped,
            }));
        }

        let entry = history_entry(&request, &outcomes);
        let history = self.append_history(&entry).await;

        match history {
            HistoryWrite::Appended(history_id) if failed.is_empty() => {
                info!(
                    "dosing: commit complete profile={} history_id={history_id}",
                    request.profile_name
                );
                Ok(DoseReceipt {
                    history_id,
                    entry,
                    lines: outcomes,
                })
            }
            history => {
                warn!(
                    "dosing: commit partially applied profile={} failed={} committed={}",
                    request.profile_name,
                    failed.len(),
                    committed.len()
                );
                Err(CoreError::PartialDoseFailure(PartialDoseFailure {
                    failed,
                    committed,
                    history,
                }))
            }
        }
    }

    async fn validate(&self, request: &DoseRequest) -> Result<(), CoreError> {
        if !request.volume_liters.is_finite() || request.volume_liters <= 0.0 {
            return Err(CoreError::InvalidDoseRequest(format!(
                "volume must be a positive number of liters, got {}",
                request.volume_liters
            )));
        }
        if self.profiles.view().await.get(&request.profile_name).is_none() {
            return Err(CoreError::InvalidDoseRequest(format!(
                "unknown profile {:?}",
                request.profile_name
            )));
        }

        let plan = &request.plan;
        if plan.profile_name != request.profile_name {
            return Err(CoreError::InvalidDoseRequest(format!(
                "plan was computed for profile {:?}, not {:?}",
                plan.profile_name, request.profile_name
            )));
        }
        if (plan.volume_liters - request.volume_liters).abs() > VOLUME_TOLERANCE_LITERS {
            return Err(CoreError::InvalidDoseRequest(format!(
                "plan was computed for {} L, not {} L",
                plan.volume_liters, request.volume_liters
            )));
        }
        if plan.line_items.is_empty() {
            return Err(CoreError::InvalidDoseRequest(
                "plan has no line items".to_string(),
            ));
        }
        for line in &plan.line_items {
            if line.salt_name.trim().is_empty() {
                return Err(CoreError::InvalidDoseRequest(
                    "plan line without a salt name".to_string(),
                ));
            }
            if !line.grams.is_finite() || line.grams < 0.0 {
                return Err(CoreError::InvalidDoseRequest(format!(
                    "invalid amount {} g for {}",
                    line.grams, line.salt_name
                )));
            }
        }
        Ok(())
    }

    async fn apply_line(&self, inventory: &InventoryView, line: &PlanLine) -> LineOutcome {
        let Some(item) = inventory.find_by_name(&line.salt_name) else {
            warn!("dosing: no inventory item for salt={}", line.salt_name);
            return LineOutcome {
                salt_name: line.salt_name.clone(),
                grams: line.grams,
                inventory_id: None,
                stock_after_kg: None,
                result: Err(format!("no inventory item named {:?}", line.salt_name)),
            };
        };

        let stock_after = item.stock_after(line.grams);
        let result = self
            .store
            .mutate(
                &CollectionPath::inventory(),
                Some(&DocumentId::new(item.id.clone())),
                json!({ "stockKg": stock_after }),
                MutateOptions::merge(),
            )
            .await
            .map(|_| ())
            .map_err(|err| {
                warn!(
                    "dosing: inventory update failed salt={} id={} error={err}",
                    line.salt_name, item.id
                );
                err.to_string()
            });

        LineOutcome {
            salt_name: line.salt_name.clone(),
            grams: line.grams,
            inventory_id: Some(item.id.clone()),
            stock_after_kg: Some(stock_after),
            result,
        }
    }

    async fn append_history(&self, entry: &DosingHistoryEntry) -> HistoryWrite {
        let data = match serde_json::to_value(entry) {
            Ok(data) => data,
            Err(err) => return HistoryWrite::Failed(err.to_string()),
        };
        match self
            .store
            .mutate(
                &CollectionPath::dosing_history(),
                None,
                data,
                MutateOptions::replace(),
            )
            .await
        {
            Ok(id) => HistoryWrite::Appended(id),
            Err(err) => {
                warn!("dosing: history append failed error={err}");
                HistoryWrite::Failed(err.to_string())
            }
        }
    }
}

/// Merges repeated salts (first spelling and position kept) and lifts every
/// amount to at least [`MIN_DOSE_GRAMS`].
pub fn consolidate_lines(lines: &[PlanLine]) -> Vec<PlanLine> {
    let mut merged: Vec<PlanLine> = Vec::with_capacity(lines.len());
    for line in lines {
        let key = normalize_name(&line.salt_name);
        match merged
            .iter_mut()
            .find(|existing| normalize_name(&existing.salt_name) == key)
        {
            Some(existing) => existing.grams += line.grams,
            None => merged.push(PlanLine {
                salt_name: line.salt_name.trim().to_string(),
                grams: line.grams,
            }),
        }
    }
    for line in &mut merged {
        line.grams = line.grams.max(MIN_DOSE_GRAMS);
    }
    merged
}

fn history_entry(request: &DoseRequest, outcomes: &[LineOutcome]) -> DosingHistoryEntry {
    DosingHistoryEntry {
        timestamp: Utc::now(),
        profile_name: request.profile_name.clone(),
        volume_liters: request.volume_liters,
        ec_final: format_estimate(request.plan.ec_estimated),
        ph_final: format_estimate(request.plan.ph_estimated),
        doses_applied: outcomes
            .iter()
            .map(|outcome| AppliedDose {
                name: outcome.salt_name.clone(),
                grams: outcome.grams,
                persisted: outcome.succeeded(),
                failure: outcome.result.clone().err(),
            })
            .collect(),
    }
}

fn format_estimate(value: Option<f64>) -> String {
    match value {
        Some(value) if value.is_finite() => format!("{value:.2}"),
        _ => "n/a".to_string(),
    }
}

#[cfg(test)]
#[path = "tests/transaction_tests.rs"]
mod tests;
