use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inventory quantity (kg) under which an item is flagged low.
pub const LOW_STOCK_THRESHOLD_KG: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutrientProfile {
    pub name: String,
    #[serde(rename = "N")]
    pub n: f64,
    #[serde(rename = "P")]
    pub p: f64,
    #[serde(rename = "K")]
    pub k: f64,
    #[serde(rename = "EC")]
    pub ec: f64,
    #[serde(rename = "pH")]
    pub ph: f64,
    #[serde(rename = "Ca", default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<f64>,
    #[serde(rename = "Mg", default, skip_serializing_if = "Option::is_none")]
    pub mg: Option<f64>,
    /// Name the dose calculation backend knows this profile by, when it
    /// differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl NutrientProfile {
    pub fn backend_name(&self) -> &str {
        self.code.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub stock_kg: f64,
    pub cost_per_kg: f64,
    /// Fertilizer identifier used in dose calculation results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl InventoryItem {
    pub fn is_low(&self) -> bool {
        self.stock_kg < LOW_STOCK_THRESHOLD_KG
    }

    /// Stock left after taking `grams` out, never below zero.
    pub fn stock_after(&self, grams: f64) -> f64 {
        (self.stock_kg - grams / 1000.0).max(0.0)
    }
}

/// One line of a dose as recorded in history. `persisted` is false when the
/// matching inventory decrement did not reach the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedDose {
    pub name: String,
    pub grams: f64,
    #[serde(default = "default_persisted")]
    pub persisted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

fn default_persisted() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DosingHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub profile_name: String,
    pub volume_liters: f64,
    pub ec_final: String,
    pub ph_final: String,
    pub doses_applied: Vec<AppliedDose>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLine {
    pub salt_name: String,
    pub grams: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DosePlan {
    pub volume_liters: f64,
    pub profile_name: String,
    pub line_items: Vec<PlanLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec_estimated: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ph_estimated: Option<f64>,
}
