//! The three collection views the control panel keeps live.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use document_store::{CollectionPath, Document};
use shared::{
    domain::DocumentId,
    protocol::{DosingHistoryEntry, InventoryItem, NutrientProfile},
};

use crate::mirror::{CollectionView, RemoteMirror};

pub type ProfileCache = RemoteMirror<ProfileView>;
pub type InventoryCache = RemoteMirror<InventoryView>;
pub type HistoryCache = RemoteMirror<HistoryView>;

/// Profiles indexed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileView {
    by_name: BTreeMap<String, NutrientProfile>,
}

impl ProfileView {
    pub fn get(&self, name: &str) -> Option<&NutrientProfile> {
        self.by_name.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &NutrientProfile> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl CollectionView for ProfileView {
    type Record = NutrientProfile;

    const LABEL: &'static str = "profiles";

    fn collection() -> CollectionPath {
        CollectionPath::profiles()
    }

    fn key(_document_id: &DocumentId, record: &NutrientProfile) -> String {
        record.name.clone()
    }

    fn project(records: &BTreeMap<String, NutrientProfile>) -> Self {
        Self {
            by_name: records.clone(),
        }
    }

    fn seed_records() -> Vec<(DocumentId, NutrientProfile)> {
        keyed_by_name(default_profiles())
    }

    fn offline_records() -> Option<Vec<(DocumentId, NutrientProfile)>> {
        Some(keyed_by_name(default_profiles()))
    }
}

/// Inventory sorted by name, with the low-stock set and a name lookup that
/// ignores case and surrounding whitespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryView {
    items: Vec<InventoryItem>,
    low_stock: BTreeSet<String>,
    by_name: HashMap<String, usize>,
}

impl InventoryView {
    pub fn items(&self) -> &[InventoryItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&InventoryItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Looks a salt up by display name, then by its calculation `code`.
    pub fn find_by_name(&self, name: &str) -> Option<&InventoryItem> {
        self.by_name
            .get(&normalize_name(name))
            .and_then(|index| self.items.get(*index))
    }

    /// Ids of items under the low-stock threshold.
    pub fn low_stock(&self) -> &BTreeSet<String> {
        &self.low_stock
    }

    pub fn is_low(&self, id: &str) -> bool {
        self.low_stock.contains(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl CollectionView for InventoryView {
    type Record = InventoryItem;

    const LABEL: &'static str = "inventory";

    fn collection() -> CollectionPath {
        CollectionPath::inventory()
    }

    fn decode(document: &Document) -> serde_json::Result<InventoryItem> {
        let mut item: InventoryItem = serde_json::from_value(document.data.clone())?;
        item.id = document.id.to_string();
        if !item.stock_kg.is_finite() || item.stock_kg < 0.0 {
            item.stock_kg = 0.0;
        }
        Ok(item)
    }

    fn key(document_id: &DocumentId, _record: &InventoryItem) -> String {
        document_id.to_string()
    }

    fn project(records: &BTreeMap<String, InventoryItem>) -> Self {
        let mut items: Vec<InventoryItem> = records.values().cloned().collect();
        items.sort_by(|left, right| left.name.cmp(&right.name).then(left.id.cmp(&right.id)));

        let low_stock = items
            .iter()
            .filter(|item| item.is_low())
            .map(|item| item.id.clone())
            .collect();
        let mut by_name = HashMap::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            by_name.entry(normalize_name(&item.name)).or_insert(index);
        }
        for (index, item) in items.iter().enumerate() {
            if let Some(code) = &item.code {
                by_name.entry(normalize_name(code)).or_insert(index);
            }
        }

        Self {
            items,
            low_stock,
            by_name,
        }
    }

    fn seed_records() -> Vec<(DocumentId, InventoryItem)> {
        default_inventory()
            .into_iter()
            .map(|item| (DocumentId::new(item.id.clone()), item))
            .collect()
    }
}

/// Dosing history, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryView {
    entries: Vec<DosingHistoryEntry>,
}

impl HistoryView {
    pub fn entries(&self) -> &[DosingHistoryEntry] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&DosingHistoryEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CollectionView for HistoryView {
    type Record = DosingHistoryEntry;

    const LABEL: &'static str = "dosing history";

    fn collection() -> CollectionPath {
        CollectionPath::dosing_history()
    }

    fn key(document_id: &DocumentId, _record: &DosingHistoryEntry) -> String {
        document_id.to_string()
    }

    fn project(records: &BTreeMap<String, DosingHistoryEntry>) -> Self {
        let mut entries: Vec<DosingHistoryEntry> = records.values().cloned().collect();
        entries.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        Self { entries }
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn default_profiles() -> Vec<NutrientProfile> {
    vec![
        NutrientProfile {
            name: "Lettuce (Vegetative)".to_string(),
            n: 140.0,
            p: 40.0,
            k: 200.0,
            ec: 1.4,
            ph: 5.9,
            ca: Some(150.0),
            mg: Some(50.0),
            code: Some("Lechuga (Vegetativo)".to_string()),
        },
        NutrientProfile {
            name: "Tomato (Flowering)".to_string(),
            n: 180.0,
            p: 50.0,
            k: 280.0,
            ec: 2.2,
            ph: 6.0,
            ca: Some(200.0),
            mg: Some(60.0),
            code: Some("Tomate (Floración)".to_string()),
        },
        NutrientProfile {
            name: "Strawberry (Ripening)".to_string(),
            n: 100.0,
            p: 30.0,
            k: 300.0,
            ec: 1.8,
            ph: 5.8,
            ca: Some(100.0),
            mg: Some(40.0),
            code: Some("Fresa (Maduración)".to_string()),
        },
    ]
}

pub fn default_inventory() -> Vec<InventoryItem> {
    [
        ("calcium-nitrate", "Calcium Nitrate", "NitratoCalcio", 12.0, 1800.0),
        ("magnesium-sulfate", "Magnesium Sulfate", "SulfatoMagnesio", 4.5, 1200.0),
        ("potassium-nitrate", "Potassium Nitrate", "NitratoPotasio", 7.0, 2100.0),
        ("monopotassium-phosphate", "Monopotassium Phosphate", "FosfatoMonopot", 6.0, 2600.0),
        ("ammonium-nitrate", "Ammonium Nitrate", "NitratoAmonio", 8.0, 1400.0),
    ]
    .into_iter()
    .map(|(id, name, code, stock_kg, cost_per_kg)| InventoryItem {
        id: id.to_string(),
        name: name.to_string(),
        stock_kg,
        cost_per_kg,
        code: Some(code.to_string()),
    })
    .collect()
}

fn keyed_by_name(profiles: Vec<NutrientProfile>) -> Vec<(DocumentId, NutrientProfile)> {
    profiles
        .into_iter()
        .map(|profile| (DocumentId::new(profile.name.clone()), profile))
        .collect()
}

#[cfg(test)]
#[path = "tests/caches_tests.rs"]
mod tests;
