use shared::domain::{Panel, PanelId, Permanence};
use tracing::warn;

pub const CALCULATOR_PANEL: &str = "module-calculator";
pub const CONSOLE_PANEL: &str = "module-console";
pub const RESULTS_PANEL: &str = "module-results";
pub const INVENTORY_PANEL: &str = "module-inventory";
pub const HISTORY_PANEL: &str = "module-history";
pub const SIMULATOR_PANEL: &str = "module-sim3d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelDefinition {
    pub id: &'static str,
    pub title: &'static str,
    pub permanence: Permanence,
    pub default_open: bool,
}

const fn permanent(id: &'static str, title: &'static str) -> PanelDefinition {
    PanelDefinition {
        id,
        title,
        permanence: Permanence::Permanent,
        default_open: true,
    }
}

const fn floating(id: &'static str, title: &'static str, default_open: bool) -> PanelDefinition {
    PanelDefinition {
        id,
        title,
        permanence: Permanence::Floating,
        default_open,
    }
}

pub const STANDARD_CATALOG: &[PanelDefinition] = &[
    permanent(CALCULATOR_PANEL, "Dose Calculator"),
    permanent(CONSOLE_PANEL, "System Console"),
    floating(RESULTS_PANEL, "Dose Results", false),
    floating("module-profiles", "Nutrient Profiles", false),
    floating("module-analyzer", "Water Analyzer", false),
    floating(INVENTORY_PANEL, "Inventory", true),
    floating("module-npk", "NPK Balance", false),
    floating("module-diagnosis", "Deficiency Diagnosis", false),
    floating(HISTORY_PANEL, "Dosing History", false),
    floating("module-molar", "Molar Mass", false),
    floating("module-stoich", "Stoichiometry", false),
    floating(SIMULATOR_PANEL, "3-D Simulation", true),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelEntry {
    pub panel: Panel,
    pub default_open: bool,
}

/// Fixed set of panels known for the lifetime of the process, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelRegistry {
    entries: Vec<PanelEntry>,
}

impl PanelRegistry {
    pub fn standard() -> Self {
        Self::from_definitions(STANDARD_CATALOG)
    }

    /// Later definitions reusing an id are dropped; the first one wins.
    pub fn from_definitions(definitions: &[PanelDefinition]) -> Self {
        let mut entries: Vec<PanelEntry> = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if entries.iter().any(|entry| entry.panel.id.as_str() == definition.id) {
                warn!("windows: duplicate panel id in catalog id={}", definition.id);
                continue;
            }
            entries.push(PanelEntry {
                panel: Panel {
                    id: PanelId::new(definition.id),
                    title: definition.title.to_string(),
                    permanence: definition.permanence,
                },
                default_open: definition.default_open,
            });
        }
        Self { entries }
    }

    pub fn get(&self, id: &PanelId) -> Option<&Panel> {
        self.entry(id).map(|entry| &entry.panel)
    }

    pub fn entry(&self, id: &PanelId) -> Option<&PanelEntry> {
        self.entries.iter().find(|entry| &entry.panel.id == id)
    }

    pub fn entries(&self) -> &[PanelEntry] {
        &self.entries
    }

    pub fn panels(&self) -> impl Iterator<Item = &Panel> {
        self.entries.iter().map(|entry| &entry.panel)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
