//! Window management and live-data synchronization for the dosing control panel.
//!
//! Everything outside this crate is a collaborator reached through a trait:
//! the document store ([`document_store::StoreConnection`]), the dose
//! computation service ([`ComputationService`]), the renderer ([`Renderer`])
//! and the status line ([`StatusSink`]). [`AppContext`] wires them together.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::PanelId,
    protocol::{DosePlan, NutrientProfile},
};
use tracing::info;

pub mod animation;
pub mod caches;
pub mod computation;
mod context;
pub mod error;
pub mod mirror;
pub mod registry;
pub mod transaction;
pub mod window;

pub use animation::{AnimationCue, FlowPhase, FrameTick};
pub use computation::HttpComputationService;
pub use context::{AppContext, Collaborators, CoreEvent};
pub use error::CoreError;
pub use transaction::{DoseReceipt, DoseRequest};
pub use window::Transition;

/// Panel and scene side of the UI. Calls are fire-and-forget.
pub trait Renderer: Send + Sync {
    fn show_panel(&self, id: &PanelId);
    fn hide_panel(&self, id: &PanelId);
    fn set_z_index(&self, id: &PanelId, z_index: i32);
    fn set_inspector_active(&self, id: &PanelId, active: bool);
    fn animation_cue(&self, cue: AnimationCue);
}

pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn show_panel(&self, _id: &PanelId) {}

    fn hide_panel(&self, _id: &PanelId) {}

    fn set_z_index(&self, _id: &PanelId, _z_index: i32) {}

    fn set_inspector_active(&self, _id: &PanelId, _active: bool) {}

    fn animation_cue(&self, _cue: AnimationCue) {}
}

/// User-facing status line. Must never block.
pub trait StatusSink: Send + Sync {
    fn report(&self, message: &str);
}

pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn report(&self, message: &str) {
        info!("status: {message}");
    }
}

#[async_trait]
pub trait ComputationService: Send + Sync {
    async fn compute_dose_plan(
        &self,
        profile: &NutrientProfile,
        volume_liters: f64,
    ) -> Result<DosePlan>;
}

pub struct MissingComputationService;

#[async_trait]
impl ComputationService for MissingComputationService {
    async fn compute_dose_plan(
        &self,
        profile: &NutrientProfile,
        _volume_liters: f64,
    ) -> Result<DosePlan> {
        Err(anyhow!(
            "dose computation service is unavailable for profile {}",
            profile.name
        ))
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
