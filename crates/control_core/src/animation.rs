//! Pump animation cues.
//!
//! The emitter only counts the frame ticks it is handed; the host's render
//! loop decides how often that is. A run ends when the two flow phases
//! complete or when [`PUMP_DURATION_UNITS`] of reported frame time have
//! passed, whichever comes first.

use std::sync::Arc;

use shared::domain::PanelId;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{registry::SIMULATOR_PANEL, window::WindowManager, Renderer};

pub const PUMP_DURATION_UNITS: f64 = 3.0;
pub const FLOW_STEP_PER_TICK: f64 = 0.02;

const FLOW_PHASES: f64 = 2.0;
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    /// Reservoir to pump.
    Intake,
    /// Pump to tank.
    Discharge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnimationCue {
    Start,
    Progress { phase: FlowPhase, progress: f64 },
    Stop,
}

/// One rendered frame; `elapsed` is the time since the previous frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    pub elapsed: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CueEmitter {
    pumping: bool,
    flow_progress: f64,
    elapsed: f64,
}

impl CueEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restarts the run even if one is already in progress.
    pub fn start(&mut self) -> AnimationCue {
        self.pumping = true;
        self.flow_progress = 0.0;
        self.elapsed = 0.0;
        AnimationCue::Start
    }

    pub fn tick(&mut self, tick: FrameTick) -> Option<AnimationCue> {
        if !self.pumping {
            return None;
        }
        if tick.elapsed.is_finite() && tick.elapsed > 0.0 {
            self.elapsed += tick.elapsed;
        }
        self.flow_progress += FLOW_STEP_PER_TICK;

        if self.flow_progress >= FLOW_PHASES - EPSILON
            || self.elapsed >= PUMP_DURATION_UNITS - EPSILON
        {
            *self = Self::default();
            return Some(AnimationCue::Stop);
        }

        let (phase, offset) = if self.flow_progress < 1.0 - EPSILON {
            (FlowPhase::Intake, 0.0)
        } else {
            (FlowPhase::Discharge, 1.0)
        };
        Some(AnimationCue::Progress {
            phase,
            progress: (self.flow_progress - offset).max(0.0),
        })
    }

    pub fn is_pumping(&self) -> bool {
        self.pumping
    }

    /// Position across both phases, in `[0, 2)`.
    pub fn flow_progress(&self) -> f64 {
        self.flow_progress
    }

    pub fn phase(&self) -> Option<FlowPhase> {
        if !self.pumping {
            None
        } else if self.flow_progress < 1.0 - EPSILON {
            Some(FlowPhase::Intake)
        } else {
            Some(FlowPhase::Discharge)
        }
    }
}

/// Routes emitter cues to the renderer. Flow cues are dropped while the
/// simulator panel is hidden; the stop cue always goes through.
pub struct PumpAnimation {
    emitter: Mutex<CueEmitter>,
    windows: Arc<Mutex<WindowManager>>,
    renderer: Arc<dyn Renderer>,
    scene: PanelId,
}

impl PumpAnimation {
    pub fn new(windows: Arc<Mutex<WindowManager>>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            emitter: Mutex::new(CueEmitter::new()),
            windows,
            renderer,
            scene: PanelId::new(SIMULATOR_PANEL),
        }
    }

    pub async fn start(&self) {
        let cue = self.emitter.lock().await.start();
        debug!("animation: pump started");
        self.forward(cue).await;
    }

    pub async fn frame_tick(&self, tick: FrameTick) -> Option<AnimationCue> {
        let cue = self.emitter.lock().await.tick(tick)?;
        if cue == AnimationCue::Stop {
            debug!("animation: pump stopped");
        }
        self.forward(cue).await;
        Some(cue)
    }

    pub async fn is_pumping(&self) -> bool {
        self.emitter.lock().await.is_pumping()
    }

    async fn forward(&self, cue: AnimationCue) {
        let visible = match cue {
            AnimationCue::Stop => true,
            _ => self.windows.lock().await.is_visible(&self.scene),
        };
        if visible {
            self.renderer.animation_cue(cue);
        }
    }
}

#[cfg(test)]
#[path = "tests/animation_tests.rs"]
mod tests;
