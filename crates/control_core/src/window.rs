//! Per-panel visibility, focus and stacking.
//!
//! Visibility and focus are tracked independently: a panel can be open and
//! unfocused, and at most one panel holds focus. Permanent panels never leave
//! the open state.

use std::{collections::HashMap, sync::Arc};

use shared::domain::{Panel, PanelId, PanelState, Visibility};
use tracing::{debug, warn};

use crate::{error::CoreError, registry::PanelRegistry, Renderer};

/// Shared by every panel that does not hold focus.
pub const BASE_Z_INDEX: i32 = 10;
pub const FOCUSED_Z_INDEX: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened,
    Focused,
    Closed,
}

pub struct WindowManager {
    registry: PanelRegistry,
    states: HashMap<PanelId, PanelState>,
    focused: Option<PanelId>,
    // Open panels, bottom to top.
    stack: Vec<PanelId>,
    renderer: Arc<dyn Renderer>,
}

impl WindowManager {
    pub fn new(registry: PanelRegistry, renderer: Arc<dyn Renderer>) -> Self {
        let mut states = HashMap::with_capacity(registry.len());
        let mut stack = Vec::new();
        for entry in registry.entries() {
            let open = entry.default_open || entry.panel.is_permanent();
            states.insert(
                entry.panel.id.clone(),
                PanelState {
                    visibility: if open {
                        Visibility::Open
                    } else {
                        Visibility::Closed
                    },
                    focused: false,
                    z_index: BASE_Z_INDEX,
                },
            );
            if open {
                stack.push(entry.panel.id.clone());
            }
        }

        Self {
            registry,
            states,
            focused: None,
            stack,
            renderer,
        }
    }

    pub fn registry(&self) -> &PanelRegistry {
        &self.registry
    }

    pub fn state(&self, id: &PanelId) -> Option<PanelState> {
        self.states.get(id).copied()
    }

    pub fn focused(&self) -> Option<&PanelId> {
        self.focused.as_ref()
    }

    pub fn is_visible(&self, id: &PanelId) -> bool {
        self.states.get(id).is_some_and(PanelState::is_open)
    }

    pub fn z_order(&self) -> &[PanelId] {
        &self.stack
    }

    /// Every panel with its current state, in catalog order.
    pub fn snapshot(&self) -> Vec<(Panel, PanelState)> {
        self.registry
            .panels()
            .filter_map(|panel| {
                self.states
                    .get(&panel.id)
                    .map(|state| (panel.clone(), *state))
            })
            .collect()
    }

    /// Pushes the whole current state to the renderer.
    pub fn sync_renderer(&self) {
        for (panel, state) in self.snapshot() {
            if state.is_open() {
                self.renderer.show_panel(&panel.id);
            } else {
                self.renderer.hide_panel(&panel.id);
            }
            self.renderer.set_z_index(&panel.id, state.z_index);
            self.renderer.set_inspector_active(&panel.id, state.is_open());
        }
    }

    pub fn open(&mut self, id: &PanelId) -> Result<Transition, CoreError> {
        let panel = self.lookup(id)?;
        if panel.is_permanent() {
            self.raise(id);
            return Ok(Transition::Focused);
        }

        if let Some(state) = self.states.get_mut(id) {
            state.visibility = Visibility::Open;
        }
        self.renderer.show_panel(id);
        self.renderer.set_inspector_active(id, true);
        self.raise(id);
        debug!("windows: opened panel={id}");
        Ok(Transition::Opened)
    }

    pub fn close(&mut self, id: &PanelId) -> Result<Transition, CoreError> {
        let panel = self.lookup(id)?;
        if panel.is_permanent() {
            self.raise(id);
            warn!("windows: refused to close permanent panel={id}");
            return Err(CoreError::CannotCloseFixedPanel(id.clone()));
        }

        let Some(state) = self.states.get_mut(id) else {
            return Err(CoreError::UnknownPanel(id.clone()));
        };
        if !state.is_open() {
            return Ok(Transition::Closed);
        }
        state.visibility = Visibility::Closed;
        state.focused = false;
        state.z_index = BASE_Z_INDEX;
        if self.focused.as_ref() == Some(id) {
            self.focused = None;
        }
        self.stack.retain(|open| open != id);

        self.renderer.hide_panel(id);
        self.renderer.set_z_index(id, BASE_Z_INDEX);
        self.renderer.set_inspector_active(id, false);
        debug!("windows: closed panel={id}");
        Ok(Transition::Closed)
    }

    /// Raises an open panel without toggling it; a closed panel is opened.
    pub fn focus(&mut self, id: &PanelId) -> Result<Transition, CoreError> {
        self.lookup(id)?;
        if self.is_visible(id) {
            self.raise(id);
            Ok(Transition::Focused)
        } else {
            self.open(id)
        }
    }

    /// `emphasize` marks a repeat activation of an open panel that should
    /// bring it forward instead of closing it.
    pub fn toggle(&mut self, id: &PanelId, emphasize: bool) -> Result<Transition, CoreError> {
        self.lookup(id)?;
        if !self.is_visible(id) {
            self.open(id)
        } else if emphasize {
            self.focus(id)
        } else {
            self.close(id)
        }
    }

    fn lookup(&self, id: &PanelId) -> Result<Panel, CoreError> {
        self.registry
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownPanel(id.clone()))
    }

    // Last caller wins the single focus slot.
    fn raise(&mut self, id: &PanelId) {
        for (other_id, state) in self.states.iter_mut() {
            if other_id != id && state.focused {
                state.focused = false;
                state.z_index = BASE_Z_INDEX;
                self.renderer.set_z_index(other_id, BASE_Z_INDEX);
            }
        }

        if let Some(state) = self.states.get_mut(id) {
            state.focused = true;
            state.z_index = FOCUSED_Z_INDEX;
        }
        self.focused = Some(id.clone());
        self.stack.retain(|open| open != id);
        self.stack.push(id.clone());
        self.renderer.set_z_index(id, FOCUSED_Z_INDEX);
    }
}

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
