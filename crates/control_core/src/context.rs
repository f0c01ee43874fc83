use std::{sync::Arc, time::Duration};

use document_store::{CollectionPath, MissingStoreConnection, MutateOptions, StoreConnection};
use shared::{
    domain::{DocumentId, Panel, PanelId, PanelState},
    protocol::{DosePlan, NutrientProfile},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    animation::{AnimationCue, FrameTick, PumpAnimation},
    caches::{HistoryCache, HistoryView, InventoryCache, InventoryView, ProfileCache, ProfileView},
    error::CoreError,
    mirror::{CollectionView, RemoteMirror},
    registry::PanelRegistry,
    transaction::{DoseReceipt, DoseRequest, DosingCoordinator},
    window::{Transition, WindowManager},
    ComputationService, MissingComputationService, NullRenderer, Renderer, StatusSink,
    TracingStatusSink,
};

const EVENT_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub enum CoreEvent {
    ProfilesUpdated(Arc<ProfileView>),
    InventoryUpdated(Arc<InventoryView>),
    HistoryUpdated(Arc<HistoryView>),
    PanelsChanged { focused: Option<PanelId> },
    DoseCommitted(DoseReceipt),
    DoseFailed(String),
    Status(String),
}

pub struct Collaborators {
    pub store: Arc<dyn StoreConnection>,
    pub computation: Arc<dyn ComputationService>,
    pub renderer: Arc<dyn Renderer>,
    pub status: Arc<dyn StatusSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            store: Arc::new(MissingStoreConnection),
            computation: Arc::new(MissingComputationService),
            renderer: Arc::new(NullRenderer),
            status: Arc::new(TracingStatusSink),
        }
    }
}

/// Status sink that also publishes each message as a [`CoreEvent::Status`].
struct EventStatusSink {
    inner: Arc<dyn StatusSink>,
    events: broadcast::Sender<CoreEvent>,
}

impl StatusSink for EventStatusSink {
    fn report(&self, message: &str) {
        self.inner.report(message);
        let _ = self.events.send(CoreEvent::Status(message.to_string()));
    }
}

/// The application's single entry point: panels, live caches and dose commits.
pub struct AppContext {
    store: Arc<dyn StoreConnection>,
    computation: Arc<dyn ComputationService>,
    status: Arc<dyn StatusSink>,
    windows: Arc<Mutex<WindowManager>>,
    profiles: Arc<ProfileCache>,
    inventory: Arc<InventoryCache>,
    history: Arc<HistoryCache>,
    animation: Arc<PumpAnimation>,
    coordinator: DosingCoordinator,
    events: broadcast::Sender<CoreEvent>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl AppContext {
    pub fn new(collaborators: Collaborators) -> Self {
        Self::with_registry(collaborators, PanelRegistry::standard())
    }

    pub fn with_registry(collaborators: Collaborators, registry: PanelRegistry) -> Self {
        let Collaborators {
            store,
            computation,
            renderer,
            status,
        } = collaborators;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let status: Arc<dyn StatusSink> = Arc::new(EventStatusSink {
            inner: status,
            events: events.clone(),
        });

        let windows = Arc::new(Mutex::new(WindowManager::new(registry, renderer.clone())));
        let profiles = RemoteMirror::new(store.clone(), status.clone());
        let inventory = RemoteMirror::new(store.clone(), status.clone());
        let history = RemoteMirror::new(store.clone(), status.clone());
        let animation = Arc::new(PumpAnimation::new(windows.clone(), renderer));
        let coordinator = DosingCoordinator::new(
            store.clone(),
            profiles.clone(),
            inventory.clone(),
            animation.clone(),
        );

        Self {
            store,
            computation,
            status,
            windows,
            profiles,
            inventory,
            history,
            animation,
            coordinator,
            events,
            forwarders: Mutex::new(Vec::new()),
        }
    }

    /// Pushes the initial panel layout to the renderer and opens the three
    /// collection subscriptions.
    pub async fn start(&self) {
        self.windows.lock().await.sync_renderer();

        {
            let mut forwarders = self.forwarders.lock().await;
            forwarders.push(forward_updates(
                &self.profiles,
                &self.events,
                CoreEvent::ProfilesUpdated,
            ));
            forwarders.push(forward_updates(
                &self.inventory,
                &self.events,
                CoreEvent::InventoryUpdated,
            ));
            forwarders.push(forward_updates(
                &self.history,
                &self.events,
                CoreEvent::HistoryUpdated,
            ));
        }

        self.profiles.start().await;
        self.inventory.start().await;
        self.history.start().await;
        info!("core: started");
    }

    pub async fn shutdown(&self) {
        self.profiles.stop().await;
        self.inventory.stop().await;
        self.history.stop().await;
        for task in self.forwarders.lock().await.drain(..) {
            task.abort();
        }
        info!("core: stopped");
    }

    /// Waits for every cache to settle; false if any did not in time.
    pub async fn wait_until_loaded(&self, timeout: Duration) -> bool {
        let (profiles, inventory, history) = tokio::join!(
            self.profiles.wait_until_loaded(timeout),
            self.inventory.wait_until_loaded(timeout),
            self.history.wait_until_loaded(timeout),
        );
        profiles && inventory && history
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn profiles(&self) -> &Arc<ProfileCache> {
        &self.profiles
    }

    pub fn inventory(&self) -> &Arc<InventoryCache> {
        &self.inventory
    }

    pub fn history(&self) -> &Arc<HistoryCache> {
        &self.history
    }

    pub async fn open_panel(&self, id: &PanelId) -> Result<Transition, CoreError> {
        self.panel_op("open", id, WindowManager::open).await
    }

    pub async fn close_panel(&self, id: &PanelId) -> Result<Transition, CoreError> {
        self.panel_op("close", id, WindowManager::close).await
    }

    pub async fn focus_panel(&self, id: &PanelId) -> Result<Transition, CoreError> {
        self.panel_op("focus", id, WindowManager::focus).await
    }

    pub async fn toggle_panel(
        &self,
        id: &PanelId,
        emphasize: bool,
    ) -> Result<Transition, CoreError> {
        self.panel_op("toggle", id, |windows, id| windows.toggle(id, emphasize))
            .await
    }

    pub async fn panel_states(&self) -> Vec<(Panel, PanelState)> {
        self.windows.lock().await.snapshot()
    }

    async fn panel_op<F>(
        &self,
        action: &str,
        id: &PanelId,
        op: F,
    ) -> Result<Transition, CoreError>
    where
        F: FnOnce(&mut WindowManager, &PanelId) -> Result<Transition, CoreError>,
    {
        let (result, focused) = {
            let mut windows = self.windows.lock().await;
            let result = op(&mut windows, id);
            (result, windows.focused().cloned())
        };

        match &result {
            Ok(transition) => debug!("core: panel {action} id={id} transition={transition:?}"),
            Err(err) => {
                warn!("core: panel {action} failed id={id} error={err}");
                self.status.report(&err.to_string());
            }
        }
        if !matches!(result, Err(CoreError::UnknownPanel(_))) {
            let _ = self.events.send(CoreEvent::PanelsChanged { focused });
        }
        result
    }

    pub async fn save_profile(&self, profile: NutrientProfile) -> Result<(), CoreError> {
        validate_profile(&profile)?;
        let data = serde_json::to_value(&profile)
            .map_err(|err| CoreError::InvalidProfile(err.to_string()))?;
        self.store
            .mutate(
                &CollectionPath::profiles(),
                Some(&DocumentId::new(profile.name.clone())),
                data,
                MutateOptions::replace(),
            )
            .await?;
        info!("core: saved profile name={}", profile.name);
        self.status.report(&format!("profile {} saved", profile.name));
        Ok(())
    }

    pub async fn delete_profile(&self, name: &str) -> Result<(), CoreError> {
        if self.profiles.view().await.get(name).is_none() {
            let err = CoreError::InvalidProfile(format!("no profile named {name:?}"));
            self.status.report(&err.to_string());
            return Err(err);
        }
        self.store
            .delete(&CollectionPath::profiles(), &DocumentId::new(name))
            .await?;
        info!("core: deleted profile name={name}");
        self.status.report(&format!("profile {name} deleted"));
        Ok(())
    }

    pub async fn compute_dose_plan(
        &self,
        profile_name: &str,
        volume_liters: f64,
    ) -> Result<DosePlan, CoreError> {
        if !volume_liters.is_finite() || volume_liters <= 0.0 {
            return Err(CoreError::InvalidDoseRequest(format!(
                "volume must be a positive number of liters, got {volume_liters}"
            )));
        }
        let profile = self
            .profiles
            .view()
            .await
            .get(profile_name)
            .cloned()
            .ok_or_else(|| {
                CoreError::InvalidDoseRequest(format!("unknown profile {profile_name:?}"))
            })?;

        self.computation
            .compute_dose_plan(&profile, volume_liters)
            .await
            .map_err(|err| {
                warn!("core: dose computation failed profile={profile_name} error={err:#}");
                CoreError::Computation(format!("{err:#}"))
            })
    }

    pub async fn commit_dose(&self, request: DoseRequest) -> Result<DoseReceipt, CoreError> {
        match self.coordinator.commit(request).await {
            Ok(receipt) => {
                self.status.report(&format!(
                    "dose for {} ({} L) committed",
                    receipt.entry.profile_name, receipt.entry.volume_liters
                ));
                let _ = self.events.send(CoreEvent::DoseCommitted(receipt.clone()));
                Ok(receipt)
            }
            Err(err) => {
                self.status.report(&err.to_string());
                let _ = self.events.send(CoreEvent::DoseFailed(err.to_string()));
                Err(err)
            }
        }
    }

    pub async fn compute_and_commit(
        &self,
        profile_name: &str,
        volume_liters: f64,
    ) -> Result<DoseReceipt, CoreError> {
        let plan = self.compute_dose_plan(profile_name, volume_liters).await?;
        self.commit_dose(DoseRequest {
            profile_name: profile_name.to_string(),
            volume_liters,
            plan,
        })
        .await
    }

    /// Called by the host once per rendered frame.
    pub async fn frame_tick(&self, tick: FrameTick) -> Option<AnimationCue> {
        self.animation.frame_tick(tick).await
    }

    pub async fn is_pumping(&self) -> bool {
        self.animation.is_pumping().await
    }
}

fn forward_updates<V: CollectionView>(
    mirror: &Arc<RemoteMirror<V>>,
    events: &broadcast::Sender<CoreEvent>,
    wrap: fn(Arc<V>) -> CoreEvent,
) -> JoinHandle<()> {
    let mut updates = mirror.subscribe();
    let events = events.clone();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(view) => {
                    let _ = events.send(wrap(view));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("core: view forwarder lagged skipped={skipped}");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn validate_profile(profile: &NutrientProfile) -> Result<(), CoreError> {
    if profile.name.trim().is_empty() {
        return Err(CoreError::InvalidProfile("name is empty".to_string()));
    }
    let quantities = [
        ("N", Some(profile.n)),
        ("P", Some(profile.p)),
        ("K", Some(profile.k)),
        ("EC", Some(profile.ec)),
        ("pH", Some(profile.ph)),
        ("Ca", profile.ca),
        ("Mg", profile.mg),
    ];
    for (label, value) in quantities {
        if let Some(value) = value {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::InvalidProfile(format!(
                    "{label} must be a non-negative number, got {value}"
                )));
            }
        }
    }
    if profile.ph > 14.0 {
        return Err(CoreError::InvalidProfile(format!(
            "pH must be at most 14, got {}",
            profile.ph
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/context_tests.rs"]
mod tests;
