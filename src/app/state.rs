use super::{ComponentState, FleetOrchestrator};
use crate::capture::RouteCaptureOrchestrator;
use crate::config::TaubenConfig;
use crate::events::EventBus;
use crate::frames::FrameSessionManager;
use crate::health::HealthReconciler;
use crate::movement::MovementCoordinator;
use crate::patrol::Patroller;
use crate::store::InMemoryDeviceStore;
use crate::telemetry::TelemetryBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

impl FleetOrchestrator {
    pub fn set_component_state(&self, component: &str, state: ComponentState) {
        let previous = self
            .component_states
            .lock()
            .insert(component.to_string(), state);
        if previous != Some(state) {
            debug!("Component '{}' state changed to: {:?}", component, state);
        }
    }

    pub fn component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().get(component).copied()
    }

    pub fn component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.lock().clone()
    }

    pub fn config(&self) -> &TaubenConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn store(&self) -> &Arc<InMemoryDeviceStore> {
        &self.store
    }

    pub fn telemetry(&self) -> &Arc<TelemetryBus> {
        &self.telemetry
    }

    pub fn movement(&self) -> &Arc<MovementCoordinator> {
        &self.movement
    }

    pub fn health(&self) -> &Arc<HealthReconciler> {
        &self.health
    }

    pub fn frames(&self) -> &Arc<FrameSessionManager> {
        &self.frames
    }

    pub fn capture(&self) -> &Arc<RouteCaptureOrchestrator> {
        &self.capture
    }

    pub fn patrol(&self) -> &Arc<Patroller> {
        &self.patrol
    }
}
