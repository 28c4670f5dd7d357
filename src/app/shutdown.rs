use super::{ComponentState, FleetOrchestrator};
use crate::error::{Result, TaubenError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

const HTTP_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const PATROL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl FleetOrchestrator {
    /// Stop all components in reverse start order
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        self.cancellation_token.cancel();

        let mut exit_code = 0;

        if let Err(e) = self.stop_task("http", HTTP_STOP_TIMEOUT).await {
            error!("Error stopping http: {}", e);
            exit_code = 1;
        }

        if let Err(e) = self.stop_task("patrol", PATROL_STOP_TIMEOUT).await {
            error!("Error stopping patrol: {}", e);
            exit_code = 1;
        }

        self.set_component_state("frames", ComponentState::Stopping);
        self.frames.dispose_all();
        self.set_component_state("frames", ComponentState::Stopped);

        if let Err(e) = self.stop_task("health", HEALTH_STOP_TIMEOUT).await {
            error!("Error stopping health: {}", e);
            exit_code = 1;
        }

        self.set_component_state("telemetry", ComponentState::Stopping);
        if let Some(warm_up) = self.tasks.lock().remove("telemetry") {
            warm_up.abort();
        }
        self.telemetry.shutdown();
        self.set_component_state("telemetry", ComponentState::Stopped);

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Wait for a cancelled background task to finish
    async fn stop_task(&self, component: &str, limit: Duration) -> Result<()> {
        let handle = self.tasks.lock().remove(component);
        let Some(handle) = handle else {
            self.set_component_state(component, ComponentState::Stopped);
            return Ok(());
        };

        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping);

        let abort = handle.abort_handle();
        match timeout(limit, handle).await {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped);
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed);
                Err(TaubenError::component(
                    component.to_string(),
                    format!("task failed: {}", e),
                ))
            }
            Err(_) => {
                abort.abort();
                self.set_component_state(component, ComponentState::Failed);
                warn!("{} component stop timeout", component);
                Err(TaubenError::component(
                    component.to_string(),
                    format!("stop timed out after {}s", limit.as_secs()),
                ))
            }
        }
    }
}
