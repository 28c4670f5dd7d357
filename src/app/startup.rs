use super::types::COMPONENTS;
use super::{ComponentState, FleetOrchestrator};
use crate::error::Result;
use crate::events::FleetEvent;
use crate::store::DeviceStore;
use std::sync::Arc;
use tracing::{error, info, warn};

impl FleetOrchestrator {
    /// Register every component as stopped
    pub fn initialize(&self) -> Result<()> {
        info!("Initializing fleet core components");

        for component in COMPONENTS {
            self.set_component_state(component, ComponentState::Stopped);
        }

        Ok(())
    }

    /// Start background work: broker connections, health and patrol loops, HTTP server
    pub async fn start(&self) -> Result<()> {
        info!("Starting fleet core");

        self.start_telemetry();
        self.start_health();

        // Frame sessions are created on demand
        self.set_component_state("frames", ComponentState::Running);

        self.start_patrol();

        #[cfg(feature = "http")]
        self.start_http()?;

        info!("Fleet core started successfully");
        Ok(())
    }

    /// Connect each owner's broker ahead of the first command
    fn start_telemetry(&self) {
        self.set_component_state("telemetry", ComponentState::Starting);

        let owners = self.store.active_owners();
        let store = Arc::clone(&self.store);
        let telemetry = Arc::clone(&self.telemetry);
        let events = self.event_bus.clone();
        let cancel = self.cancellation_token.child_token();

        let handle = tokio::spawn(async move {
            if telemetry.cloud_enabled() {
                if let Err(e) = telemetry.cloud_connection().await {
                    warn!("Cloud broker unavailable at startup: {}", e);
                }
            }

            for owner in owners {
                if cancel.is_cancelled() {
                    break;
                }

                let broker = match store.broker_settings(&owner).await {
                    Ok(broker) => broker,
                    Err(e) => {
                        error!("Failed to load broker settings for owner {}: {}", owner, e);
                        continue;
                    }
                };

                if let Err(e) = telemetry.local_connection(&owner, broker).await {
                    warn!("Broker for owner {} unavailable at startup: {}", owner, e);
                    let _ = events.publish(FleetEvent::SystemError {
                        component: "telemetry".to_string(),
                        error: e.to_string(),
                    });
                }
            }

            info!(
                "Telemetry warm-up finished with {} broker connection(s)",
                telemetry.connection_count()
            );
        });

        self.tasks.lock().insert("telemetry".to_string(), handle);
        self.set_component_state("telemetry", ComponentState::Running);
    }

    fn start_health(&self) {
        if !self.config.monitor.enabled {
            info!("Health monitoring disabled");
            return;
        }

        self.set_component_state("health", ComponentState::Starting);

        let health = Arc::clone(&self.health);
        let cancel = self.cancellation_token.child_token();
        let handle = tokio::spawn(async move {
            health.run(cancel).await;
        });

        self.tasks.lock().insert("health".to_string(), handle);
        self.set_component_state("health", ComponentState::Running);
        info!(
            "Health monitoring started every {}s",
            self.config.monitor.interval_seconds
        );
    }

    fn start_patrol(&self) {
        if !self.config.patrol.enabled {
            info!("Patrol disabled");
            return;
        }

        self.set_component_state("patrol", ComponentState::Starting);

        let patrol = Arc::clone(&self.patrol);
        let cancel = self.cancellation_token.child_token();
        let handle = tokio::spawn(async move {
            patrol.run(cancel).await;
        });

        self.tasks.lock().insert("patrol".to_string(), handle);
        self.set_component_state("patrol", ComponentState::Running);
    }

    #[cfg(feature = "http")]
    fn start_http(&self) -> Result<()> {
        use crate::http::ControlServerBuilder;

        if !self.config.http.enabled {
            info!("HTTP control surface disabled");
            return Ok(());
        }

        self.set_component_state("http", ComponentState::Starting);

        let server = ControlServerBuilder::new()
            .config(self.config.http.clone())
            .store(self.store.clone())
            .health(Arc::clone(&self.health))
            .movement(Arc::clone(&self.movement))
            .frames(Arc::clone(&self.frames))
            .capture(Arc::clone(&self.capture))
            .patrol(Arc::clone(&self.patrol))
            .build()?;

        let cancel = self.cancellation_token.child_token();
        let events = self.event_bus.clone();
        let states = Arc::clone(&self.component_states);
        let handle = tokio::spawn(async move {
            if let Err(e) = server.start(cancel).await {
                error!("Control server error: {}", e);
                states
                    .lock()
                    .insert("http".to_string(), ComponentState::Failed);
                let _ = events.publish(FleetEvent::SystemError {
                    component: "http".to_string(),
                    error: e.to_string(),
                });
            }
        });

        self.tasks.lock().insert("http".to_string(), handle);
        self.set_component_state("http", ComponentState::Running);
        Ok(())
    }
}
