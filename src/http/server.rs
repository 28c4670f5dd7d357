use crate::{
    capture::RouteCaptureOrchestrator,
    config::HttpConfig,
    error::{HttpError, Result},
    frames::FrameSessionManager,
    health::HealthReconciler,
    movement::MovementCoordinator,
    patrol::Patroller,
    store::DeviceStore,
};
use axum::{
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use super::handlers::{
    capture_handler, check_device_handler, control_handler, fleet_summary_handler, frame_handler,
    health_handler, pause_monitor_handler, set_status_handler, start_monitor_handler,
};

/// Shared state for the Axum router
#[derive(Clone)]
pub struct ApiState {
    pub(crate) store: Arc<dyn DeviceStore>,
    pub(crate) health: Arc<HealthReconciler>,
    pub(crate) movement: Arc<MovementCoordinator>,
    pub(crate) frames: Arc<FrameSessionManager>,
    pub(crate) capture: Arc<RouteCaptureOrchestrator>,
    pub(crate) patrol: Arc<Patroller>,
    pub(crate) started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        health: Arc<HealthReconciler>,
        movement: Arc<MovementCoordinator>,
        frames: Arc<FrameSessionManager>,
        capture: Arc<RouteCaptureOrchestrator>,
        patrol: Arc<Patroller>,
    ) -> Self {
        Self {
            store,
            health,
            movement,
            frames,
            capture,
            patrol,
            started_at: Utc::now(),
        }
    }
}

/// Every control route, with permissive CORS for the dashboard
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/fleet/summary", get(fleet_summary_handler))
        .route("/devices/:id/check", post(check_device_handler))
        .route("/devices/:id/status/:axis", put(set_status_handler))
        .route("/devices/:id/frame", get(frame_handler))
        .route("/devices/:id/control/:action", post(control_handler))
        .route("/devices/:id/route/:index/capture", post(capture_handler))
        .route("/devices/:id/monitor/start", post(start_monitor_handler))
        .route("/devices/:id/monitor/pause", post(pause_monitor_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP server exposing health, frames, control and capture
pub struct ControlServer {
    pub(crate) config: HttpConfig,
    pub(crate) state: ApiState,
}

impl ControlServer {
    pub fn new(config: HttpConfig, state: ApiState) -> Self {
        Self { config, state }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    /// Serve until `shutdown` is cancelled
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let app = router(self.state.clone());
        let addr = self.address();

        info!("Starting control server on {}", addr);

        let listener =
            tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| HttpError::BindFailed {
                    address: addr.clone(),
                    source: e,
                })?;

        info!("Control server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| HttpError::ServerFailed {
                details: format!("Server error: {}", e),
            })?;

        info!("Control server on {} stopped", addr);
        Ok(())
    }
}

/// Control server builder
#[derive(Default)]
pub struct ControlServerBuilder {
    config: Option<HttpConfig>,
    store: Option<Arc<dyn DeviceStore>>,
    health: Option<Arc<HealthReconciler>>,
    movement: Option<Arc<MovementCoordinator>>,
    frames: Option<Arc<FrameSessionManager>>,
    capture: Option<Arc<RouteCaptureOrchestrator>>,
    patrol: Option<Arc<Patroller>>,
}

impl ControlServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: HttpConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn store(mut self, store: Arc<dyn DeviceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn health(mut self, health: Arc<HealthReconciler>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn movement(mut self, movement: Arc<MovementCoordinator>) -> Self {
        self.movement = Some(movement);
        self
    }

    pub fn frames(mut self, frames: Arc<FrameSessionManager>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn capture(mut self, capture: Arc<RouteCaptureOrchestrator>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn patrol(mut self, patrol: Arc<Patroller>) -> Self {
        self.patrol = Some(patrol);
        self
    }

    pub fn build(self) -> Result<ControlServer> {
        let config = self.config.ok_or_else(|| missing("HTTP configuration"))?;
        let store = self.store.ok_or_else(|| missing("device store"))?;
        let health = self.health.ok_or_else(|| missing("health reconciler"))?;
        let movement = self.movement.ok_or_else(|| missing("movement coordinator"))?;
        let frames = self.frames.ok_or_else(|| missing("frame session manager"))?;
        let capture = self.capture.ok_or_else(|| missing("route capture orchestrator"))?;
        let patrol = self.patrol.ok_or_else(|| missing("patroller"))?;

        Ok(ControlServer::new(
            config,
            ApiState::new(store, health, movement, frames, capture, patrol),
        ))
    }
}

fn missing(component: &str) -> HttpError {
    HttpError::MissingComponent {
        component: component.to_string(),
    }
}
