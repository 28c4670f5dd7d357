use super::types::{ComponentState, ShutdownReason};
use crate::capture::{CvServiceClient, ImageRescaler, RouteCaptureOrchestrator};
use crate::config::{RescalerKind, TaubenConfig};
use crate::error::Result;
use crate::events::EventBus;
use crate::frames::{FfmpegLauncher, FrameSessionManager};
use crate::health::{HealthReconciler, PingProbe};
use crate::movement::{MovementCoordinator, MovementWaiters};
use crate::patrol::Patroller;
use crate::store::InMemoryDeviceStore;
use crate::telemetry::{BusTransportResolver, TelemetryBus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wires the fleet core together and owns its background tasks
pub struct FleetOrchestrator {
    pub(super) config: TaubenConfig,
    pub(super) event_bus: EventBus,
    pub(super) store: Arc<InMemoryDeviceStore>,

    // Components
    pub(super) telemetry: Arc<TelemetryBus>,
    pub(super) movement: Arc<MovementCoordinator>,
    pub(super) health: Arc<HealthReconciler>,
    pub(super) frames: Arc<FrameSessionManager>,
    pub(super) capture: Arc<RouteCaptureOrchestrator>,
    pub(super) patrol: Arc<Patroller>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl FleetOrchestrator {
    /// Build the orchestrator, loading devices from the configured fleet file
    pub fn new(config: TaubenConfig) -> Result<Self> {
        let fleet_path = config.fleet.path.clone();
        let store = if Path::new(&fleet_path).exists() {
            InMemoryDeviceStore::load_from_file(&fleet_path)?
        } else {
            warn!(
                "Fleet file {} not found, starting with an empty fleet",
                fleet_path
            );
            InMemoryDeviceStore::new()
        };

        Self::with_store(config, Arc::new(store))
    }

    /// Build the orchestrator around an existing store
    pub fn with_store(config: TaubenConfig, store: Arc<InMemoryDeviceStore>) -> Result<Self> {
        let event_bus = EventBus::new(config.system.event_bus_capacity);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        // Telemetry feeds movement completion
        let waiters = Arc::new(MovementWaiters::new());
        let telemetry = Arc::new(TelemetryBus::new(
            config.telemetry.clone(),
            config.cloud.clone(),
            waiters.clone(),
        ));

        let resolver = Arc::new(BusTransportResolver::new(
            Arc::clone(&telemetry),
            store.clone(),
        ));
        let movement = Arc::new(
            MovementCoordinator::new(
                resolver,
                waiters,
                telemetry.topics().clone(),
                config.movement.clone(),
            )
            .with_events(event_bus.clone()),
        );

        let health = Arc::new(HealthReconciler::new(
            store.clone(),
            Arc::new(PingProbe::new()),
            Arc::new(event_bus.clone()),
            config.monitor.clone(),
        ));

        let frames = Arc::new(
            FrameSessionManager::new(
                Arc::new(FfmpegLauncher::new(&config.frames)),
                config.frames.clone(),
            )
            .with_events(event_bus.clone()),
        );

        let cv_client = Arc::new(CvServiceClient::new(&config.cv_service)?);
        let rescaler = select_rescaler(config.capture.rescaler, &cv_client);
        let capture = Arc::new(
            RouteCaptureOrchestrator::new(
                Arc::clone(&movement),
                cv_client.clone(),
                rescaler.clone(),
                store.clone(),
            )
            .with_events(event_bus.clone()),
        );

        // The CV service grabs frames and finds birds in them
        let patrol = Arc::new(
            Patroller::new(
                store.clone(),
                Arc::clone(&movement),
                cv_client.clone(),
                rescaler,
                cv_client,
                config.patrol.clone(),
            )
            .with_events(event_bus.clone()),
        );

        info!(
            "Fleet core assembled with {} device(s)",
            store.device_count()
        );

        Ok(Self {
            config,
            event_bus,
            store,
            telemetry,
            movement,
            health,
            frames,
            capture,
            patrol,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(HashMap::new()),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }
}

fn select_rescaler(kind: RescalerKind, cv_client: &Arc<CvServiceClient>) -> Arc<dyn ImageRescaler> {
    match kind {
        RescalerKind::CvService => Arc::clone(cv_client) as Arc<dyn ImageRescaler>,
        #[cfg(feature = "local_zoom")]
        RescalerKind::Local => Arc::new(crate::capture::CenterCropRescaler::new()),
        #[cfg(not(feature = "local_zoom"))]
        RescalerKind::Local => {
            warn!("Local zoom requested but not compiled in, using the CV service");
            Arc::clone(cv_client) as Arc<dyn ImageRescaler>
        }
    }
}
