pub mod app;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod frames;
pub mod health;
pub mod movement;
pub mod patrol;
pub mod store;
pub mod telemetry;

#[cfg(feature = "http")]
pub mod http;

pub use app::{ComponentState, FleetOrchestrator, ShutdownReason};
pub use capture::{CapturedImage, CvServiceClient, RouteCaptureOrchestrator, RouteCaptureReport};
pub use config::TaubenConfig;
pub use device::{
    CameraSource, ComponentStatus, Device, MonitorMode, PatrolMode, RouteCoordinate, StatusAxis,
};
pub use error::{Result, TaubenError};
pub use events::{EventBus, FleetEvent, StatusNotifier};
pub use frames::{FfmpegLauncher, FrameSessionManager};
pub use health::{FleetSummary, HealthProbe, HealthReconciler, PingProbe};
pub use movement::{MovementCoordinator, MovementOutcome, MovementWaiters};
pub use patrol::{BirdDetector, DetectionReport, PatrolReport, Patroller};
pub use store::{DeviceStore, InMemoryDeviceStore};
pub use telemetry::{BusTransportResolver, DeviceCommand, TelemetryBus, TelemetryMessage, Topics};

#[cfg(feature = "http")]
pub use http::{ControlServer, ControlServerBuilder};
