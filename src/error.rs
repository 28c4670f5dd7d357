use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaubenError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Movement error: {0}")]
    Movement(#[from] MovementError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Patrol error: {0}")]
    Patrol(#[from] PatrolError),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl TaubenError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by the publish/subscribe transport
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to connect broker '{identity}': {details}")]
    Connect { identity: String, details: String },

    #[error("Broker connection '{identity}' is not connected")]
    NotConnected { identity: String },

    #[error("Failed to publish to '{topic}': {details}")]
    Publish { topic: String, details: String },

    #[error("Failed to subscribe to '{pattern}': {details}")]
    Subscribe { pattern: String, details: String },

    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("No broker settings available for owner {owner_id}")]
    MissingBrokerSettings { owner_id: String },

    #[error("Failed to read TLS material '{path}': {source}")]
    TlsMaterial {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while dispatching a movement or control command
#[derive(Error, Debug)]
pub enum MovementError {
    #[error("Device {device_id} has no actuator address")]
    MissingActuatorAddress { device_id: String },

    #[error("Failed to dispatch command to device {device_id}: {source}")]
    Dispatch {
        device_id: String,
        #[source]
        source: TelemetryError,
    },

    #[error("Owner lookup failed for device {device_id}: {source}")]
    OwnerLookup {
        device_id: String,
        #[source]
        source: StoreError,
    },
}

/// Errors raised by the live frame session manager
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Failed to start decoder for device {device_id}: {details}")]
    Spawn { device_id: String, details: String },

    #[error("Decoder for device {device_id} stopped: {details}")]
    DecoderStopped { device_id: String, details: String },

    #[error("Timed out after {waited_ms}ms waiting for a frame from device {device_id}")]
    Timeout { device_id: String, waited_ms: u64 },

    #[error("Frame session for device {device_id} was closed")]
    SessionClosed { device_id: String },
}

/// Errors raised by the route capture pipeline and its collaborators
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device {device_id} has no camera configured")]
    NoCamera { device_id: String },

    #[error("Device {device_id} has no usable stream URL")]
    NoStreamUrl { device_id: String },

    #[error("Frame grab failed: {details}")]
    Grab { details: String },

    #[error("Rescale failed: {details}")]
    Rescale { details: String },

    #[error("Detection failed: {details}")]
    Detect { details: String },

    #[error("Movement failed: {0}")]
    Movement(#[from] MovementError),

    #[error("Persisting capture failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised while patrolling one device
#[derive(Error, Debug)]
pub enum PatrolError {
    #[error("Patrol movement failed: {0}")]
    Movement(#[from] MovementError),

    #[error("Patrol analysis failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("Patrol bookkeeping failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the fleet event bus
#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

/// Errors raised by the device store collaborator
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Device {device_id} not found")]
    DeviceNotFound { device_id: String },

    #[error("Device {device_id} has no route coordinate at index {index}")]
    CoordinateOutOfRange { device_id: String, index: usize },

    #[error("Store backend error: {details}")]
    Backend { details: String },
}

/// Errors raised by the HTTP control surface
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server failed: {details}")]
    ServerFailed { details: String },

    #[error("HTTP server is missing {component}")]
    MissingComponent { component: String },
}

pub type Result<T> = std::result::Result<T, TaubenError>;
