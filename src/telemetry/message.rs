use crate::error::TelemetryError;
use serde::{Deserialize, Serialize};

/// Topic layout shared by the local and cloud brokers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Local command topic, `device/<ip>`
    pub fn command(&self, address: &str) -> String {
        format!("{}/{}", self.prefix, address)
    }

    /// Per-device telemetry topic, `device/<ip>/info`
    pub fn info(&self, address: &str) -> String {
        format!("{}/{}/info", self.prefix, address)
    }

    /// Shared telemetry topic whose payload carries the device `ip`
    pub fn shared_info(&self) -> String {
        format!("{}/info", self.prefix)
    }

    pub fn info_pattern(&self) -> String {
        format!("{}/+/info", self.prefix)
    }

    /// Cloud command topic, `device/<name>/commands`
    pub fn cloud_command(&self, name: &str) -> String {
        format!("{}/{}/commands", self.prefix, name)
    }

    /// Device address encoded in an info topic, if the topic is per-device
    pub fn address_from_info(&self, topic: &str) -> Option<String> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        let address = rest.strip_suffix("/info")?;
        if address.is_empty() || address.contains('/') {
            None
        } else {
            Some(address.to_string())
        }
    }
}

/// MQTT topic filter matching with `+` and `#` wildcards
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut filter = pattern.split('/');
    let mut levels = topic.split('/');

    loop {
        match (filter.next(), levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(level)) if expected == level => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub rot: i32,
    pub tilt: i32,
}

/// Command bodies understood by the actuator firmware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceCommand {
    Move { position: Position, speed: i32 },
    Impulse {
        speed: i32,
        bounce: i32,
        position: Position,
    },
    Shoot { duration: u32 },
    Reset,
}

impl DeviceCommand {
    /// Absolute positioning command; angles are truncated toward zero
    pub fn move_to(rotation: f64, tilt: f64, speed: i32) -> Self {
        DeviceCommand::Move {
            position: Position {
                rot: rotation.trunc() as i32,
                tilt: tilt.trunc() as i32,
            },
            speed,
        }
    }

    /// Relative movement by whole degrees, without bouncing back
    pub fn impulse(rotation: i32, tilt: i32, speed: i32) -> Self {
        DeviceCommand::Impulse {
            speed,
            bounce: 0,
            position: Position {
                rot: rotation,
                tilt,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeviceCommand::Move { .. } => "move",
            DeviceCommand::Impulse { .. } => "impulse",
            DeviceCommand::Shoot { .. } => "shoot",
            DeviceCommand::Reset => "reset",
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, TelemetryError> {
        Ok(serde_json::to_vec(self)?)
    }
}

const IMPULSE_STEP: i32 = 10;
const SHOOT_DURATION_MS: u32 = 500;

/// Operator control actions exposed over the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    RotateLeft,
    RotateRight,
    MoveUp,
    MoveDown,
    Shoot,
    Reset,
}

impl ControlAction {
    pub const ALL: [ControlAction; 6] = [
        ControlAction::RotateLeft,
        ControlAction::RotateRight,
        ControlAction::MoveUp,
        ControlAction::MoveDown,
        ControlAction::Shoot,
        ControlAction::Reset,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == value)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::RotateLeft => "rotate_left",
            ControlAction::RotateRight => "rotate_right",
            ControlAction::MoveUp => "move_up",
            ControlAction::MoveDown => "move_down",
            ControlAction::Shoot => "shoot",
            ControlAction::Reset => "reset",
        }
    }

    pub fn command(&self) -> DeviceCommand {
        let impulse = |rot, tilt| DeviceCommand::impulse(rot, tilt, 1);

        match self {
            ControlAction::RotateLeft => impulse(-IMPULSE_STEP, 0),
            ControlAction::RotateRight => impulse(IMPULSE_STEP, 0),
            ControlAction::MoveUp => impulse(0, IMPULSE_STEP),
            ControlAction::MoveDown => impulse(0, -IMPULSE_STEP),
            ControlAction::Shoot => DeviceCommand::Shoot {
                duration: SHOOT_DURATION_MS,
            },
            ControlAction::Reset => DeviceCommand::Reset,
        }
    }
}

/// Decoded motion telemetry from an actuator
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    pub address: String,
    pub moving: bool,
    pub rotation: Option<f64>,
    pub tilt: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawTelemetry {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    moving: Option<bool>,
    #[serde(default, alias = "Rot", alias = "rot")]
    rotation: Option<f64>,
    #[serde(default, alias = "Tilt")]
    tilt: Option<f64>,
}

impl TelemetryMessage {
    pub fn new<S: Into<String>>(address: S, moving: bool) -> Self {
        Self {
            address: address.into(),
            moving,
            rotation: None,
            tilt: None,
        }
    }

    /// Decode an inbound publish on one of the info topics.
    ///
    /// Per-device topics carry the address in the topic; on the shared topic
    /// it comes from the payload's `ip` field. A missing `moving` flag reads
    /// as stopped.
    pub fn from_publish(topics: &Topics, topic: &str, payload: &[u8]) -> Option<Self> {
        let raw: RawTelemetry = serde_json::from_slice(payload).ok()?;

        let address = topics
            .address_from_info(topic)
            .or(raw.ip)
            .filter(|address| !address.is_empty())?;

        Some(Self {
            address,
            moving: raw.moving.unwrap_or(false),
            rotation: raw.rotation,
            tilt: raw.tilt,
        })
    }
}
