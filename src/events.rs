use crate::device::{ComponentStatus, Device, StatusChangeEvent};
use crate::error::EventBusError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Events published by the fleet core for the real-time notification layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FleetEvent {
    /// One component axis of a device changed status
    StatusChanged(StatusChangeEvent),
    /// A device record was updated by the core
    DeviceUpdated {
        device_id: String,
        status: ComponentStatus,
        timestamp: DateTime<Utc>,
    },
    /// A positioning command finished (confirmed, timed out or settled)
    MovementCompleted {
        device_id: String,
        outcome: String,
        elapsed_ms: u64,
    },
    /// A decode pipeline was started for a device
    FrameSessionStarted { device_id: String },
    /// A decode pipeline was torn down
    FrameSessionRetired { device_id: String, reason: String },
    /// A route coordinate received a fresh image
    RouteImageCaptured {
        device_id: String,
        index: usize,
        timestamp: DateTime<Utc>,
    },
    /// The patrol found birds in front of a device
    BirdsDetected {
        device_id: String,
        bird_count: usize,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },
    /// A device was triggered, aimed at a target or not
    ShotFired { device_id: String, aimed: bool },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
}

impl FleetEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            FleetEvent::StatusChanged(change) => format!(
                "Device {} {} is now {}",
                change.device_id, change.component, change.status
            ),
            FleetEvent::DeviceUpdated {
                device_id, status, ..
            } => format!("Device {} updated ({})", device_id, status),
            FleetEvent::MovementCompleted {
                device_id,
                outcome,
                elapsed_ms,
            } => format!(
                "Movement of {} finished: {} after {}ms",
                device_id, outcome, elapsed_ms
            ),
            FleetEvent::FrameSessionStarted { device_id } => {
                format!("Frame session started for {}", device_id)
            }
            FleetEvent::FrameSessionRetired { device_id, reason } => {
                format!("Frame session for {} retired: {}", device_id, reason)
            }
            FleetEvent::RouteImageCaptured {
                device_id, index, ..
            } => format!("Route image {} captured for {}", index, device_id),
            FleetEvent::BirdsDetected {
                device_id,
                bird_count,
                confidence,
                ..
            } => format!(
                "{} bird(s) detected by {} (confidence {:.2})",
                bird_count, device_id, confidence
            ),
            FleetEvent::ShotFired { device_id, aimed } => format!(
                "Device {} fired {}",
                device_id,
                if *aimed { "at a target" } else { "without aiming" }
            ),
            FleetEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            FleetEvent::StatusChanged(_) => "status_changed",
            FleetEvent::DeviceUpdated { .. } => "device_updated",
            FleetEvent::MovementCompleted { .. } => "movement_completed",
            FleetEvent::FrameSessionStarted { .. } => "frame_session_started",
            FleetEvent::FrameSessionRetired { .. } => "frame_session_retired",
            FleetEvent::RouteImageCaptured { .. } => "route_image_captured",
            FleetEvent::BirdsDetected { .. } => "birds_detected",
            FleetEvent::ShotFired { .. } => "shot_fired",
            FleetEvent::SystemError { .. } => "system_error",
        }
    }
}

/// Sink for status notifications produced by the core
pub trait StatusNotifier: Send + Sync {
    fn notify_status_change(&self, event: &StatusChangeEvent);
    fn notify_device_updated(&self, device: &Device);
}

/// Broadcast event bus feeding the notification layer
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Fails only when nobody is subscribed; callers treat events as
    /// fire-and-forget and may ignore that.
    pub fn publish(&self, event: FleetEvent) -> Result<usize, EventBusError> {
        match &event {
            FleetEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            _ => debug!(event = event.event_type(), "{}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }
}

impl StatusNotifier for EventBus {
    fn notify_status_change(&self, event: &StatusChangeEvent) {
        let _ = self.publish(FleetEvent::StatusChanged(event.clone()));
    }

    fn notify_device_updated(&self, device: &Device) {
        let _ = self.publish(FleetEvent::DeviceUpdated {
            device_id: device.id.clone(),
            status: device.status,
            timestamp: Utc::now(),
        });
    }
}
