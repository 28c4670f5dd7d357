use super::bus::{CommandPublisher, TelemetryBus};
use super::message::Topics;
use crate::device::Device;
use crate::error::MovementError;
use crate::store::DeviceStore;
use async_trait::async_trait;
use rumqttc::QoS;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Transport picked for one device command
#[derive(Clone)]
pub enum ResolvedTransport {
    /// Owner broker; completion is observable through telemetry
    Local {
        address: String,
        publisher: Arc<dyn CommandPublisher>,
    },
    /// Cloud broker; no telemetry correlation
    Cloud {
        name: String,
        publisher: Arc<dyn CommandPublisher>,
    },
}

impl ResolvedTransport {
    pub fn command_topic(&self, topics: &Topics) -> String {
        match self {
            ResolvedTransport::Local { address, .. } => topics.command(address),
            ResolvedTransport::Cloud { name, .. } => topics.cloud_command(name),
        }
    }

    pub fn qos(&self) -> QoS {
        match self {
            ResolvedTransport::Local { .. } => QoS::AtMostOnce,
            ResolvedTransport::Cloud { .. } => QoS::AtLeastOnce,
        }
    }

    pub fn publisher(&self) -> &Arc<dyn CommandPublisher> {
        match self {
            ResolvedTransport::Local { publisher, .. } | ResolvedTransport::Cloud { publisher, .. } => {
                publisher
            }
        }
    }
}

impl fmt::Debug for ResolvedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedTransport::Local { address, .. } => {
                f.debug_struct("Local").field("address", address).finish()
            }
            ResolvedTransport::Cloud { name, .. } => {
                f.debug_struct("Cloud").field("name", name).finish()
            }
        }
    }
}

/// Chooses the transport a device's commands travel over
#[async_trait]
pub trait TransportResolver: Send + Sync {
    async fn resolve(&self, device: &Device) -> Result<ResolvedTransport, MovementError>;
}

/// Resolver backed by the broker registry and owner broker settings
pub struct BusTransportResolver {
    bus: Arc<TelemetryBus>,
    store: Arc<dyn DeviceStore>,
}

impl BusTransportResolver {
    pub fn new(bus: Arc<TelemetryBus>, store: Arc<dyn DeviceStore>) -> Self {
        Self { bus, store }
    }
}

#[async_trait]
impl TransportResolver for BusTransportResolver {
    async fn resolve(&self, device: &Device) -> Result<ResolvedTransport, MovementError> {
        let cloud_name = device
            .cloud_name
            .as_deref()
            .filter(|name| !name.is_empty());

        if let (true, Some(name)) = (self.bus.cloud_enabled(), cloud_name) {
            match self.bus.cloud_connection().await {
                Ok(connection) => {
                    debug!("Using cloud transport for device {}", device.id);
                    return Ok(ResolvedTransport::Cloud {
                        name: name.to_string(),
                        publisher: connection,
                    });
                }
                Err(e) => warn!(
                    "Cloud transport unavailable for device {}, using local broker: {}",
                    device.id, e
                ),
            }
        }

        let address = device
            .actuator_address()
            .ok_or_else(|| MovementError::MissingActuatorAddress {
                device_id: device.id.clone(),
            })?
            .to_string();

        let broker = self
            .store
            .broker_settings(&device.owner)
            .await
            .map_err(|source| MovementError::OwnerLookup {
                device_id: device.id.clone(),
                source,
            })?;

        let connection = self
            .bus
            .local_connection(&device.owner, broker)
            .await
            .map_err(|source| MovementError::Dispatch {
                device_id: device.id.clone(),
                source,
            })?;

        Ok(ResolvedTransport::Local {
            address,
            publisher: connection,
        })
    }
}
