//! Publish/subscribe transport to the device fleet.
//!
//! Local owner brokers carry commands on `device/<ip>` and telemetry on
//! `device/<ip>/info`; the cloud broker only carries commands on
//! `device/<name>/commands`.

mod bus;
mod message;
mod transport;

#[cfg(test)]
mod tests;

pub use bus::{
    BrokerCredentials, CommandPublisher, InfoTopicHandler, Subscription, TelemetryBus,
    TelemetryConnection, TelemetrySink, TlsFiles, TopicHandler, CLOUD_IDENTITY,
};
pub use message::{
    topic_matches, ControlAction, DeviceCommand, Position, TelemetryMessage, Topics,
};
pub use rumqttc::QoS;
pub use transport::{BusTransportResolver, ResolvedTransport, TransportResolver};
