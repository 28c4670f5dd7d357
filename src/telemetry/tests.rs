use super::*;
use crate::config::TaubenConfig;
use crate::device::Device;
use crate::error::MovementError;
use crate::store::{BrokerSettings, InMemoryDeviceStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<TelemetryMessage>>,
}

impl TelemetrySink for RecordingSink {
    fn dispatch(&self, message: TelemetryMessage) {
        self.messages.lock().push(message);
    }
}

#[test]
fn test_topic_layout() {
    let topics = Topics::new("device");

    assert_eq!(topics.command("10.0.0.5"), "device/10.0.0.5");
    assert_eq!(topics.info("10.0.0.5"), "device/10.0.0.5/info");
    assert_eq!(topics.shared_info(), "device/info");
    assert_eq!(topics.cloud_command("balcony"), "device/balcony/commands");
    assert_eq!(
        topics.address_from_info("device/10.0.0.5/info").as_deref(),
        Some("10.0.0.5")
    );
    assert_eq!(topics.address_from_info("device/info"), None);
    assert_eq!(topics.address_from_info("other/10.0.0.5/info"), None);
}

#[test]
fn test_topic_wildcards() {
    assert!(topic_matches("device/+/info", "device/10.0.0.5/info"));
    assert!(!topic_matches("device/+/info", "device/info"));
    assert!(!topic_matches("device/+/info", "device/a/b/info"));
    assert!(topic_matches("device/#", "device/a/b/info"));
    assert!(topic_matches("device/info", "device/info"));
    assert!(!topic_matches("device/info", "device/info/extra"));
}

#[test]
fn test_command_wire_format() {
    let payload = DeviceCommand::move_to(90.4, 44.6, 1).to_payload().unwrap();
    let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"type": "move", "position": {"rot": 90, "tilt": 44}, "speed": 1})
    );

    let json = serde_json::to_value(DeviceCommand::move_to(-20.7, -0.5, 1)).unwrap();
    assert_eq!(json["position"], serde_json::json!({"rot": -20, "tilt": 0}));

    let json = serde_json::to_value(ControlAction::RotateLeft.command()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"type": "impulse", "speed": 1, "bounce": 0, "position": {"rot": -10, "tilt": 0}})
    );

    let json = serde_json::to_value(ControlAction::Shoot.command()).unwrap();
    assert_eq!(json, serde_json::json!({"type": "shoot", "duration": 500}));

    let json = serde_json::to_value(DeviceCommand::Reset).unwrap();
    assert_eq!(json, serde_json::json!({"type": "reset"}));
}

#[test]
fn test_control_action_parsing() {
    assert_eq!(ControlAction::parse("move_down"), Some(ControlAction::MoveDown));
    assert_eq!(ControlAction::parse("fly"), None);
    assert_eq!(
        ControlAction::MoveUp.command(),
        DeviceCommand::Impulse {
            speed: 1,
            bounce: 0,
            position: Position { rot: 0, tilt: 10 }
        }
    );
}

#[test]
fn test_telemetry_decoding() {
    let topics = Topics::new("device");

    let message =
        TelemetryMessage::from_publish(&topics, "device/10.0.0.5/info", br#"{"moving": true, "Rot": 12.5}"#)
            .unwrap();
    assert_eq!(message.address, "10.0.0.5");
    assert!(message.moving);
    assert_eq!(message.rotation, Some(12.5));

    let message = TelemetryMessage::from_publish(
        &topics,
        "device/info",
        br#"{"ip": "10.0.0.9", "moving": false}"#,
    )
    .unwrap();
    assert_eq!(message.address, "10.0.0.9");
    assert!(!message.moving);

    let message = TelemetryMessage::from_publish(&topics, "device/10.0.0.5/info", br#"{}"#).unwrap();
    assert!(!message.moving);

    assert!(TelemetryMessage::from_publish(&topics, "device/info", br#"{"moving": true}"#).is_none());
    assert!(TelemetryMessage::from_publish(&topics, "device/10.0.0.5/info", b"not json").is_none());
}

#[test]
fn test_info_handler_forwards_to_sink() {
    let sink = Arc::new(RecordingSink::default());
    let handler = InfoTopicHandler::new(Topics::new("device"), sink.clone());

    handler.handle("device/10.0.0.5/info", br#"{"moving": true}"#);
    handler.handle("device/10.0.0.5/info", b"garbage");
    handler.handle("device/info", br#"{"ip": "10.0.0.6", "moving": false}"#);

    let messages = sink.messages.lock();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], TelemetryMessage::new("10.0.0.5", true));
    assert_eq!(messages[1], TelemetryMessage::new("10.0.0.6", false));
}

#[test]
fn test_owner_credentials() {
    let config = TaubenConfig::default();
    let broker = BrokerSettings {
        host: "broker.local".to_string(),
        port: 1884,
        username: Some("tauben".to_string()),
        password: Some("secret".to_string()),
    };

    let credentials = BrokerCredentials::for_owner("owner-1", &broker, &config.telemetry);
    assert_eq!(credentials.identity, "owner:owner-1");
    assert_eq!(credentials.client_id, "taubenschiesser-server-owner-1");
    assert_eq!(credentials.port, 1884);
    assert!(credentials.tls.is_none());
}

#[tokio::test]
async fn test_resolver_rejects_device_without_address() {
    let config = TaubenConfig::default();
    let sink: Arc<dyn TelemetrySink> = Arc::new(RecordingSink::default());
    let bus = Arc::new(TelemetryBus::new(config.telemetry, config.cloud, sink));
    let resolver = BusTransportResolver::new(bus.clone(), Arc::new(InMemoryDeviceStore::new()));

    let device = Device::new("dev-a", "owner-1", "  ");
    let err = resolver.resolve(&device).await.unwrap_err();

    assert!(matches!(err, MovementError::MissingActuatorAddress { .. }));
    assert_eq!(bus.connection_count(), 0);
}

#[tokio::test]
async fn test_publish_on_unconnected_connection_fails() {
    let config = TaubenConfig::default();
    let broker = BrokerSettings {
        host: "127.0.0.1".to_string(),
        port: 1,
        username: None,
        password: None,
    };
    let credentials = BrokerCredentials::for_owner("owner-1", &broker, &config.telemetry);

    let connection = TelemetryConnection::open(&credentials, Vec::new()).unwrap();
    let err = connection
        .publish("device/10.0.0.5", b"{}".to_vec(), QoS::AtMostOnce)
        .await
        .unwrap_err();

    assert!(matches!(err, crate::error::TelemetryError::NotConnected { .. }));
    connection.close();
}

#[tokio::test]
async fn test_wait_connected_times_out_without_broker() {
    let config = TaubenConfig::default();
    let broker = BrokerSettings {
        host: "127.0.0.1".to_string(),
        port: 1,
        username: None,
        password: None,
    };
    let credentials = BrokerCredentials::for_owner("owner-1", &broker, &config.telemetry);

    let connection = TelemetryConnection::open(&credentials, Vec::new()).unwrap();
    let err = connection
        .wait_connected(Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(matches!(err, crate::error::TelemetryError::Connect { .. }));
    assert!(!connection.is_connected());
    connection.close();
}
