use crate::device::{ComponentStatus, Device, MonitorMode, StatusAxis};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Owner-scoped MQTT broker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerSettings {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<BrokerSettings>,
}

/// Device and user records owned by the external CRUD layer
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// All devices that are not soft-deleted
    async fn active_devices(&self) -> Result<Vec<Device>, StoreError>;

    async fn device(&self, device_id: &str) -> Result<Option<Device>, StoreError>;

    async fn persist_device_status(
        &self,
        device_id: &str,
        axis: StatusAxis,
        status: ComponentStatus,
    ) -> Result<(), StoreError>;

    async fn persist_overall_status(
        &self,
        device_id: &str,
        status: ComponentStatus,
    ) -> Result<(), StoreError>;

    async fn touch_last_seen(&self, device_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Store a captured `data:` image URL on one route coordinate
    async fn persist_route_image(
        &self,
        device_id: &str,
        index: usize,
        image: String,
        captured_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Switch patrol monitoring; also counts as the device being seen
    async fn persist_monitor_mode(
        &self,
        device_id: &str,
        mode: MonitorMode,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn touch_last_detection(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn broker_settings(&self, owner_id: &str) -> Result<Option<BrokerSettings>, StoreError>;
}

/// Serialized fleet file layout
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FleetFile {
    #[serde(default)]
    pub owners: Vec<OwnerSettings>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

/// In-process device store, seeded from a fleet file or built directly
pub struct InMemoryDeviceStore {
    devices: RwLock<HashMap<String, Device>>,
    owners: RwLock<HashMap<String, OwnerSettings>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_fleet(fleet: FleetFile) -> Self {
        let store = Self::new();
        for owner in fleet.owners {
            store.upsert_owner(owner);
        }
        for device in fleet.devices {
            store.upsert_device(device);
        }
        store
    }

    /// Load a TOML fleet file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let path = path.as_ref();
        debug!("Loading fleet from: {}", path.display());

        let contents = std::fs::read_to_string(path)?;
        let fleet: FleetFile = toml::from_str(&contents)?;

        info!(
            "Loaded fleet with {} devices and {} owners",
            fleet.devices.len(),
            fleet.owners.len()
        );

        Ok(Self::from_fleet(fleet))
    }

    pub fn upsert_device(&self, mut device: Device) {
        device.status = device.overall_status();
        self.devices.write().insert(device.id.clone(), device);
    }

    pub fn upsert_owner(&self, owner: OwnerSettings) {
        self.owners.write().insert(owner.id.clone(), owner);
    }

    pub fn snapshot(&self, device_id: &str) -> Option<Device> {
        self.devices.read().get(device_id).cloned()
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    /// Owners with at least one active device, sorted
    pub fn active_owners(&self) -> Vec<String> {
        let mut owners: Vec<String> = self
            .devices
            .read()
            .values()
            .filter(|device| device.is_active)
            .map(|device| device.owner.clone())
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    fn with_device<T>(
        &self,
        device_id: &str,
        update: impl FnOnce(&mut Device) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| StoreError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;
        update(device)
    }
}

impl Default for InMemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn active_devices(&self) -> Result<Vec<Device>, StoreError> {
        let mut devices: Vec<Device> = self
            .devices
            .read()
            .values()
            .filter(|device| device.is_active)
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    async fn device(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.snapshot(device_id))
    }

    async fn persist_device_status(
        &self,
        device_id: &str,
        axis: StatusAxis,
        status: ComponentStatus,
    ) -> Result<(), StoreError> {
        self.with_device(device_id, |device| {
            match axis {
                StatusAxis::Actuator => device.actuator_status = status,
                StatusAxis::Camera => device.camera_status = status,
            }
            Ok(())
        })
    }

    async fn persist_overall_status(
        &self,
        device_id: &str,
        status: ComponentStatus,
    ) -> Result<(), StoreError> {
        self.with_device(device_id, |device| {
            device.status = status;
            Ok(())
        })
    }

    async fn touch_last_seen(&self, device_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_device(device_id, |device| {
            device.last_seen = Some(at);
            Ok(())
        })
    }

    async fn persist_route_image(
        &self,
        device_id: &str,
        index: usize,
        image: String,
        captured_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_device(device_id, |device| {
            let coordinate =
                device
                    .route
                    .get_mut(index)
                    .ok_or_else(|| StoreError::CoordinateOutOfRange {
                        device_id: device_id.to_string(),
                        index,
                    })?;
            coordinate.image = Some(image);
            coordinate.captured_at = Some(captured_at);
            Ok(())
        })
    }

    async fn persist_monitor_mode(
        &self,
        device_id: &str,
        mode: MonitorMode,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_device(device_id, |device| {
            device.monitor_mode = mode;
            device.last_seen = Some(at);
            Ok(())
        })
    }

    async fn touch_last_detection(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_device(device_id, |device| {
            device.last_detection = Some(at);
            Ok(())
        })
    }

    async fn broker_settings(&self, owner_id: &str) -> Result<Option<BrokerSettings>, StoreError> {
        Ok(self
            .owners
            .read()
            .get(owner_id)
            .and_then(|owner| owner.mqtt.clone()))
    }
}
