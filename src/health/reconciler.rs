use super::probe::HealthProbe;
use crate::config::MonitorConfig;
use crate::device::{
    derive_overall_status, ComponentStatus, Device, MonitorMode, StatusAxis, StatusChangeEvent,
};
use crate::error::StoreError;
use crate::events::StatusNotifier;
use crate::store::DeviceStore;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Next stored value for one axis given a fresh probe result.
///
/// `maintenance` and `error` are only ever set by an operator. A probe
/// replaces them only once both axes answer, so a flapping link cannot clear
/// them on its own.
pub fn reconcile_axis(
    stored: ComponentStatus,
    observed: ComponentStatus,
    both_online: bool,
) -> ComponentStatus {
    if stored.is_sticky() && !both_online {
        stored
    } else {
        observed
    }
}

/// Result of probing one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCheck {
    pub device_id: String,
    pub actuator: ComponentStatus,
    pub camera: ComponentStatus,
    pub status: ComponentStatus,
    pub changed: Vec<StatusAxis>,
}

/// Counters for one fleet scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub checked: usize,
    pub skipped: usize,
    pub changed: usize,
    pub failed: usize,
}

/// Live view of one device, probed when the summary is requested
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    pub actuator: ComponentStatus,
    pub camera: ComponentStatus,
    pub status: ComponentStatus,
    pub actuator_ip: Option<String>,
    pub camera_ip: Option<String>,
    pub monitor_mode: MonitorMode,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Fleet-wide counts by overall status
#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub maintenance: usize,
    pub error: usize,
    pub devices: Vec<DeviceSummary>,
}

/// Periodic dual-axis liveness reconciliation
pub struct HealthReconciler {
    store: Arc<dyn DeviceStore>,
    probe: Arc<dyn HealthProbe>,
    notifier: Arc<dyn StatusNotifier>,
    config: MonitorConfig,
}

impl HealthReconciler {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        probe: Arc<dyn HealthProbe>,
        notifier: Arc<dyn StatusNotifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            probe,
            notifier,
            config,
        }
    }

    /// Scan the fleet immediately and then every interval until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Health reconciler started, checking every {}s",
            self.config.interval_seconds
        );

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.check_all().await {
                        Ok(report) => debug!(
                            "Fleet scan: {} checked, {} skipped, {} changed, {} failed",
                            report.checked, report.skipped, report.changed, report.failed
                        ),
                        Err(e) => error!("Fleet scan failed: {}", e),
                    }
                }
            }
        }

        info!("Health reconciler stopped");
    }

    /// Probe every running device concurrently
    pub async fn check_all(&self) -> Result<ScanReport, StoreError> {
        let devices = self.store.active_devices().await?;
        let (running, idle): (Vec<Device>, Vec<Device>) =
            devices.into_iter().partition(Device::is_monitored);

        info!(
            "Health scan: {} running, {} not running",
            running.len(),
            idle.len()
        );
        if !idle.is_empty() {
            debug!(
                "Skipping devices: {}",
                idle.iter()
                    .map(|device| device.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let mut report = ScanReport {
            skipped: idle.len(),
            ..ScanReport::default()
        };

        let results = join_all(running.into_iter().map(|device| async move {
            let device_id = device.id.clone();
            (device_id, self.check_device(device).await)
        }))
        .await;

        for (device_id, result) in results {
            match result {
                Ok(check) => {
                    report.checked += 1;
                    if !check.changed.is_empty() {
                        report.changed += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Health check for device {} failed: {}", device_id, e);
                }
            }
        }

        Ok(report)
    }

    /// On-demand probe of one device regardless of its monitoring mode
    pub async fn check_one(&self, device_id: &str) -> Result<DeviceCheck, StoreError> {
        let device = self
            .store
            .device(device_id)
            .await?
            .ok_or_else(|| StoreError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;
        self.check_device(device).await
    }

    /// Probe actuator and camera concurrently
    async fn probe_axes(&self, device: &Device) -> (ComponentStatus, ComponentStatus) {
        let timeout = self.config.probe_timeout();
        let camera_ip = device.camera_ip();

        let actuator_probe = async {
            match device.actuator_address() {
                Some(ip) => online_if(self.probe.probe(ip, timeout).await),
                None => ComponentStatus::Offline,
            }
        };
        let camera_probe = async {
            if device.uses_local_image() {
                return ComponentStatus::Online;
            }
            match &camera_ip {
                Some(ip) => online_if(self.probe.probe(ip, timeout).await),
                None => ComponentStatus::Offline,
            }
        };

        tokio::join!(actuator_probe, camera_probe)
    }

    /// Probe both axes, persist and announce whatever changed
    pub async fn check_device(&self, mut device: Device) -> Result<DeviceCheck, StoreError> {
        let (actuator, camera) = self.probe_axes(&device).await;
        let both_online = actuator == ComponentStatus::Online && camera == ComponentStatus::Online;

        let mut changed = Vec::new();
        for (axis, observed) in [(StatusAxis::Actuator, actuator), (StatusAxis::Camera, camera)] {
            let stored = device.axis_status(axis);
            let next = reconcile_axis(stored, observed, both_online);

            if next == stored {
                if stored.is_sticky() && observed != stored {
                    debug!(
                        "Device {}: keeping {} {} despite probe result {}",
                        device.name, axis, stored, observed
                    );
                }
                continue;
            }

            info!("Device {}: {} status changed to {}", device.name, axis, next);

            self.store
                .persist_device_status(&device.id, axis, next)
                .await?;
            device.set_axis_status(axis, next);
            self.store
                .persist_overall_status(&device.id, device.status)
                .await?;

            self.notifier.notify_status_change(&StatusChangeEvent {
                device_id: device.id.clone(),
                component: axis,
                status: next,
                timestamp: Utc::now(),
            });
            changed.push(axis);
        }

        if actuator == ComponentStatus::Online {
            let now = Utc::now();
            self.store.touch_last_seen(&device.id, now).await?;
            device.last_seen = Some(now);
        }

        if !changed.is_empty() {
            info!(
                "Device {}: overall status is {}",
                device.name, device.status
            );
            self.notifier.notify_device_updated(&device);
        }

        Ok(DeviceCheck {
            device_id: device.id,
            actuator: device.actuator_status,
            camera: device.camera_status,
            status: device.status,
            changed,
        })
    }

    /// Explicit operator status update; the only way to enter a sticky state
    pub async fn set_status(
        &self,
        device_id: &str,
        axis: StatusAxis,
        status: ComponentStatus,
    ) -> Result<Device, StoreError> {
        let mut device = self
            .store
            .device(device_id)
            .await?
            .ok_or_else(|| StoreError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;

        if device.axis_status(axis) == status {
            return Ok(device);
        }

        self.store
            .persist_device_status(device_id, axis, status)
            .await?;
        device.set_axis_status(axis, status);
        self.store
            .persist_overall_status(device_id, device.status)
            .await?;

        if status.is_sticky() {
            warn!("Device {}: {} set to {}", device.name, axis, status);
        } else {
            info!("Device {}: {} set to {}", device.name, axis, status);
        }

        self.notifier.notify_status_change(&StatusChangeEvent {
            device_id: device.id.clone(),
            component: axis,
            status,
            timestamp: Utc::now(),
        });
        self.notifier.notify_device_updated(&device);

        Ok(device)
    }

    /// Probe every active device and count the results by overall status.
    ///
    /// Nothing is persisted. Operator-set states still take precedence
    /// under the same rule as a scan.
    pub async fn summarize(&self) -> Result<FleetSummary, StoreError> {
        let devices = self.store.active_devices().await?;
        let mut summary = FleetSummary {
            total: devices.len(),
            ..FleetSummary::default()
        };

        let probed = join_all(devices.into_iter().map(|device| async move {
            let observed = self.probe_axes(&device).await;
            (device, observed)
        }))
        .await;

        for (device, (actuator, camera)) in probed {
            let both_online =
                actuator == ComponentStatus::Online && camera == ComponentStatus::Online;
            let actuator = reconcile_axis(device.actuator_status, actuator, both_online);
            let camera = reconcile_axis(device.camera_status, camera, both_online);
            let status = derive_overall_status(actuator, camera);

            match status {
                ComponentStatus::Online => summary.online += 1,
                ComponentStatus::Offline => summary.offline += 1,
                ComponentStatus::Maintenance => summary.maintenance += 1,
                ComponentStatus::Error => summary.error += 1,
            }

            summary.devices.push(DeviceSummary {
                actuator_ip: device.actuator_address().map(str::to_string),
                camera_ip: device.camera_ip(),
                id: device.id,
                name: device.name,
                actuator,
                camera,
                status,
                monitor_mode: device.monitor_mode,
                last_seen: device.last_seen,
            });
        }

        Ok(summary)
    }
}

fn online_if(reachable: bool) -> ComponentStatus {
    if reachable {
        ComponentStatus::Online
    } else {
        ComponentStatus::Offline
    }
}
