use super::*;
use crate::config::TaubenConfig;
use crate::device::{
    CameraSource, ComponentStatus, Device, MonitorMode, StatusAxis, StatusChangeEvent, TapoStream,
};
use crate::events::StatusNotifier;
use crate::store::{DeviceStore, InMemoryDeviceStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use ComponentStatus::*;

#[derive(Default)]
struct FakeProbe {
    reachable: Mutex<HashMap<String, bool>>,
    calls: AtomicUsize,
    probed: Mutex<Vec<String>>,
}

impl FakeProbe {
    fn set(&self, address: &str, reachable: bool) {
        self.reachable.lock().insert(address.to_string(), reachable);
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn probe(&self, address: &str, _timeout: Duration) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.probed.lock().push(address.to_string());
        self.reachable.lock().get(address).copied().unwrap_or(false)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    changes: Mutex<Vec<StatusChangeEvent>>,
    updates: Mutex<Vec<Device>>,
}

impl StatusNotifier for RecordingNotifier {
    fn notify_status_change(&self, event: &StatusChangeEvent) {
        self.changes.lock().push(event.clone());
    }

    fn notify_device_updated(&self, device: &Device) {
        self.updates.lock().push(device.clone());
    }
}

struct Fixture {
    reconciler: HealthReconciler,
    store: Arc<InMemoryDeviceStore>,
    probe: Arc<FakeProbe>,
    notifier: Arc<RecordingNotifier>,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryDeviceStore::new());
    let probe = Arc::new(FakeProbe::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let reconciler = HealthReconciler::new(
        store.clone(),
        probe.clone(),
        notifier.clone(),
        TaubenConfig::default().monitor,
    );

    Fixture {
        reconciler,
        store,
        probe,
        notifier,
    }
}

fn running_device(id: &str, actuator_ip: &str, camera_ip: &str) -> Device {
    let mut device = Device::new(id, "owner-1", actuator_ip);
    device.monitor_mode = MonitorMode::Running;
    device.camera = Some(CameraSource::Tapo {
        ip: camera_ip.to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        stream: TapoStream::Stream1,
    });
    device
}

#[test]
fn test_sticky_states_survive_partial_health() {
    assert_eq!(reconcile_axis(Maintenance, Online, false), Maintenance);
    assert_eq!(reconcile_axis(Error, Offline, false), Error);
    assert_eq!(reconcile_axis(Maintenance, Online, true), Online);
    assert_eq!(reconcile_axis(Online, Offline, false), Offline);
    assert_eq!(reconcile_axis(Offline, Online, false), Online);
}

#[tokio::test]
async fn test_mixed_health_yields_offline_overall() {
    let f = fixture();
    f.store
        .upsert_device(running_device("dev-a", "10.0.0.5", "10.0.0.6"));
    f.probe.set("10.0.0.5", true);
    f.probe.set("10.0.0.6", false);

    let check = f.reconciler.check_one("dev-a").await.unwrap();

    assert_eq!(check.actuator, Online);
    assert_eq!(check.camera, Offline);
    assert_eq!(check.status, Offline);
    assert_eq!(check.changed, vec![StatusAxis::Actuator]);

    let stored = f.store.snapshot("dev-a").unwrap();
    assert_eq!(stored.actuator_status, Online);
    assert_eq!(stored.status, Offline);
    assert!(stored.last_seen.is_some());

    let changes = f.notifier.changes.lock();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].component, StatusAxis::Actuator);
    assert_eq!(changes[0].status, Online);
    assert_eq!(f.notifier.updates.lock().len(), 1);
}

#[tokio::test]
async fn test_each_changed_axis_emits_its_own_event() {
    let f = fixture();
    f.store
        .upsert_device(running_device("dev-a", "10.0.0.5", "10.0.0.6"));
    f.probe.set("10.0.0.5", true);
    f.probe.set("10.0.0.6", true);

    let report = f.reconciler.check_all().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.changed, 1);

    let changes = f.notifier.changes.lock();
    assert_eq!(changes.len(), 2);
    assert_eq!(f.store.snapshot("dev-a").unwrap().status, Online);
}

#[tokio::test]
async fn test_unchanged_status_is_quiet() {
    let f = fixture();
    f.store
        .upsert_device(running_device("dev-a", "10.0.0.5", "10.0.0.6"));

    f.reconciler.check_all().await.unwrap();

    assert!(f.notifier.changes.lock().is_empty());
    assert!(f.notifier.updates.lock().is_empty());
    assert!(f.store.snapshot("dev-a").unwrap().last_seen.is_none());
}

#[tokio::test]
async fn test_paused_device_is_never_probed() {
    let f = fixture();
    let mut paused = running_device("dev-p", "10.0.0.7", "10.0.0.8");
    paused.monitor_mode = MonitorMode::Paused;
    f.store.upsert_device(paused);
    f.probe.set("10.0.0.7", true);

    for _ in 0..5 {
        let report = f.reconciler.check_all().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.checked, 0);
    }

    assert_eq!(f.probe.calls.load(Ordering::SeqCst), 0);
    let stored = f.store.snapshot("dev-p").unwrap();
    assert_eq!(stored.actuator_status, Offline);
    assert!(f.notifier.changes.lock().is_empty());
}

#[tokio::test]
async fn test_local_image_camera_counts_as_online() {
    let f = fixture();
    let mut device = running_device("dev-a", "10.0.0.5", "");
    device.camera = Some(CameraSource::Local {
        path: "/srv/tauben/test.jpg".to_string(),
    });
    f.store.upsert_device(device);
    f.probe.set("10.0.0.5", true);

    let check = f.reconciler.check_one("dev-a").await.unwrap();

    assert_eq!(check.camera, Online);
    assert_eq!(check.status, Online);
    assert_eq!(*f.probe.probed.lock(), vec!["10.0.0.5".to_string()]);
}

#[tokio::test]
async fn test_missing_camera_is_offline_without_probe() {
    let f = fixture();
    let mut device = running_device("dev-a", "10.0.0.5", "");
    device.camera = None;
    f.store.upsert_device(device);
    f.probe.set("10.0.0.5", true);

    let check = f.reconciler.check_one("dev-a").await.unwrap();

    assert_eq!(check.camera, Offline);
    assert_eq!(f.probe.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_maintenance_cleared_only_when_both_axes_online() {
    let f = fixture();
    f.store
        .upsert_device(running_device("dev-a", "10.0.0.5", "10.0.0.6"));
    f.reconciler
        .set_status("dev-a", StatusAxis::Actuator, Maintenance)
        .await
        .unwrap();
    assert_eq!(f.store.snapshot("dev-a").unwrap().status, Maintenance);

    f.probe.set("10.0.0.5", true);
    f.reconciler.check_one("dev-a").await.unwrap();
    assert_eq!(
        f.store.snapshot("dev-a").unwrap().actuator_status,
        Maintenance
    );

    f.probe.set("10.0.0.6", true);
    let check = f.reconciler.check_one("dev-a").await.unwrap();
    assert_eq!(check.actuator, Online);
    assert_eq!(check.status, Online);
}

#[tokio::test]
async fn test_failing_device_does_not_abort_scan() {
    struct BrokenStore {
        inner: InMemoryDeviceStore,
    }

    #[async_trait]
    impl DeviceStore for BrokenStore {
        async fn active_devices(&self) -> Result<Vec<Device>, crate::error::StoreError> {
            self.inner.active_devices().await
        }
        async fn device(&self, id: &str) -> Result<Option<Device>, crate::error::StoreError> {
            self.inner.device(id).await
        }
        async fn persist_device_status(
            &self,
            id: &str,
            axis: StatusAxis,
            status: ComponentStatus,
        ) -> Result<(), crate::error::StoreError> {
            if id == "dev-bad" {
                return Err(crate::error::StoreError::Backend {
                    details: "write rejected".to_string(),
                });
            }
            self.inner.persist_device_status(id, axis, status).await
        }
        async fn persist_overall_status(
            &self,
            id: &str,
            status: ComponentStatus,
        ) -> Result<(), crate::error::StoreError> {
            self.inner.persist_overall_status(id, status).await
        }
        async fn touch_last_seen(
            &self,
            id: &str,
            at: chrono::DateTime<chrono::Utc>,
        ) -> Result<(), crate::error::StoreError> {
            self.inner.touch_last_seen(id, at).await
        }
        async fn persist_route_image(
            &self,
            id: &str,
            index: usize,
            image: String,
            at: chrono::DateTime<chrono::Utc>,
        ) -> Result<(), crate::error::StoreError> {
            self.inner.persist_route_image(id, index, image, at).await
        }
        async fn persist_monitor_mode(
            &self,
            id: &str,
            mode: MonitorMode,
            at: chrono::DateTime<chrono::Utc>,
        ) -> Result<(), crate::error::StoreError> {
            self.inner.persist_monitor_mode(id, mode, at).await
        }
        async fn touch_last_detection(
            &self,
            id: &str,
            at: chrono::DateTime<chrono::Utc>,
        ) -> Result<(), crate::error::StoreError> {
            self.inner.touch_last_detection(id, at).await
        }
        async fn broker_settings(
            &self,
            owner: &str,
        ) -> Result<Option<crate::store::BrokerSettings>, crate::error::StoreError> {
            self.inner.broker_settings(owner).await
        }
    }

    let inner = InMemoryDeviceStore::new();
    inner.upsert_device(running_device("dev-bad", "10.0.0.1", "10.0.0.2"));
    inner.upsert_device(running_device("dev-good", "10.0.0.5", "10.0.0.6"));
    let store = Arc::new(BrokenStore { inner });

    let probe = Arc::new(FakeProbe::default());
    probe.set("10.0.0.1", true);
    probe.set("10.0.0.5", true);

    let reconciler = HealthReconciler::new(
        store.clone(),
        probe,
        Arc::new(RecordingNotifier::default()),
        TaubenConfig::default().monitor,
    );

    let report = reconciler.check_all().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.checked, 1);
    assert_eq!(
        store.inner.snapshot("dev-good").unwrap().actuator_status,
        Online
    );
}

#[tokio::test]
async fn test_summary_checks_active_devices_live() {
    let f = fixture();
    f.store
        .upsert_device(running_device("dev-a", "10.0.0.5", "10.0.0.6"));
    let mut broken = running_device("dev-b", "10.0.0.7", "10.0.0.8");
    broken.camera_status = Error;
    f.store.upsert_device(broken);
    let mut retired = running_device("dev-c", "10.0.0.9", "10.0.0.10");
    retired.is_active = false;
    f.store.upsert_device(retired);

    f.probe.set("10.0.0.5", true);
    f.probe.set("10.0.0.6", true);
    f.probe.set("10.0.0.7", true);

    let summary = f.reconciler.summarize().await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.online, 1);
    assert_eq!(summary.error, 1);
    assert_eq!(f.probe.calls.load(Ordering::SeqCst), 4);

    let dev_a = &summary.devices[0];
    assert_eq!(dev_a.status, Online);
    assert_eq!(dev_a.actuator_ip.as_deref(), Some("10.0.0.5"));
    assert_eq!(dev_a.camera_ip.as_deref(), Some("10.0.0.6"));

    let dev_b = &summary.devices[1];
    assert_eq!(dev_b.actuator, Online);
    assert_eq!(dev_b.camera, Error);

    // Summary reflects live reachability without persisting it
    let stored = f.store.snapshot("dev-a").unwrap();
    assert_eq!(stored.status, Offline);
    assert!(f.notifier.changes.lock().is_empty());
}

#[tokio::test]
async fn test_unknown_device_is_reported() {
    let f = fixture();
    assert!(matches!(
        f.reconciler.check_one("ghost").await,
        Err(crate::error::StoreError::DeviceNotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_run_scans_on_each_interval() {
    let f = fixture();
    f.store
        .upsert_device(running_device("dev-a", "10.0.0.5", "10.0.0.6"));

    let reconciler = Arc::new(f.reconciler);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let reconciler = reconciler.clone();
        let cancel = cancel.clone();
        async move { reconciler.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(150)).await;
    cancel.cancel();
    task.await.unwrap();

    // Immediate scan plus the ones at 60s and 120s, two probes each
    assert_eq!(f.probe.calls.load(Ordering::SeqCst), 6);
}
