use super::*;
use crate::capture::{FrameGrabber, ImageRescaler};
use crate::config::TaubenConfig;
use crate::device::{CameraSource, ComponentStatus, Device, MonitorMode, PatrolMode, RouteCoordinate};
use crate::error::{CaptureError, MovementError, PatrolError, StoreError, TelemetryError};
use crate::events::{EventBus, FleetEvent};
use crate::movement::{MovementCoordinator, MovementWaiters};
use crate::store::{DeviceStore, InMemoryDeviceStore};
use crate::telemetry::{
    CommandPublisher, DeviceCommand, Position, QoS, ResolvedTransport, Topics, TransportResolver,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const ZOOMED: &[u8] = b"\xFF\xD8zoomed\xFF\xD9";

/// Minimal JPEG whose frame header declares 1280x720
fn frame_1280x720() -> Bytes {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x11, 0x08];
    data.extend_from_slice(&720u16.to_be_bytes());
    data.extend_from_slice(&1280u16.to_be_bytes());
    data.extend_from_slice(&[0x03, 0x01, 0x22, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
    data.extend_from_slice(&[0xFF, 0xD9]);
    Bytes::from(data)
}

#[derive(Default)]
struct RecordingPublisher {
    commands: Mutex<Vec<DeviceCommand>>,
    fail: bool,
}

impl RecordingPublisher {
    fn commands(&self) -> Vec<DeviceCommand> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl CommandPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS) -> Result<(), TelemetryError> {
        if self.fail {
            return Err(TelemetryError::Publish {
                topic: topic.to_string(),
                details: "broker gone".to_string(),
            });
        }
        let command: DeviceCommand = serde_json::from_slice(&payload).unwrap();
        self.commands.lock().push(command);
        Ok(())
    }
}

/// Cloud transport keeps movement timing fixed; devices without an
/// actuator address cannot be reached
struct CloudResolver {
    publisher: Arc<RecordingPublisher>,
}

#[async_trait]
impl TransportResolver for CloudResolver {
    async fn resolve(&self, device: &Device) -> Result<ResolvedTransport, MovementError> {
        if device.actuator_address().is_none() {
            return Err(MovementError::MissingActuatorAddress {
                device_id: device.id.clone(),
            });
        }
        Ok(ResolvedTransport::Cloud {
            name: device.id.clone(),
            publisher: self.publisher.clone(),
        })
    }
}

struct FakeGrabber {
    frame: Bytes,
    calls: AtomicUsize,
}

#[async_trait]
impl FrameGrabber for FakeGrabber {
    async fn capture_frame_once(&self, _device: &Device) -> Result<Bytes, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.frame.clone())
    }
}

#[derive(Default)]
struct FakeRescaler {
    factors: Mutex<Vec<f64>>,
    fail: bool,
}

#[async_trait]
impl ImageRescaler for FakeRescaler {
    async fn rescale(&self, _image: Bytes, factor: f64) -> Result<Bytes, CaptureError> {
        self.factors.lock().push(factor);
        if self.fail {
            return Err(CaptureError::Rescale {
                details: "cv service unavailable".to_string(),
            });
        }
        Ok(Bytes::from_static(ZOOMED))
    }
}

#[derive(Default)]
struct FakeDetector {
    report: Mutex<DetectionReport>,
    images: Mutex<Vec<Bytes>>,
    fail: bool,
}

#[async_trait]
impl BirdDetector for FakeDetector {
    async fn detect(&self, image: Bytes) -> Result<DetectionReport, CaptureError> {
        self.images.lock().push(image);
        if self.fail {
            return Err(CaptureError::Detect {
                details: "detector offline".to_string(),
            });
        }
        Ok(self.report.lock().clone())
    }
}

fn birds_at(bbox: BoundingBox) -> DetectionReport {
    DetectionReport {
        birds_found: true,
        bird_count: 1,
        confidence_level: 0.81,
        detections: vec![
            Detection {
                class: "person".to_string(),
                confidence: 0.97,
                bbox: Some(BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 10.0,
                    height: 10.0,
                }),
            },
            Detection {
                class: "bird".to_string(),
                confidence: 0.42,
                bbox: None,
            },
            Detection {
                class: "bird".to_string(),
                confidence: 0.81,
                bbox: Some(bbox),
            },
        ],
        processing_time: 0.2,
    }
}

struct Fixture {
    patroller: Patroller,
    store: Arc<InMemoryDeviceStore>,
    publisher: Arc<RecordingPublisher>,
    grabber: Arc<FakeGrabber>,
    rescaler: Arc<FakeRescaler>,
    detector: Arc<FakeDetector>,
    events: EventBus,
}

fn fixture_with(
    publisher: RecordingPublisher,
    rescaler: FakeRescaler,
    detector: FakeDetector,
    frame: Bytes,
) -> Fixture {
    let config = TaubenConfig::default();
    let publisher = Arc::new(publisher);
    let movement = Arc::new(MovementCoordinator::new(
        Arc::new(CloudResolver {
            publisher: publisher.clone(),
        }),
        Arc::new(MovementWaiters::new()),
        Topics::new("device"),
        config.movement,
    ));

    let store = Arc::new(InMemoryDeviceStore::new());
    let grabber = Arc::new(FakeGrabber {
        frame,
        calls: AtomicUsize::new(0),
    });
    let rescaler = Arc::new(rescaler);
    let detector = Arc::new(detector);
    let events = EventBus::new(64);

    let patroller = Patroller::new(
        store.clone(),
        movement,
        grabber.clone(),
        rescaler.clone(),
        detector.clone(),
        config.patrol,
    )
    .with_events(events.clone());

    Fixture {
        patroller,
        store,
        publisher,
        grabber,
        rescaler,
        detector,
        events,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        RecordingPublisher::default(),
        FakeRescaler::default(),
        FakeDetector::default(),
        frame_1280x720(),
    )
}

fn running_device(id: &str) -> Device {
    let mut device = Device::new(id, "owner-1", "10.0.0.5");
    device.monitor_mode = MonitorMode::Running;
    device.status = ComponentStatus::Online;
    device.camera = Some(CameraSource::Direct {
        url: "rtsp://10.0.0.6/live".to_string(),
    });
    device
}

fn route_device(id: &str, route: Vec<RouteCoordinate>) -> Device {
    let mut device = running_device(id);
    device.patrol_mode = PatrolMode::Route;
    device.route = route;
    device
}

fn move_command(rot: i32, tilt: i32, speed: i32) -> DeviceCommand {
    DeviceCommand::Move {
        position: Position { rot, tilt },
        speed,
    }
}

fn patrolled(outcome: PatrolOutcome) -> PatrolStep {
    match outcome {
        PatrolOutcome::Patrolled(step) => step,
        PatrolOutcome::Skipped(reason) => panic!("device was skipped: {:?}", reason),
    }
}

#[tokio::test(start_paused = true)]
async fn test_impulse_step_moves_by_basic_step_and_analyses() {
    let f = fixture();
    let mut device = running_device("dev-a");
    device.basic_step = 25;

    let step = patrolled(f.patroller.patrol_device(&device).await.unwrap());

    assert_eq!(step.waypoint, None);
    assert_eq!(step.shot, None);
    assert!(!step.detection.unwrap().birds_found);
    assert_eq!(
        f.publisher.commands(),
        vec![DeviceCommand::Impulse {
            speed: 0,
            bounce: 0,
            position: Position { rot: 25, tilt: 0 },
        }]
    );
    assert_eq!(f.grabber.calls.load(Ordering::SeqCst), 1);
    // Impulse steps analyse the unzoomed frame
    assert!(f.rescaler.factors.lock().is_empty());
    assert_eq!(*f.detector.images.lock(), vec![frame_1280x720()]);
}

#[tokio::test(start_paused = true)]
async fn test_route_advances_after_each_waypoint_and_wraps() {
    let f = fixture();
    let speed = TaubenConfig::default().movement.speed;
    let device = route_device(
        "dev-a",
        vec![
            RouteCoordinate::new(10.0, 5.0, 1.0),
            RouteCoordinate::new(-40.0, 20.0, 1.0),
        ],
    );

    for expected in [0, 1, 0] {
        let step = patrolled(f.patroller.patrol_device(&device).await.unwrap());
        assert_eq!(step.waypoint, Some(expected));
        tokio::time::advance(f.patroller.config().dwell()).await;
    }

    assert_eq!(f.patroller.route_position("dev-a"), 1);
    assert_eq!(
        f.publisher.commands(),
        vec![
            move_command(10, 5, speed),
            move_command(-40, 20, speed),
            move_command(10, 5, speed),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_analysis_still_advances_route() {
    let f = fixture_with(
        RecordingPublisher::default(),
        FakeRescaler::default(),
        FakeDetector {
            fail: true,
            ..FakeDetector::default()
        },
        frame_1280x720(),
    );
    let device = route_device(
        "dev-a",
        vec![
            RouteCoordinate::new(10.0, 5.0, 1.0),
            RouteCoordinate::new(20.0, 5.0, 1.0),
        ],
    );

    let result = f.patroller.patrol_device(&device).await;

    assert!(matches!(
        result,
        Err(PatrolError::Capture(CaptureError::Detect { .. }))
    ));
    assert_eq!(f.patroller.route_position("dev-a"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_move_stays_on_waypoint() {
    let f = fixture_with(
        RecordingPublisher {
            fail: true,
            ..RecordingPublisher::default()
        },
        FakeRescaler::default(),
        FakeDetector::default(),
        frame_1280x720(),
    );
    let device = route_device("dev-a", vec![RouteCoordinate::new(10.0, 5.0, 1.0)]);

    let result = f.patroller.patrol_device(&device).await;

    assert!(matches!(result, Err(PatrolError::Movement(_))));
    assert_eq!(f.patroller.route_position("dev-a"), 0);
    assert_eq!(f.grabber.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_birds_on_route_are_aimed_at_then_device_returns() {
    let f = fixture();
    *f.detector.report.lock() = birds_at(BoundingBox {
        x: 1270.0,
        y: 0.0,
        width: 20.0,
        height: 20.0,
    });
    let mut receiver = f.events.subscribe();
    let speed = TaubenConfig::default().movement.speed;
    let device = route_device("dev-a", vec![RouteCoordinate::new(90.0, 45.0, 1.0)]);
    f.store.upsert_device(device.clone());
    let started = Instant::now();

    let step = patrolled(f.patroller.patrol_device(&device).await.unwrap());

    assert_eq!(step.shot, Some(ShotKind::Aimed));
    // Right edge is half the 60 degree field away, top edge 350px of 720 at 34 degrees
    assert_eq!(
        f.publisher.commands(),
        vec![
            move_command(90, 45, speed),
            move_command(120, 61, 1),
            DeviceCommand::Shoot { duration: 300 },
            move_command(90, 45, 1),
        ]
    );
    // Waypoint (5s + 2s), aim (5s + 0.5s), recovery 1.5s, return 5s
    assert!(started.elapsed() >= Duration::from_millis(19_000));

    assert!(f.store.snapshot("dev-a").unwrap().last_detection.is_some());

    let mut seen = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        seen.push(event.event_type());
        if let FleetEvent::ShotFired { aimed, .. } = event {
            assert!(aimed);
        }
    }
    assert!(seen.contains(&"birds_detected"));
    assert!(seen.contains(&"shot_fired"));
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_frame_aims_with_fallback_size() {
    let f = fixture_with(
        RecordingPublisher::default(),
        FakeRescaler::default(),
        FakeDetector::default(),
        Bytes::from_static(b"\xFF\xD8original\xFF\xD9"),
    );
    // Centre of the assumed 426x240 frame
    *f.detector.report.lock() = birds_at(BoundingBox {
        x: 203.0,
        y: 110.0,
        width: 20.0,
        height: 20.0,
    });
    let device = route_device("dev-a", vec![RouteCoordinate::new(30.0, 10.0, 1.0)]);
    f.store.upsert_device(device.clone());

    patrolled(f.patroller.patrol_device(&device).await.unwrap());

    assert_eq!(f.publisher.commands()[1], move_command(30, 10, 1));
}

#[tokio::test(start_paused = true)]
async fn test_birds_during_impulse_step_fire_without_aiming() {
    let f = fixture();
    *f.detector.report.lock() = birds_at(BoundingBox {
        x: 1270.0,
        y: 0.0,
        width: 20.0,
        height: 20.0,
    });
    let device = running_device("dev-a");
    f.store.upsert_device(device.clone());

    let step = patrolled(f.patroller.patrol_device(&device).await.unwrap());

    assert_eq!(step.shot, Some(ShotKind::Unaimed));
    let commands = f.publisher.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[1], DeviceCommand::Shoot { duration: 1000 });
}

#[tokio::test(start_paused = true)]
async fn test_waypoint_zoom_is_applied_before_detection() {
    let f = fixture();
    let device = route_device("dev-a", vec![RouteCoordinate::new(0.0, 0.0, 2.5)]);

    patrolled(f.patroller.patrol_device(&device).await.unwrap());

    assert_eq!(*f.rescaler.factors.lock(), vec![2.5]);
    assert_eq!(*f.detector.images.lock(), vec![Bytes::from_static(ZOOMED)]);
}

#[tokio::test(start_paused = true)]
async fn test_zoom_failure_analyses_full_frame() {
    let f = fixture_with(
        RecordingPublisher::default(),
        FakeRescaler {
            fail: true,
            ..FakeRescaler::default()
        },
        FakeDetector::default(),
        frame_1280x720(),
    );
    let device = route_device("dev-a", vec![RouteCoordinate::new(0.0, 0.0, 2.0)]);

    patrolled(f.patroller.patrol_device(&device).await.unwrap());

    assert_eq!(*f.detector.images.lock(), vec![frame_1280x720()]);
}

#[tokio::test(start_paused = true)]
async fn test_device_without_camera_moves_but_is_not_analysed() {
    let f = fixture();
    let mut device = running_device("dev-a");
    device.camera = None;

    let step = patrolled(f.patroller.patrol_device(&device).await.unwrap());

    assert!(step.detection.is_none());
    assert_eq!(f.publisher.commands().len(), 1);
    assert_eq!(f.grabber.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_paused_sleeping_and_offline_devices_are_skipped() {
    let f = fixture();

    let mut paused = running_device("paused");
    paused.monitor_mode = MonitorMode::Paused;
    let mut sleeping = running_device("sleeping");
    sleeping.sleep = true;
    let mut offline = running_device("offline");
    offline.status = ComponentStatus::Offline;

    for (device, expected) in [
        (paused, SkipReason::NotRunning),
        (sleeping, SkipReason::Sleeping),
        (offline, SkipReason::Offline),
    ] {
        match f.patroller.patrol_device(&device).await.unwrap() {
            PatrolOutcome::Skipped(reason) => assert_eq!(reason, expected),
            PatrolOutcome::Patrolled(_) => panic!("{} should be skipped", device.id),
        }
    }

    assert!(f.publisher.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_device_rests_for_dwell_between_moves() {
    let f = fixture();
    let device = running_device("dev-a");

    patrolled(f.patroller.patrol_device(&device).await.unwrap());
    assert!(matches!(
        f.patroller.patrol_device(&device).await.unwrap(),
        PatrolOutcome::Skipped(SkipReason::Resting)
    ));

    tokio::time::advance(f.patroller.config().dwell()).await;
    patrolled(f.patroller.patrol_device(&device).await.unwrap());
    assert_eq!(f.publisher.commands().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_round_isolates_failing_devices() {
    let f = fixture();
    f.store.upsert_device(running_device("dev-a"));
    let mut unreachable = running_device("dev-b");
    unreachable.actuator_ip = String::new();
    f.store.upsert_device(unreachable);
    let mut paused = running_device("dev-c");
    paused.monitor_mode = MonitorMode::Paused;
    f.store.upsert_device(paused);

    let report = f.patroller.patrol_round().await.unwrap();

    assert_eq!(
        report,
        PatrolReport {
            patrolled: 1,
            skipped: 0,
            detections: 0,
            shots: 0,
            failed: 1,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_run_waits_for_startup_delay() {
    let f = fixture();
    f.store.upsert_device(running_device("dev-a"));
    let patroller = Arc::new(f.patroller);
    let cancel = CancellationToken::new();

    let handle = tokio::spawn({
        let patroller = Arc::clone(&patroller);
        let cancel = cancel.clone();
        async move { patroller.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    assert!(f.publisher.commands().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(f.publisher.commands().len(), 1);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_and_pause_persist_and_notify() {
    let f = fixture();
    let mut device = running_device("dev-a");
    device.monitor_mode = MonitorMode::Paused;
    f.store.upsert_device(device);
    let mut receiver = f.events.subscribe();

    let started = f.patroller.start_monitoring("dev-a").await.unwrap();
    assert_eq!(started.monitor_mode, MonitorMode::Running);
    assert!(started.last_seen.is_some());
    assert!(matches!(
        receiver.try_recv().unwrap(),
        FleetEvent::DeviceUpdated { ref device_id, .. } if device_id == "dev-a"
    ));

    let paused = f.patroller.pause_monitoring("dev-a").await.unwrap();
    assert_eq!(paused.monitor_mode, MonitorMode::Paused);
    assert_eq!(
        f.store.snapshot("dev-a").unwrap().monitor_mode,
        MonitorMode::Paused
    );

    assert!(matches!(
        f.patroller.start_monitoring("ghost").await,
        Err(StoreError::DeviceNotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_restart_lets_device_move_without_resting() {
    let f = fixture();
    let device = running_device("dev-a");
    f.store.upsert_device(device.clone());

    patrolled(f.patroller.patrol_device(&device).await.unwrap());
    f.patroller.pause_monitoring("dev-a").await.unwrap();
    f.patroller.start_monitoring("dev-a").await.unwrap();

    patrolled(f.patroller.patrol_device(&device).await.unwrap());
}
