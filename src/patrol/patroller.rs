use super::aim::{angle_adjustment, jpeg_dimensions, FieldOfView, FALLBACK_DIMENSIONS};
use super::detector::{BirdDetector, DetectionReport};
use crate::capture::{FrameGrabber, ImageRescaler};
use crate::config::PatrolConfig;
use crate::device::{ComponentStatus, Device, MonitorMode, RouteCoordinate};
use crate::error::{PatrolError, StoreError};
use crate::events::{EventBus, FleetEvent, StatusNotifier};
use crate::movement::{MovementCoordinator, MovementOutcome};
use crate::store::DeviceStore;
use crate::telemetry::DeviceCommand;
use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Speed used for the aiming move and the way back
const AIM_SPEED: i32 = 1;

/// Impulse steps leave speed to the firmware
const IMPULSE_SPEED: i32 = 0;

/// Why a running device was left alone this round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotRunning,
    Sleeping,
    Offline,
    /// Moved less than the dwell time ago
    Resting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotKind {
    Aimed,
    Unaimed,
}

/// What one patrol step did for a device
#[derive(Debug, Clone)]
pub struct PatrolStep {
    pub device_id: String,
    /// Route waypoint visited, `None` for an impulse step
    pub waypoint: Option<usize>,
    pub movement: MovementOutcome,
    pub detection: Option<DetectionReport>,
    pub shot: Option<ShotKind>,
}

#[derive(Debug, Clone)]
pub enum PatrolOutcome {
    Skipped(SkipReason),
    Patrolled(PatrolStep),
}

/// Counters for one patrol round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatrolReport {
    pub patrolled: usize,
    pub skipped: usize,
    pub detections: usize,
    pub shots: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Cursor {
    route_index: usize,
    last_moved: Option<Instant>,
}

/// Sweeps running devices, looks for birds after every move and fires
pub struct Patroller {
    store: Arc<dyn DeviceStore>,
    movement: Arc<MovementCoordinator>,
    grabber: Arc<dyn FrameGrabber>,
    rescaler: Arc<dyn ImageRescaler>,
    detector: Arc<dyn BirdDetector>,
    config: PatrolConfig,
    events: Option<EventBus>,
    cursors: Mutex<HashMap<String, Cursor>>,
}

impl Patroller {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        movement: Arc<MovementCoordinator>,
        grabber: Arc<dyn FrameGrabber>,
        rescaler: Arc<dyn ImageRescaler>,
        detector: Arc<dyn BirdDetector>,
        config: PatrolConfig,
    ) -> Self {
        Self {
            store,
            movement,
            grabber,
            rescaler,
            detector,
            config,
            events: None,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &PatrolConfig {
        &self.config
    }

    /// Route index the next step of `device_id` will visit
    pub fn route_position(&self, device_id: &str) -> usize {
        self.cursors
            .lock()
            .get(device_id)
            .map(|cursor| cursor.route_index)
            .unwrap_or(0)
    }

    /// Patrol after the startup delay and then every interval until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Patrol starting in {}s, rounds every {}s",
            self.config.startup_delay_seconds, self.config.interval_seconds
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Patrol stopped before the first round");
                return;
            }
            _ = tokio::time::sleep(self.config.startup_delay()) => {}
        }

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Cancellation may cut a round short
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.patrol_round() => match result {
                    Ok(report) => debug!(
                        "Patrol round: {} patrolled, {} skipped, {} detection(s), {} shot(s), {} failed",
                        report.patrolled, report.skipped, report.detections, report.shots, report.failed
                    ),
                    Err(e) => error!("Patrol round failed: {}", e),
                },
            }
        }

        info!("Patrol stopped");
    }

    /// Patrol every running device once, concurrently
    pub async fn patrol_round(&self) -> Result<PatrolReport, StoreError> {
        let running: Vec<Device> = self
            .store
            .active_devices()
            .await?
            .into_iter()
            .filter(Device::is_monitored)
            .collect();

        let results = join_all(running.iter().map(|device| self.patrol_device(device))).await;

        let mut report = PatrolReport::default();
        for (device, result) in running.iter().zip(results) {
            match result {
                Ok(PatrolOutcome::Skipped(reason)) => {
                    debug!("Skipping patrol of device {}: {:?}", device.id, reason);
                    report.skipped += 1;
                }
                Ok(PatrolOutcome::Patrolled(step)) => {
                    report.patrolled += 1;
                    if step.detection.as_ref().is_some_and(|d| d.birds_found) {
                        report.detections += 1;
                    }
                    if step.shot.is_some() {
                        report.shots += 1;
                    }
                }
                Err(e) => {
                    warn!("Patrol of device {} failed: {}", device.id, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Move one device, analyse the new view and shoot at what it shows.
    ///
    /// The route cursor advances once the view was analysed, even when the
    /// analysis failed. A failed move leaves it on the same waypoint.
    pub async fn patrol_device(&self, device: &Device) -> Result<PatrolOutcome, PatrolError> {
        if let Some(reason) = self.skip_reason(device) {
            return Ok(PatrolOutcome::Skipped(reason));
        }

        let waypoint = if device.patrols_route() {
            let index = self.route_position(&device.id) % device.route.len();
            Some((index, device.route[index].clone()))
        } else {
            None
        };

        let movement = match &waypoint {
            Some((index, coordinate)) => {
                info!(
                    "Patrolling device {} to waypoint {} ({}, {})",
                    device.id, index, coordinate.rotation, coordinate.tilt
                );
                self.movement
                    .move_and_settle(device, coordinate.rotation, coordinate.tilt)
                    .await?
            }
            None => {
                info!(
                    "Stepping device {} by {} degree(s)",
                    device.id, device.basic_step
                );
                let command = DeviceCommand::impulse(device.basic_step, 0, IMPULSE_SPEED);
                let handle = self.movement.dispatch(device, command).await?;
                let limits = self.movement.config();
                self.movement
                    .await_completion(handle, limits.timeout(), limits.stabilization())
                    .await
            }
        };
        self.mark_moved(&device.id);

        let analysis = self
            .analyze(device, waypoint.as_ref().map(|(_, coordinate)| coordinate))
            .await;

        if let Some((index, _)) = &waypoint {
            self.advance_route(&device.id, *index, device.route.len());
        }

        let (detection, shot) = analysis?;
        Ok(PatrolOutcome::Patrolled(PatrolStep {
            device_id: device.id.clone(),
            waypoint: waypoint.map(|(index, _)| index),
            movement,
            detection,
            shot,
        }))
    }

    /// Start patrolling a device
    pub async fn start_monitoring(&self, device_id: &str) -> Result<Device, StoreError> {
        self.set_monitor_mode(device_id, MonitorMode::Running).await
    }

    /// Keep a device in place until it is started again
    pub async fn pause_monitoring(&self, device_id: &str) -> Result<Device, StoreError> {
        self.set_monitor_mode(device_id, MonitorMode::Paused).await
    }

    pub async fn set_monitor_mode(
        &self,
        device_id: &str,
        mode: MonitorMode,
    ) -> Result<Device, StoreError> {
        self.store
            .persist_monitor_mode(device_id, mode, Utc::now())
            .await?;

        let device = self
            .store
            .device(device_id)
            .await?
            .ok_or_else(|| StoreError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;

        // A restarted device moves on the next round
        if let Some(cursor) = self.cursors.lock().get_mut(device_id) {
            cursor.last_moved = None;
        }

        info!("Monitoring of device {} is now {:?}", device_id, mode);
        if let Some(events) = &self.events {
            events.notify_device_updated(&device);
        }

        Ok(device)
    }

    fn skip_reason(&self, device: &Device) -> Option<SkipReason> {
        if !device.is_monitored() {
            return Some(SkipReason::NotRunning);
        }
        if device.sleep {
            return Some(SkipReason::Sleeping);
        }
        if device.status == ComponentStatus::Offline {
            return Some(SkipReason::Offline);
        }

        let cursors = self.cursors.lock();
        let last_moved = cursors.get(&device.id).and_then(|c| c.last_moved);
        match last_moved {
            Some(at) if at.elapsed() < self.config.dwell() => Some(SkipReason::Resting),
            _ => None,
        }
    }

    fn mark_moved(&self, device_id: &str) {
        self.cursors
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .last_moved = Some(Instant::now());
    }

    fn advance_route(&self, device_id: &str, visited: usize, route_len: usize) {
        self.cursors
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .route_index = (visited + 1) % route_len;
    }

    /// Grab, zoom for the waypoint and run detection
    async fn analyze(
        &self,
        device: &Device,
        waypoint: Option<&RouteCoordinate>,
    ) -> Result<(Option<DetectionReport>, Option<ShotKind>), PatrolError> {
        if device.camera.is_none() {
            debug!("Device {} has no camera, nothing to analyse", device.id);
            return Ok((None, None));
        }

        let frame = self.grabber.capture_frame_once(device).await?;

        let zoom = waypoint.map(RouteCoordinate::effective_zoom).unwrap_or(1.0);
        let image = if zoom > 1.0 {
            match self.rescaler.rescale(frame.clone(), zoom).await {
                Ok(zoomed) => zoomed,
                Err(e) => {
                    warn!(
                        "Zoom {}x failed for device {}, analysing the full frame: {}",
                        zoom, device.id, e
                    );
                    frame
                }
            }
        } else {
            frame
        };

        let report = self.detector.detect(image.clone()).await?;
        if !report.birds_found {
            debug!(
                "No birds in view of device {} ({} object(s))",
                device.id,
                report.detections.len()
            );
            return Ok((Some(report), None));
        }

        info!(
            "{} bird(s) detected by device {} (confidence {:.2})",
            report.bird_count, device.id, report.confidence_level
        );

        let now = Utc::now();
        self.store.touch_last_detection(&device.id, now).await?;
        if let Some(events) = &self.events {
            let _ = events.publish(FleetEvent::BirdsDetected {
                device_id: device.id.clone(),
                bird_count: report.bird_count,
                confidence: report.confidence_level,
                timestamp: now,
            });
        }

        let shot = self.engage(device, waypoint, &report, &image).await?;
        Ok((Some(report), Some(shot)))
    }

    /// Aim at the most confident bird when a waypoint anchors the view,
    /// otherwise fire in place
    async fn engage(
        &self,
        device: &Device,
        waypoint: Option<&RouteCoordinate>,
        report: &DetectionReport,
        image: &Bytes,
    ) -> Result<ShotKind, PatrolError> {
        let target = report.target().and_then(|detection| detection.bbox);

        let kind = match waypoint.zip(target) {
            Some((waypoint, bbox)) => {
                let dimensions = jpeg_dimensions(image).unwrap_or(FALLBACK_DIMENSIONS);
                let (rotation_offset, tilt_offset) = angle_adjustment(
                    &bbox,
                    dimensions,
                    waypoint.effective_zoom(),
                    self.field_of_view(),
                );
                let rotation = waypoint.rotation + rotation_offset;
                let tilt = waypoint.tilt + tilt_offset;

                info!(
                    "Aiming device {} from ({}, {}) to ({:.1}, {:.1})",
                    device.id, waypoint.rotation, waypoint.tilt, rotation, tilt
                );
                self.aim(device, rotation, tilt, self.config.aim_settle())
                    .await?;

                self.movement
                    .send_command(
                        device,
                        &DeviceCommand::Shoot {
                            duration: self.config.shot_duration_ms,
                        },
                    )
                    .await?;
                tokio::time::sleep(self.config.shot_recovery()).await;

                self.aim(device, waypoint.rotation, waypoint.tilt, Duration::ZERO)
                    .await?;
                ShotKind::Aimed
            }
            None => {
                self.movement
                    .send_command(
                        device,
                        &DeviceCommand::Shoot {
                            duration: self.config.unaimed_shot_duration_ms,
                        },
                    )
                    .await?;
                ShotKind::Unaimed
            }
        };

        if let Some(events) = &self.events {
            let _ = events.publish(FleetEvent::ShotFired {
                device_id: device.id.clone(),
                aimed: kind == ShotKind::Aimed,
            });
        }

        Ok(kind)
    }

    async fn aim(
        &self,
        device: &Device,
        rotation: f64,
        tilt: f64,
        settle: Duration,
    ) -> Result<MovementOutcome, PatrolError> {
        let command = DeviceCommand::move_to(rotation, tilt, AIM_SPEED);
        let handle = self.movement.dispatch(device, command).await?;
        Ok(self
            .movement
            .await_completion(handle, self.config.aim_timeout(), settle)
            .await)
    }

    fn field_of_view(&self) -> FieldOfView {
        FieldOfView {
            horizontal: self.config.fov_horizontal_degrees,
            vertical: self.config.fov_vertical_degrees,
        }
    }
}
