use super::waiter::{MovementWaiters, WaiterTicket};
use crate::config::{MovementConfig, MAX_MOVEMENT_TIMEOUT_MS};
use crate::device::Device;
use crate::error::MovementError;
use crate::events::{EventBus, FleetEvent};
use crate::telemetry::{DeviceCommand, ResolvedTransport, Topics, TransportResolver};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const MAX_MOVEMENT_WAIT: Duration = Duration::from_millis(MAX_MOVEMENT_TIMEOUT_MS);

/// How a pending movement is observed
#[derive(Debug)]
pub enum MovementHandle {
    /// Completion is reported by actuator telemetry
    Local {
        device_id: String,
        ticket: WaiterTicket,
    },
    /// No telemetry reaches the core; completion is approximated by a delay
    Cloud { device_id: String, name: String },
}

impl MovementHandle {
    pub fn device_id(&self) -> &str {
        match self {
            MovementHandle::Local { device_id, .. } | MovementHandle::Cloud { device_id, .. } => {
                device_id
            }
        }
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self, MovementHandle::Cloud { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementOutcome {
    /// Telemetry reported the movement finished
    Confirmed,
    /// No resolving telemetry arrived in time; assumed complete
    TimedOut,
    /// Cloud transport, fixed settle delay elapsed
    Settled,
}

impl MovementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementOutcome::Confirmed => "confirmed",
            MovementOutcome::TimedOut => "timed_out",
            MovementOutcome::Settled => "settled",
        }
    }
}

/// Dispatches positioning commands and waits for them to finish
pub struct MovementCoordinator {
    resolver: Arc<dyn TransportResolver>,
    waiters: Arc<MovementWaiters>,
    topics: Topics,
    config: MovementConfig,
    events: Option<EventBus>,
}

impl MovementCoordinator {
    pub fn new(
        resolver: Arc<dyn TransportResolver>,
        waiters: Arc<MovementWaiters>,
        topics: Topics,
        config: MovementConfig,
    ) -> Self {
        Self {
            resolver,
            waiters,
            topics,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn waiters(&self) -> &Arc<MovementWaiters> {
        &self.waiters
    }

    /// Publish an absolute positioning command
    pub async fn move_to(
        &self,
        device: &Device,
        rotation: f64,
        tilt: f64,
    ) -> Result<MovementHandle, MovementError> {
        info!(
            "Moving device {} to rotation {} tilt {}",
            device.id, rotation, tilt
        );
        self.dispatch(device, DeviceCommand::move_to(rotation, tilt, self.config.speed))
            .await
    }

    /// Publish a command that moves the actuator and track its completion.
    ///
    /// On the local transport the waiter is registered before publishing so
    /// that telemetry arriving right after the command is not missed.
    pub async fn dispatch(
        &self,
        device: &Device,
        command: DeviceCommand,
    ) -> Result<MovementHandle, MovementError> {
        let transport = self.resolver.resolve(device).await?;
        debug!(
            "Dispatching {} to device {} via {:?}",
            command.kind(),
            device.id,
            transport
        );

        match transport {
            ResolvedTransport::Local { ref address, .. } => {
                let ticket = self
                    .waiters
                    .register(address, self.config.require_motion_observed);

                // Dropping the ticket on failure removes the waiter again
                self.publish(device, &transport, &command).await?;

                Ok(MovementHandle::Local {
                    device_id: device.id.clone(),
                    ticket,
                })
            }
            ResolvedTransport::Cloud { ref name, .. } => {
                self.publish(device, &transport, &command).await?;
                Ok(MovementHandle::Cloud {
                    device_id: device.id.clone(),
                    name: name.clone(),
                })
            }
        }
    }

    /// Wait for a movement to finish, then let the camera settle.
    ///
    /// Never fails: a local movement without resolving telemetry is assumed
    /// complete after `timeout`, and a cloud movement is approximated by a
    /// fixed delay of at most the configured settle time.
    pub async fn await_completion(
        &self,
        handle: MovementHandle,
        timeout: Duration,
        stabilization: Duration,
    ) -> MovementOutcome {
        let started = Instant::now();
        let device_id = handle.device_id().to_string();

        let outcome = match handle {
            MovementHandle::Local { mut ticket, .. } => {
                let deadline = started
                    .checked_add(timeout)
                    .unwrap_or_else(|| started + MAX_MOVEMENT_WAIT);
                match tokio::time::timeout_at(deadline, ticket.receiver()).await {
                    Ok(Ok(())) => MovementOutcome::Confirmed,
                    Ok(Err(_)) => {
                        // Registry dropped the waiter; hold the timeout contract anyway
                        tokio::time::sleep_until(deadline).await;
                        MovementOutcome::TimedOut
                    }
                    Err(_) => {
                        self.waiters.cancel(ticket.address(), ticket.id());
                        warn!(
                            "No completion telemetry from {} within {}ms, assuming movement finished",
                            ticket.address(),
                            timeout.as_millis()
                        );
                        MovementOutcome::TimedOut
                    }
                }
            }
            MovementHandle::Cloud { name, .. } => {
                let settle = timeout.min(self.config.cloud_settle());
                debug!(
                    "Cloud movement of {} has no telemetry, settling for {}ms",
                    name,
                    settle.as_millis()
                );
                tokio::time::sleep(settle).await;
                MovementOutcome::Settled
            }
        };

        if !stabilization.is_zero() {
            tokio::time::sleep(stabilization).await;
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            "Movement of device {} finished: {} after {}ms",
            device_id,
            outcome.as_str(),
            elapsed_ms
        );

        if let Some(events) = &self.events {
            let _ = events.publish(FleetEvent::MovementCompleted {
                device_id,
                outcome: outcome.as_str().to_string(),
                elapsed_ms,
            });
        }

        outcome
    }

    /// Move and wait using the configured timeout and stabilization delay
    pub async fn move_and_settle(
        &self,
        device: &Device,
        rotation: f64,
        tilt: f64,
    ) -> Result<MovementOutcome, MovementError> {
        let handle = self.move_to(device, rotation, tilt).await?;
        Ok(self
            .await_completion(
                handle,
                self.config.timeout(),
                self.config.stabilization(),
            )
            .await)
    }

    /// Fire-and-forget command such as an impulse, shot or reset
    pub async fn send_command(
        &self,
        device: &Device,
        command: &DeviceCommand,
    ) -> Result<(), MovementError> {
        let transport = self.resolver.resolve(device).await?;
        info!("Sending {} command to device {}", command.kind(), device.id);
        self.publish(device, &transport, command).await
    }

    async fn publish(
        &self,
        device: &Device,
        transport: &ResolvedTransport,
        command: &DeviceCommand,
    ) -> Result<(), MovementError> {
        let dispatch_error = |source| MovementError::Dispatch {
            device_id: device.id.clone(),
            source,
        };

        let payload = command.to_payload().map_err(dispatch_error)?;
        let topic = transport.command_topic(&self.topics);

        transport
            .publisher()
            .publish(&topic, payload, transport.qos())
            .await
            .map_err(dispatch_error)
    }
}
