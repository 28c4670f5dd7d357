use super::decoder::{DecoderHandle, DecoderLauncher};
use super::extractor::FrameExtractor;
use super::session::{FrameEvent, FrameSession, RetireReason};
use crate::config::FrameConfig;
use crate::error::FrameError;
use crate::events::{EventBus, FleetEvent};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type SessionMap = Arc<Mutex<HashMap<String, Arc<FrameSession>>>>;

const READ_CHUNK: usize = 64 * 1024;
const DECODER_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Shares one decode pipeline per device among all frame requesters
pub struct FrameSessionManager {
    sessions: SessionMap,
    launcher: Arc<dyn DecoderLauncher>,
    config: FrameConfig,
    events: Option<EventBus>,
    next_id: AtomicU64,
}

impl FrameSessionManager {
    pub fn new(launcher: Arc<dyn DecoderLauncher>, config: FrameConfig) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            launcher,
            config,
            events: None,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.request_timeout()
    }

    /// Latest frame for a device, starting its pipeline on demand.
    ///
    /// A frame extracted within the freshness window is returned without
    /// waiting; otherwise the next extracted frame is awaited.
    pub async fn get_frame(
        &self,
        device_id: &str,
        source_url: &str,
        timeout: Duration,
    ) -> Result<Bytes, FrameError> {
        let session = self.session_for(device_id, source_url);
        session.touch();

        // Subscribe first so a frame landing right after the freshness check is not lost
        let mut receiver = session.subscribe();
        if let Some(frame) = session.fresh_frame(self.config.freshness()) {
            debug!("Serving cached frame for device {}", device_id);
            return Ok(frame);
        }

        let wait = async {
            tokio::select! {
                biased;
                event = next_event(&mut receiver) => match event {
                    Some(FrameEvent::Frame(frame)) => Ok(frame),
                    Some(FrameEvent::Failed(details)) => Err(FrameError::DecoderStopped {
                        device_id: device_id.to_string(),
                        details,
                    }),
                    None => Err(self.closed_error(&session)),
                },
                _ = session.closed() => Err(self.closed_error(&session)),
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    "No frame from device {} within {}ms",
                    device_id,
                    timeout.as_millis()
                );
                Err(FrameError::Timeout {
                    device_id: device_id.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Tear down a device's pipeline, if any
    pub fn dispose(&self, device_id: &str) -> bool {
        let session = self.sessions.lock().remove(device_id);
        match session {
            Some(session) => {
                session.retire(RetireReason::Disposed);
                true
            }
            None => false,
        }
    }

    pub fn dispose_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().drain().collect();
        if !sessions.is_empty() {
            info!("Disposing {} frame session(s)", sessions.len());
        }
        for (_, session) in sessions {
            session.retire(RetireReason::Disposed);
        }
    }

    /// Devices with a live pipeline
    pub fn active_sessions(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.sessions.lock().keys().cloned().collect();
        devices.sort();
        devices
    }

    fn closed_error(&self, session: &FrameSession) -> FrameError {
        match session.failure() {
            Some(details) => FrameError::DecoderStopped {
                device_id: session.device_id.clone(),
                details,
            },
            None => FrameError::SessionClosed {
                device_id: session.device_id.clone(),
            },
        }
    }

    /// Existing live session for the same source, or a freshly started one
    fn session_for(&self, device_id: &str, source_url: &str) -> Arc<FrameSession> {
        let mut sessions = self.sessions.lock();

        if let Some(existing) = sessions.get(device_id) {
            if existing.source_url == source_url && !existing.is_closed() {
                return Arc::clone(existing);
            }
            if existing.source_url != source_url {
                info!("Stream source of device {} changed, restarting", device_id);
            }
            existing.retire(RetireReason::SourceChanged);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(FrameSession::new(id, device_id, source_url));
        sessions.insert(device_id.to_string(), Arc::clone(&session));
        drop(sessions);

        info!("Starting frame session {} for device {}", id, device_id);

        tokio::spawn(run_session(
            Arc::clone(&session),
            Arc::clone(&self.launcher),
            Arc::clone(&self.sessions),
            self.config.clone(),
            self.events.clone(),
        ));

        session
    }
}

impl Drop for FrameSessionManager {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

/// Next frame event; None once the session's channel is gone
async fn next_event(receiver: &mut broadcast::Receiver<FrameEvent>) -> Option<FrameEvent> {
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Frame waiter skipped {} frames", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Reader task: the single writer of a session's buffer and last frame
async fn run_session(
    session: Arc<FrameSession>,
    launcher: Arc<dyn DecoderLauncher>,
    sessions: SessionMap,
    config: FrameConfig,
    events: Option<EventBus>,
) {
    let device_id = session.device_id.clone();

    let DecoderHandle { mut output, child } = match launcher.launch(&session.source_url) {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Failed to start decoder for device {}: {}", device_id, e);
            finish(&session, &sessions, &events, RetireReason::Failed(e.to_string()));
            return;
        }
    };

    if let Some(events) = &events {
        let _ = events.publish(FleetEvent::FrameSessionStarted {
            device_id: device_id.clone(),
        });
    }

    let inactivity = config.inactivity();
    let mut extractor = FrameExtractor::new(config.max_buffer_bytes);
    let mut chunk = vec![0u8; READ_CHUNK];

    let reason = loop {
        let idle_deadline = session.idle_deadline(inactivity);

        tokio::select! {
            _ = session.closed() => {
                break session.retire_reason().unwrap_or(RetireReason::Disposed);
            }
            _ = tokio::time::sleep_until(idle_deadline) => {
                if Instant::now() >= session.idle_deadline(inactivity) {
                    break RetireReason::Idle;
                }
            }
            read = output.read(&mut chunk) => match read {
                Ok(0) => break RetireReason::Failed("decoder exited".to_string()),
                Ok(n) => {
                    for frame in extractor.push(&chunk[..n]) {
                        session.publish_frame(frame);
                    }
                }
                Err(e) => break RetireReason::Failed(e.to_string()),
            },
        }
    };

    drop(output);

    match &reason {
        RetireReason::Idle => info!(
            "Frame session for device {} inactive for {}s, stopping",
            device_id, config.inactivity_seconds
        ),
        RetireReason::Failed(details) => {
            warn!("Decoder for device {} stopped: {}", device_id, details)
        }
        other => debug!(
            "Frame session for device {} ended: {}",
            device_id,
            other.describe()
        ),
    }

    // Unregister before reaping so new requests start a fresh pipeline
    finish(&session, &sessions, &events, reason);

    if let Some(child) = child {
        reap_decoder(&device_id, child).await;
    }
}

async fn reap_decoder(device_id: &str, mut child: Child) {
    if let Err(e) = child.start_kill() {
        debug!("Decoder for device {} already gone: {}", device_id, e);
    }
    match tokio::time::timeout(DECODER_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!("Decoder for device {} exited with {}", device_id, status),
        Ok(Err(e)) => debug!("Waiting for decoder of device {} failed: {}", device_id, e),
        Err(_) => warn!("Decoder for device {} did not exit after kill", device_id),
    }
}

/// Unregister a session and release everyone still waiting on it
fn finish(
    session: &Arc<FrameSession>,
    sessions: &SessionMap,
    events: &Option<EventBus>,
    reason: RetireReason,
) {
    {
        let mut sessions = sessions.lock();
        if sessions
            .get(&session.device_id)
            .is_some_and(|current| current.id == session.id)
        {
            sessions.remove(&session.device_id);
        }
    }

    if let RetireReason::Failed(details) = &reason {
        session.fail(details.clone());
    }
    session.retire(reason.clone());

    if let Some(events) = events {
        let _ = events.publish(FleetEvent::FrameSessionRetired {
            device_id: session.device_id.clone(),
            reason: reason.describe(),
        });
    }
}
