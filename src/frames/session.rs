use bytes::Bytes;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Broadcast to everyone waiting on a session
#[derive(Debug, Clone)]
pub enum FrameEvent {
    Frame(Bytes),
    Failed(String),
}

/// Why a session's pipeline stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetireReason {
    Idle,
    Disposed,
    SourceChanged,
    Failed(String),
}

impl RetireReason {
    pub fn describe(&self) -> String {
        match self {
            RetireReason::Idle => "inactive".to_string(),
            RetireReason::Disposed => "disposed".to_string(),
            RetireReason::SourceChanged => "source changed".to_string(),
            RetireReason::Failed(details) => format!("failed: {}", details),
        }
    }
}

/// Per-device decode pipeline state shared between its reader task and
/// frame requesters
pub struct FrameSession {
    pub(super) id: u64,
    pub(super) device_id: String,
    pub(super) source_url: String,
    events: broadcast::Sender<FrameEvent>,
    last_frame: Mutex<Option<(Bytes, Instant)>>,
    last_request: Mutex<Instant>,
    failure: Mutex<Option<String>>,
    retire_reason: Mutex<Option<RetireReason>>,
    closed: CancellationToken,
}

impl FrameSession {
    pub(super) fn new(id: u64, device_id: &str, source_url: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            id,
            device_id: device_id.to_string(),
            source_url: source_url.to_string(),
            events,
            last_frame: Mutex::new(None),
            last_request: Mutex::new(Instant::now()),
            failure: Mutex::new(None),
            retire_reason: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FrameEvent> {
        self.events.subscribe()
    }

    pub fn touch(&self) {
        *self.last_request.lock() = Instant::now();
    }

    pub fn idle_deadline(&self, inactivity: Duration) -> Instant {
        *self.last_request.lock() + inactivity
    }

    /// Last frame if it was extracted less than `freshness` ago
    pub fn fresh_frame(&self, freshness: Duration) -> Option<Bytes> {
        self.last_frame
            .lock()
            .as_ref()
            .filter(|(_, at)| at.elapsed() < freshness)
            .map(|(frame, _)| frame.clone())
    }

    pub(super) fn publish_frame(&self, frame: Bytes) {
        *self.last_frame.lock() = Some((frame.clone(), Instant::now()));
        // No receivers just means nobody is waiting right now
        let _ = self.events.send(FrameEvent::Frame(frame));
    }

    pub(super) fn fail(&self, details: String) {
        *self.failure.lock() = Some(details.clone());
        let _ = self.events.send(FrameEvent::Failed(details));
    }

    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Ask the reader task to stop; the first reason wins
    pub(super) fn retire(&self, reason: RetireReason) {
        self.retire_reason.lock().get_or_insert(reason);
        self.closed.cancel();
    }

    pub(super) fn retire_reason(&self) -> Option<RetireReason> {
        self.retire_reason.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}
