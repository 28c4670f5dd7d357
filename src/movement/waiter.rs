use crate::telemetry::{TelemetryMessage, TelemetrySink};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, trace};

struct Waiter {
    id: u64,
    seen_moving: bool,
    require_moving: bool,
    sender: oneshot::Sender<()>,
}

impl Waiter {
    /// Feed one telemetry sample; returns true once the waiter is satisfied
    fn observe(&mut self, moving: bool) -> bool {
        if moving {
            self.seen_moving = true;
            false
        } else {
            self.seen_moving || !self.require_moving
        }
    }
}

/// Pending registration for one movement, resolved at most once.
///
/// Dropping the ticket removes its waiter from the registry.
#[derive(Debug)]
pub struct WaiterTicket {
    address: String,
    id: u64,
    receiver: oneshot::Receiver<()>,
    registry: Weak<MovementWaiters>,
}

impl WaiterTicket {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn receiver(&mut self) -> &mut oneshot::Receiver<()> {
        &mut self.receiver
    }
}

impl Drop for WaiterTicket {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.cancel(&self.address, self.id) {
                trace!("Dropped movement waiter {} for {}", self.id, self.address);
            }
        }
    }
}

/// Movement waiters keyed by actuator address
pub struct MovementWaiters {
    waiters: Mutex<HashMap<String, Vec<Waiter>>>,
    next_id: AtomicU64,
}

impl MovementWaiters {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a waiter for the next completed movement of `address`
    pub fn register(self: &Arc<Self>, address: &str, require_moving: bool) -> WaiterTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();

        let mut waiters = self.waiters.lock();
        let pending = waiters.entry(address.to_string()).or_default();
        pending.retain(|waiter| !waiter.sender.is_closed());
        pending.push(Waiter {
            id,
            seen_moving: false,
            require_moving,
            sender,
        });
        drop(waiters);

        trace!("Registered movement waiter {} for {}", id, address);

        WaiterTicket {
            address: address.to_string(),
            id,
            receiver,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove a waiter without resolving it
    pub fn cancel(&self, address: &str, id: u64) -> bool {
        let mut waiters = self.waiters.lock();
        let Some(pending) = waiters.get_mut(address) else {
            return false;
        };

        let before = pending.len();
        pending.retain(|waiter| waiter.id != id);
        let removed = pending.len() != before;

        if pending.is_empty() {
            waiters.remove(address);
        }
        removed
    }

    /// Apply one telemetry sample to every waiter of its address.
    ///
    /// Returns the number of waiters resolved by this sample.
    pub fn resolve(&self, message: &TelemetryMessage) -> usize {
        let mut waiters = self.waiters.lock();
        let Some(pending) = waiters.get_mut(&message.address) else {
            return 0;
        };

        let mut resolved = 0;
        let mut remaining = Vec::with_capacity(pending.len());

        for mut waiter in pending.drain(..) {
            if waiter.sender.is_closed() {
                continue;
            }

            if waiter.observe(message.moving) {
                if waiter.sender.send(()).is_ok() {
                    resolved += 1;
                }
            } else {
                remaining.push(waiter);
            }
        }

        if remaining.is_empty() {
            waiters.remove(&message.address);
        } else {
            *pending = remaining;
        }

        if resolved > 0 {
            debug!(
                "Movement of {} completed, resolved {} waiter(s)",
                message.address, resolved
            );
        }
        resolved
    }

    pub fn pending(&self, address: &str) -> usize {
        self.waiters
            .lock()
            .get(address)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn total_pending(&self) -> usize {
        self.waiters.lock().values().map(Vec::len).sum()
    }
}

impl Default for MovementWaiters {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for MovementWaiters {
    fn dispatch(&self, message: TelemetryMessage) {
        self.resolve(&message);
    }
}
