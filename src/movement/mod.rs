mod coordinator;
mod waiter;


pub use coordinator::{MovementCoordinator, MovementHandle, MovementOutcome};
pub use waiter::{MovementWaiters, WaiterTicket};
