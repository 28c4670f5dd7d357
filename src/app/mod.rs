mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use orchestrator::FleetOrchestrator;
pub use types::{ComponentState, ShutdownReason, COMPONENTS};
