/// Component lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Why the fleet core is shutting down
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
}

/// Components managed by the orchestrator, in start order
pub const COMPONENTS: [&str; 5] = ["telemetry", "health", "frames", "patrol", "http"];
