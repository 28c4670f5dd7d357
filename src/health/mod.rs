mod probe;
mod reconciler;

#[cfg(test)]
mod tests;

pub use probe::{HealthProbe, PingProbe};
pub use reconciler::{
    reconcile_axis, DeviceCheck, DeviceSummary, FleetSummary, HealthReconciler, ScanReport,
};
