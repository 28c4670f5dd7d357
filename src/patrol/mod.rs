mod aim;
mod detector;
mod patroller;

#[cfg(test)]
mod tests;

pub use aim::{angle_adjustment, jpeg_dimensions, FieldOfView, FALLBACK_DIMENSIONS};
pub use detector::{BirdDetector, BoundingBox, Detection, DetectionReport, BIRD_CLASS};
pub use patroller::{PatrolOutcome, PatrolReport, PatrolStep, Patroller, ShotKind, SkipReason};
