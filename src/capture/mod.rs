mod collaborators;
mod cv_client;
mod orchestrator;
#[cfg(feature = "local_zoom")]
mod rescale;


pub use collaborators::{FrameGrabber, ImageRescaler};
pub use cv_client::CvServiceClient;
pub use orchestrator::{CapturedImage, RouteCaptureOrchestrator, RouteCaptureReport};
#[cfg(feature = "local_zoom")]
pub use rescale::CenterCropRescaler;
