//! Live frame sessions: one decode pipeline per device, shared by every
//! requester of that device's current image.

mod decoder;
mod extractor;
mod manager;
mod session;


pub use decoder::{DecoderHandle, DecoderLauncher, FfmpegLauncher};
pub use extractor::{FrameExtractor, EOI, SOI};
pub use manager::FrameSessionManager;
pub use session::{FrameEvent, FrameSession, RetireReason};
