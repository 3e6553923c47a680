//! Camera ingest layer: capture backends, the shared camera hub and the
//! per-consumer frame fan-out.

pub mod backend;
pub mod fanout;
pub mod hub;
pub mod lockfile;
pub mod queue;
mod types;

#[cfg(feature = "with-opencv")]
mod opencv;

pub use backend::{CaptureBackend, CapturedImage};
pub use fanout::FanOutBuffer;
pub use hub::{CameraHub, ClientId, HubStats};
pub use lockfile::DeviceLock;
pub use queue::{FrameQueue, PollOutcome};
pub use types::{CaptureError, CaptureSettings, Frame, FrameFormat};

#[cfg(feature = "with-opencv")]
pub use crate::opencv::OpenCvCapture;
