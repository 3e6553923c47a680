//! Shared data types exposed by the video ingest layer.

use std::sync::Arc;

use thiserror::Error;

/// Immutable captured frame.
///
/// The pixel buffer sits behind an [`Arc`] so that one capture can be handed
/// to every subscriber without copying; clones share the same payload. The
/// buffer is never written after the frame is published.
#[derive(Clone)]
pub struct Frame {
    /// Frame pixel buffer in the layout declared by [`FrameFormat`].
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels.
    pub width: i32,
    /// Frame height in pixels.
    pub height: i32,
    /// Monotonic id assigned by the capture loop, strictly increasing per
    /// stream. Downstream gaps mean drops, never reordering.
    pub id: u64,
    /// Capture timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// Format descriptor explaining how to interpret [`Frame::data`].
    pub format: FrameFormat,
}

impl Frame {
    /// Byte length expected for this frame's geometry and format.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.channels()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
/// Supported pixel formats emitted by the capture layer.
pub enum FrameFormat {
    /// Packed BGR (24-bit), the layout produced by V4L2/OpenCV readers.
    Bgr8,
}

impl FrameFormat {
    pub fn channels(self) -> usize {
        match self {
            FrameFormat::Bgr8 => 3,
        }
    }
}

/// Capture geometry and rate requested from the device, plus the acceptance
/// floor used by the open-time throughput probe.
#[derive(Clone, Copy, Debug)]
pub struct CaptureSettings {
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    /// Number of reads used to measure real throughput after configuration.
    pub probe_frames: u32,
    /// Candidates measuring below this are rejected and the next device id
    /// is tried.
    pub min_fps: f64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
            probe_frames: 60,
            min_fps: 25.0,
        }
    }
}

#[derive(Debug, Error)]
/// Errors that can arise while configuring or driving capture pipelines.
pub enum CaptureError {
    /// No candidate device could be opened and configured.
    #[error("no usable camera device (requested id {requested})")]
    NoDevice { requested: i32 },
    /// A single device failed to open; callers usually fall through to the
    /// next candidate.
    #[error("failed to open camera device {device}")]
    Open { device: i32 },
    /// The device opened but sustained throughput was below the floor.
    #[error("camera device {device} measured {measured:.1} fps, below the {floor:.1} fps floor")]
    Throughput {
        device: i32,
        measured: f64,
        floor: f64,
    },
    /// Subscription attempted before the hub owns an open device.
    #[error("camera hub is not ready (open a device first)")]
    NotReady,
    /// The referenced subscription does not exist (or was reaped).
    #[error("unknown camera client {0}")]
    UnknownClient(u64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
