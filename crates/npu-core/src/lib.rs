//! NPU inference layer: a thin adapter over the vendor RKNN runtime plus the
//! detection decoding shared by every task.
//!
//! The worker pools in the application consume the [`ModelRuntime`] trait,
//! never the vendor API directly, so the concurrency core can be exercised
//! with deterministic fakes on machines without the accelerator.

pub mod decode;
pub mod detector;
pub mod letterbox;
pub mod rknn;

use thiserror::Error;

pub use decode::DecodeConfig;
pub use detector::Detector;
pub use letterbox::Letterbox;

/// One accelerator core of the NPU. The device exposes three; throughput
/// scales by pinning distinct model instances to distinct cores.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NpuCore {
    Auto,
    Core0,
    Core1,
    Core2,
}

impl NpuCore {
    pub const COUNT: usize = 3;

    /// Core for a worker index, wrapping over the available cores.
    pub fn for_worker(index: usize) -> Self {
        match index % Self::COUNT {
            0 => NpuCore::Core0,
            1 => NpuCore::Core1,
            _ => NpuCore::Core2,
        }
    }

    /// Vendor core-mask value.
    pub fn mask(self) -> u32 {
        match self {
            NpuCore::Auto => 0,
            NpuCore::Core0 => 1,
            NpuCore::Core1 => 2,
            NpuCore::Core2 => 4,
        }
    }

    pub fn index(self) -> usize {
        match self {
            NpuCore::Auto | NpuCore::Core0 => 0,
            NpuCore::Core1 => 1,
            NpuCore::Core2 => 2,
        }
    }
}

/// Single detection in original-frame pixel coordinates.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Bounding box stored as `[x1, y1, x2, y2]`.
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: i64,
}

/// Result of one inference call.
#[derive(Debug, Clone, Default)]
pub struct DetectionBatch {
    pub detections: Vec<Detection>,
    /// Wall-clock inference plus decode time, milliseconds.
    pub latency_ms: f64,
    /// Index of the accelerator core that ran the call.
    pub core_index: usize,
    /// Id of the frame this batch was computed from; assigned by the caller.
    pub frame_id: u64,
}

/// Borrowed view of a frame's pixel buffer handed to inference. No copy is
/// made until the letterbox transform writes into the model input buffer.
#[derive(Clone, Copy)]
pub struct ImageView<'a> {
    pub data: &'a [u8],
    pub width: i32,
    pub height: i32,
    pub channels: usize,
}

/// One loaded model instance bound to one accelerator core.
///
/// Implementations are exclusive resources: they are `Send` but not shared,
/// and no two concurrent calls may go through the same instance.
pub trait ModelRuntime: Send {
    fn infer(&mut self, image: ImageView<'_>) -> Result<DetectionBatch, NpuError>;
    fn core(&self) -> NpuCore;
}

#[derive(Debug, Error)]
pub enum NpuError {
    /// The vendor runtime library could not be loaded. Fatal.
    #[error("NPU runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    /// The model file could not be read. Fatal at task init.
    #[error("failed to read model {path}: {source}")]
    ModelRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The runtime rejected the model or a configuration call. Fatal.
    #[error("{op} failed with runtime code {code}")]
    Runtime { op: &'static str, code: i32 },
    /// The model loaded but its tensor layout is not one we can decode.
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
    /// A single inference call failed; the frame is dropped and the worker
    /// carries on.
    #[error("inference failed with runtime code {0}")]
    Infer(i32),
    /// The input frame does not match the declared geometry.
    #[error("bad input image: {0}")]
    BadImage(String),
}
