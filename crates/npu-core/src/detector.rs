//! RKNN-backed implementation of [`ModelRuntime`].

use std::{path::Path, time::Instant};

use tracing::debug;

use crate::{
    DetectionBatch, ImageView, ModelRuntime, NpuCore, NpuError,
    decode::{DecodeConfig, decode_outputs},
    letterbox::letterbox_into,
    rknn::RknnContext,
};

/// One detection model instance pinned to one accelerator core.
pub struct Detector {
    ctx: RknnContext,
    core: NpuCore,
    decode: DecodeConfig,
    input_side: usize,
    /// Reused letterbox target buffer; overwritten per call.
    input_buf: Vec<u8>,
}

impl Detector {
    /// Load the model, validate its layout and pin the context to `core`.
    pub fn load(model_path: &Path, core: NpuCore, decode: DecodeConfig) -> Result<Self, NpuError> {
        let mut ctx = RknnContext::from_file(model_path)?;
        ctx.bind_core(core)?;

        let (w, h) = ctx.input_size()?;
        if w != h {
            return Err(NpuError::UnsupportedModel(format!(
                "expected a square input, model wants {w}x{h}"
            )));
        }
        if ctx.output_count() % 3 != 0 {
            return Err(NpuError::UnsupportedModel(format!(
                "expected 3 detection branches, model has {} outputs",
                ctx.output_count()
            )));
        }
        debug!(
            "detector ready on core {} (input {w}x{w}, {} classes)",
            core.index(),
            decode.class_count
        );

        Ok(Self {
            ctx,
            core,
            decode,
            input_side: w,
            input_buf: vec![0u8; w * w * 3],
        })
    }

    pub fn input_side(&self) -> usize {
        self.input_side
    }
}

impl ModelRuntime for Detector {
    fn infer(&mut self, image: ImageView<'_>) -> Result<DetectionBatch, NpuError> {
        let started = Instant::now();

        let letterbox = letterbox_into(image, &mut self.input_buf, self.input_side)?;
        let outputs = self.ctx.run_rgb888(&self.input_buf)?;
        let mut detections = decode_outputs(&outputs, self.input_side, &self.decode)?;
        for det in &mut detections {
            det.bbox = letterbox.unmap_box(det.bbox, image.width, image.height);
        }

        Ok(DetectionBatch {
            detections,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            core_index: self.core.index(),
            frame_id: 0,
        })
    }

    fn core(&self) -> NpuCore {
        self.core
    }
}
