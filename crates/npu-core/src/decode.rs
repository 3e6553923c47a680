//! Decoding of YOLOv8-style detection heads.
//!
//! The models ship three detection branches (strides 8/16/32). Each branch
//! contributes a regression tensor of 4x16 distribution bins (DFL) and a
//! per-class score tensor; some model exports add a third score-sum tensor
//! per branch, which is ignored here. Score tensors are post-sigmoid in
//! these graphs, so values compare directly against the confidence
//! threshold.

use crate::{Detection, NpuError, rknn::OutputTensor};

const DFL_BINS: usize = 16;
const BRANCHES: usize = 3;

/// Per-task decode parameters.
#[derive(Clone, Copy, Debug)]
pub struct DecodeConfig {
    pub class_count: usize,
    pub conf_thresh: f32,
    pub nms_thresh: f32,
}

/// Decode raw output tensors into detections in model-input coordinates.
pub fn decode_outputs(
    outputs: &[OutputTensor],
    input_side: usize,
    config: &DecodeConfig,
) -> Result<Vec<Detection>, NpuError> {
    if outputs.is_empty() || outputs.len() % BRANCHES != 0 {
        return Err(NpuError::UnsupportedModel(format!(
            "expected a multiple of {BRANCHES} output tensors, got {}",
            outputs.len()
        )));
    }
    let per_branch = outputs.len() / BRANCHES;
    if per_branch != 2 && per_branch != 3 {
        return Err(NpuError::UnsupportedModel(format!(
            "unexpected {per_branch} tensors per detection branch"
        )));
    }

    let mut detections = Vec::new();
    for branch in 0..BRANCHES {
        let reg = &outputs[branch * per_branch];
        let cls = &outputs[branch * per_branch + 1];
        decode_branch(reg, cls, input_side, config, &mut detections)?;
    }
    non_max_suppress(&mut detections, config.nms_thresh);
    Ok(detections)
}

fn decode_branch(
    reg: &OutputTensor,
    cls: &OutputTensor,
    input_side: usize,
    config: &DecodeConfig,
    out: &mut Vec<Detection>,
) -> Result<(), NpuError> {
    let (map_h, map_w) = spatial_dims(reg)?;
    let spatial = map_h * map_w;
    if reg.data.len() < 4 * DFL_BINS * spatial {
        return Err(NpuError::UnsupportedModel(format!(
            "regression tensor too small: {} for {map_w}x{map_h}",
            reg.data.len()
        )));
    }
    if cls.data.len() < config.class_count * spatial {
        return Err(NpuError::UnsupportedModel(format!(
            "score tensor too small: {} for {} classes at {map_w}x{map_h}",
            cls.data.len(),
            config.class_count
        )));
    }
    let stride = input_side as f32 / map_h as f32;
    let limit = input_side as f32;

    for gy in 0..map_h {
        for gx in 0..map_w {
            let idx = gy * map_w + gx;

            let (score, class_id) = best_class(&cls.data, spatial, idx, config.class_count);
            if score < config.conf_thresh {
                continue;
            }

            let mut sides = [0f32; 4];
            for (side, dist) in sides.iter_mut().enumerate() {
                *dist = dfl_expectation(&reg.data, spatial, idx, side);
            }

            let cx = gx as f32 + 0.5;
            let cy = gy as f32 + 0.5;
            let x1 = ((cx - sides[0]) * stride).clamp(0.0, limit);
            let y1 = ((cy - sides[1]) * stride).clamp(0.0, limit);
            let x2 = ((cx + sides[2]) * stride).clamp(0.0, limit);
            let y2 = ((cy + sides[3]) * stride).clamp(0.0, limit);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }

            out.push(Detection {
                bbox: [x1, y1, x2, y2],
                score,
                class_id: class_id as i64,
            });
        }
    }
    Ok(())
}

fn spatial_dims(tensor: &OutputTensor) -> Result<(usize, usize), NpuError> {
    match tensor.dims.as_slice() {
        [1, _c, h, w] => Ok((*h as usize, *w as usize)),
        dims => Err(NpuError::UnsupportedModel(format!(
            "unexpected output layout {dims:?}"
        ))),
    }
}

fn best_class(scores: &[f32], spatial: usize, idx: usize, classes: usize) -> (f32, usize) {
    let mut best = f32::MIN;
    let mut best_class = 0;
    for class in 0..classes {
        let value = scores[class * spatial + idx];
        if value > best {
            best = value;
            best_class = class;
        }
    }
    (best, best_class)
}

/// Expected value of one side's 16-bin distance distribution (softmax over
/// the bins, then the probability-weighted bin index), in grid units.
fn dfl_expectation(reg: &[f32], spatial: usize, idx: usize, side: usize) -> f32 {
    let mut max_logit = f32::MIN;
    for bin in 0..DFL_BINS {
        max_logit = max_logit.max(reg[(side * DFL_BINS + bin) * spatial + idx]);
    }
    let mut denom = 0f32;
    let mut weighted = 0f32;
    for bin in 0..DFL_BINS {
        let p = (reg[(side * DFL_BINS + bin) * spatial + idx] - max_logit).exp();
        denom += p;
        weighted += p * bin as f32;
    }
    weighted / denom
}

/// Class-aware non-maximum suppression, highest score first.
fn non_max_suppress(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections.drain(..) {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == det.class_id && iou(&k.bbox, &det.bbox) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }
    *detections = kept;
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    inter / (area_a + area_b - inter + 1e-6)
}
