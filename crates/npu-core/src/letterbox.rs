//! Aspect-preserving fit of a camera frame into the model's square input.
//!
//! The frame is scaled to fit and centred on a neutral background; the
//! resulting transform travels with the inference call so detections can be
//! mapped back to original-frame coordinates.

use crate::{ImageView, NpuError};

/// Pad color used for the unused border of the model input.
const PAD_VALUE: u8 = 114;

/// Parameters of one letterbox transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub x_pad: i32,
    pub y_pad: i32,
}

impl Letterbox {
    /// Map a box from model-input coordinates back onto the original frame.
    pub fn unmap_box(&self, bbox: [f32; 4], frame_w: i32, frame_h: i32) -> [f32; 4] {
        let unmap = |v: f32, pad: i32, limit: i32| {
            ((v - pad as f32) / self.scale).clamp(0.0, (limit - 1).max(0) as f32)
        };
        [
            unmap(bbox[0], self.x_pad, frame_w),
            unmap(bbox[1], self.y_pad, frame_h),
            unmap(bbox[2], self.x_pad, frame_w),
            unmap(bbox[3], self.y_pad, frame_h),
        ]
    }
}

/// Scale `image` into the square `dst` buffer (side `dst_side`, packed
/// 3-channel), padding the remainder. BGR input is swapped to RGB on the
/// way through, which is what the detection models expect.
pub fn letterbox_into(
    image: ImageView<'_>,
    dst: &mut [u8],
    dst_side: usize,
) -> Result<Letterbox, NpuError> {
    let (src_w, src_h) = (image.width as usize, image.height as usize);
    if src_w == 0 || src_h == 0 {
        return Err(NpuError::BadImage("zero-sized frame".into()));
    }
    if image.channels != 3 {
        return Err(NpuError::BadImage(format!(
            "expected 3 channels, got {}",
            image.channels
        )));
    }
    if image.data.len() < src_w * src_h * 3 {
        return Err(NpuError::BadImage(format!(
            "buffer {} bytes, geometry needs {}",
            image.data.len(),
            src_w * src_h * 3
        )));
    }
    if dst.len() != dst_side * dst_side * 3 {
        return Err(NpuError::BadImage(format!(
            "input buffer {} bytes, model needs {}",
            dst.len(),
            dst_side * dst_side * 3
        )));
    }

    let scale = (dst_side as f32 / src_w as f32).min(dst_side as f32 / src_h as f32);
    let out_w = ((src_w as f32 * scale) as usize).max(1).min(dst_side);
    let out_h = ((src_h as f32 * scale) as usize).max(1).min(dst_side);
    let x_pad = (dst_side - out_w) / 2;
    let y_pad = (dst_side - out_h) / 2;

    dst.fill(PAD_VALUE);

    for oy in 0..out_h {
        let sy = ((oy as f32 / scale) as usize).min(src_h - 1);
        let src_row = &image.data[sy * src_w * 3..(sy + 1) * src_w * 3];
        let dst_row_start = ((y_pad + oy) * dst_side + x_pad) * 3;
        let dst_row = &mut dst[dst_row_start..dst_row_start + out_w * 3];
        for ox in 0..out_w {
            let sx = ((ox as f32 / scale) as usize).min(src_w - 1);
            // BGR -> RGB channel swap.
            dst_row[ox * 3] = src_row[sx * 3 + 2];
            dst_row[ox * 3 + 1] = src_row[sx * 3 + 1];
            dst_row[ox * 3 + 2] = src_row[sx * 3];
        }
    }

    Ok(Letterbox {
        scale,
        x_pad: x_pad as i32,
        y_pad: y_pad as i32,
    })
}
