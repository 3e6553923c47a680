//! Overlay drawing on raw BGR frame buffers.
//!
//! Workers clone the shared capture buffer and draw straight into the clone;
//! nothing here touches a windowing or image library, so annotation runs in
//! any build and any thread.

use video_ingest::Frame;

use crate::pipeline::{
    display::AnnotatedFrame,
    tasks::{COLOR_WHITE, Color},
};

/// Glyph cell advance in pixels (5px glyph + 1px spacing).
const CHAR_ADVANCE: i32 = 6;
const CHAR_HEIGHT: i32 = 7;

/// One box ready for rendering, already mapped to frame coordinates and
/// labelled by the task policy.
pub struct LabeledBox {
    pub bbox: [f32; 4],
    pub label: &'static str,
    pub color: Color,
    pub score: f32,
}

/// Text block drawn in the window corner.
pub struct Overlay {
    pub status: String,
    pub status_color: Color,
    pub fps: f64,
    pub detections: u64,
    pub queue_depth: usize,
    pub latency_ms: f64,
    pub core_index: usize,
}

/// Clone the frame's pixels and draw boxes plus the status overlay.
pub fn annotate(frame: &Frame, boxes: &[LabeledBox], overlay: &Overlay) -> AnnotatedFrame {
    let mut data = frame.data.as_ref().clone();
    {
        let mut canvas = Canvas::new(&mut data, frame.width, frame.height);
        for b in boxes {
            let x1 = b.bbox[0].round() as i32;
            let y1 = b.bbox[1].round() as i32;
            let x2 = b.bbox[2].round() as i32;
            let y2 = b.bbox[3].round() as i32;
            canvas.draw_rectangle(x1, y1, x2, y2, b.color, 2);
            let label = format!("{} {:.0}%", b.label, f64::from(b.score) * 100.0);
            canvas.draw_label(x1, (y1 - CHAR_HEIGHT - 3).max(0), &label, b.color);
        }

        canvas.draw_label(10, 10, &overlay.status, overlay.status_color);
        canvas.draw_label(
            10,
            22,
            &format!("FPS: {:.1} | Detections: {}", overlay.fps, overlay.detections),
            COLOR_WHITE,
        );
        canvas.draw_label(
            10,
            34,
            &format!(
                "Core: {} | Time: {:.1}ms | Queue: {}",
                overlay.core_index, overlay.latency_ms, overlay.queue_depth
            ),
            COLOR_WHITE,
        );
    }
    AnnotatedFrame {
        data,
        width: frame.width,
        height: frame.height,
        frame_id: frame.id,
    }
}

/// Mutable view over a packed BGR buffer with clipped primitive drawing.
pub struct Canvas<'a> {
    data: &'a mut [u8],
    width: i32,
    height: i32,
}

impl<'a> Canvas<'a> {
    pub fn new(data: &'a mut [u8], width: i32, height: i32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    fn put(&mut self, x: i32, y: i32, color: Color) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let offset = (y * self.width + x) as usize * 3;
        if offset + 3 <= self.data.len() {
            self.data[offset..offset + 3].copy_from_slice(&color.0);
        }
    }

    /// Hollow rectangle with the given border thickness, clipped to the
    /// frame.
    pub fn draw_rectangle(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, color: Color, thickness: i32) {
        for t in 0..thickness.max(1) {
            let (left, top) = (x1 + t, y1 + t);
            let (right, bottom) = (x2 - t, y2 - t);
            if right <= left || bottom <= top {
                break;
            }
            for x in left..=right {
                self.put(x, top, color);
                self.put(x, bottom, color);
            }
            for y in top..=bottom {
                self.put(left, y, color);
                self.put(right, y, color);
            }
        }
    }

    pub fn fill_rect(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, color: Color) {
        for y in y1..=y2 {
            for x in x1..=x2 {
                self.put(x, y, color);
            }
        }
    }

    /// Render text with the built-in 5x7 glyphs, advancing 6px per
    /// character. Lowercase is folded to uppercase; characters without a
    /// glyph render as a hollow cell.
    pub fn draw_label(&mut self, x: i32, y: i32, text: &str, color: Color) {
        let mut cursor = x;
        for ch in text.chars() {
            let glyph = glyph_for(ch.to_ascii_uppercase());
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if bits & (0x10 >> col) != 0 {
                        self.put(cursor + col, y + row as i32, color);
                    }
                }
            }
            cursor += CHAR_ADVANCE;
        }
    }
}

type Glyph = [u8; 7];

fn glyph_for(ch: char) -> Glyph {
    match ch {
        ' ' => [0, 0, 0, 0, 0, 0, 0],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1B, 0x11],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x06, 0x08, 0x10, 0x1F],
        '3' => [0x0E, 0x11, 0x01, 0x06, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x04, 0x04, 0x00, 0x04, 0x04, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        '%' => [0x19, 0x19, 0x02, 0x04, 0x08, 0x13, 0x13],
        '|' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '+' => [0x00, 0x04, 0x04, 0x1F, 0x04, 0x04, 0x00],
        _ => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F],
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use video_ingest::FrameFormat;

    use super::*;
    use crate::pipeline::tasks::COLOR_RED;

    fn frame(width: i32, height: i32) -> Frame {
        Frame {
            data: Arc::new(vec![0u8; (width * height * 3) as usize]),
            width,
            height,
            id: 7,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }
    }

    fn overlay() -> Overlay {
        Overlay {
            status: "Fire: Normal".into(),
            status_color: COLOR_WHITE,
            fps: 12.5,
            detections: 0,
            queue_depth: 1,
            latency_ms: 8.2,
            core_index: 1,
        }
    }

    #[test]
    fn annotation_does_not_touch_the_source_frame() {
        let frame = frame(64, 64);
        let boxes = [LabeledBox {
            bbox: [5.0, 5.0, 30.0, 30.0],
            label: "flame",
            color: COLOR_RED,
            score: 0.9,
        }];
        let annotated = annotate(&frame, &boxes, &overlay());
        assert!(frame.data.iter().all(|&v| v == 0), "source frame mutated");
        assert!(annotated.data.iter().any(|&v| v != 0));
        assert_eq!(annotated.frame_id, 7);
    }

    #[test]
    fn box_edges_land_on_expected_pixels() {
        let frame = frame(16, 16);
        let boxes = [LabeledBox {
            bbox: [2.0, 12.0, 13.0, 15.0],
            label: "x",
            color: COLOR_RED,
            score: 1.0,
        }];
        let annotated = annotate(&frame, &boxes, &overlay());
        let pixel = |x: i32, y: i32| {
            let off = (y * 16 + x) as usize * 3;
            [annotated.data[off], annotated.data[off + 1], annotated.data[off + 2]]
        };
        assert_eq!(pixel(2, 12), COLOR_RED.0);
        assert_eq!(pixel(13, 15), COLOR_RED.0);
        assert_eq!(pixel(8, 13), COLOR_RED.0); // inner border ring (thickness 2)
    }

    #[test]
    fn drawing_out_of_bounds_is_clipped_not_panicking() {
        let frame = frame(8, 8);
        let boxes = [LabeledBox {
            bbox: [-10.0, -10.0, 100.0, 100.0],
            label: "big",
            color: COLOR_RED,
            score: 0.5,
        }];
        let _ = annotate(&frame, &boxes, &overlay());
    }
}
