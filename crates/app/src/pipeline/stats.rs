//! Aggregate status reporting.

use video_ingest::HubStats;

use crate::pipeline::worker::TaskPoolStats;

/// One periodic status line: per-task rates and counters plus the capture
/// side of the world.
pub fn format_status(hub: &HubStats, tasks: &[TaskPoolStats]) -> String {
    let mut parts: Vec<String> = tasks
        .iter()
        .map(|t| {
            format!(
                "{}: {:.1} fps, {} det, q{}{}",
                t.task,
                t.fps,
                t.detections,
                t.queue_depth,
                if t.infer_errors > 0 {
                    format!(", {} err", t.infer_errors)
                } else {
                    String::new()
                }
            )
        })
        .collect();
    parts.push(format!(
        "capture: {} frames, {} dropped reads{}",
        hub.frames_captured,
        hub.read_failures,
        if hub.reopens > 0 {
            format!(", {} reopens", hub.reopens)
        } else {
            String::new()
        }
    ));
    parts.join(" | ")
}

/// Final summary printed once during teardown.
pub fn format_summary(hub: &HubStats, tasks: &[TaskPoolStats]) -> String {
    let mut lines = vec!["=== detection summary ===".to_string()];
    for t in tasks {
        lines.push(format!(
            "{:<8} {:>8} frames  {:>6} detections  {:>4} abnormal  {:>3} errors  ({:.1} fps)",
            t.task.name(),
            t.frames,
            t.detections,
            t.abnormal,
            t.infer_errors,
            t.fps
        ));
    }
    lines.push(format!(
        "capture  {:>8} frames  {:>6} delivered  {:>4} failed reads  {:>3} reopens",
        hub.frames_captured, hub.frames_delivered, hub.read_failures, hub.reopens
    ));
    lines.join("\n")
}
