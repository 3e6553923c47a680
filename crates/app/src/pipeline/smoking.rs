//! Temporal guard for the smoking task.
//!
//! Single-frame evidence for smoking is noisy: a cigarette box flickering in
//! and out, a face alone, a false smoking hit. The guard smooths over a
//! sliding window of recent frames and reports smoking only when either the
//! direct signal fires or the face+cigarette co-occurrence has persisted.
//! The displayed status is stricter than the per-frame report: it requires a
//! full window of decisions at a higher ratio, so the overlay does not
//! flicker on the first positive frame.

use std::collections::VecDeque;

/// Sliding window length, in frames.
const WINDOW: usize = 10;
/// Co-occurrence ratio that promotes face+cigarette into a smoking report.
const COMBO_RATIO: f64 = 0.6;
/// Minimum samples before the co-occurrence ratio is meaningful.
const COMBO_MIN_SAMPLES: usize = 5;
/// Decision ratio over a full window required for the displayed status.
const DISPLAY_RATIO: f64 = 0.7;

/// Outcome of one guard update.
#[derive(Clone, Copy, Debug, Default)]
pub struct SmokingVerdict {
    /// The task's per-frame report: direct smoking this frame, or sustained
    /// face+cigarette co-occurrence.
    pub reported: bool,
    /// The stricter status shown on the overlay.
    pub displayed: bool,
    pub combo_ratio: f64,
    pub decision_ratio: f64,
}

#[derive(Default)]
pub struct SmokingGuard {
    combo_history: VecDeque<bool>,
    decision_history: VecDeque<bool>,
}

impl SmokingGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one frame's class presence into the window and decide.
    pub fn update(&mut self, has_face: bool, has_cigarette: bool, has_smoking: bool) -> SmokingVerdict {
        push_bounded(&mut self.combo_history, has_face && has_cigarette);
        let combo_ratio = ratio(&self.combo_history);

        let reported = has_smoking
            || (combo_ratio >= COMBO_RATIO && self.combo_history.len() >= COMBO_MIN_SAMPLES);

        push_bounded(&mut self.decision_history, reported);
        let decision_ratio = ratio(&self.decision_history);
        let displayed = self.decision_history.len() >= WINDOW && decision_ratio >= DISPLAY_RATIO;

        SmokingVerdict {
            reported,
            displayed,
            combo_ratio,
            decision_ratio,
        }
    }
}

fn push_bounded(history: &mut VecDeque<bool>, value: bool) {
    history.push_back(value);
    while history.len() > WINDOW {
        history.pop_front();
    }
}

fn ratio(history: &VecDeque<bool>) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    history.iter().filter(|&&v| v).count() as f64 / history.len() as f64
}
