//! Per-task detection policy: class labels, overlay colors, decode
//! parameters and the abnormal-status rules.

use npu_core::{DecodeConfig, Detection};

/// BGR color triple, matching the frame buffer layout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Color(pub [u8; 3]);

pub const COLOR_GREEN: Color = Color([0, 255, 0]);
pub const COLOR_RED: Color = Color([0, 0, 255]);
pub const COLOR_ORANGE: Color = Color([0, 100, 255]);
pub const COLOR_YELLOW: Color = Color([0, 255, 255]);
pub const COLOR_CYAN: Color = Color([255, 255, 0]);
pub const COLOR_WHITE: Color = Color([255, 255, 255]);

/// One of the supported detection workloads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TaskKind {
    Helmet,
    Flame,
    Smoking,
    Face,
    Meter,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Helmet,
        TaskKind::Flame,
        TaskKind::Smoking,
        TaskKind::Face,
        TaskKind::Meter,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Helmet => "helmet",
            TaskKind::Flame => "flame",
            TaskKind::Smoking => "smoking",
            TaskKind::Face => "face",
            TaskKind::Meter => "meter",
        }
    }

    pub fn window_title(self) -> String {
        format!("{} Detection", self.name())
    }

    /// Decode thresholds for this task's model family.
    pub fn decode_config(self) -> DecodeConfig {
        match self {
            TaskKind::Helmet => DecodeConfig {
                class_count: 2,
                conf_thresh: 0.25,
                nms_thresh: 0.45,
            },
            TaskKind::Flame => DecodeConfig {
                class_count: 1,
                conf_thresh: 0.25,
                nms_thresh: 0.45,
            },
            TaskKind::Smoking => DecodeConfig {
                class_count: 3,
                conf_thresh: 0.5,
                nms_thresh: 0.45,
            },
            TaskKind::Face => DecodeConfig {
                class_count: 3,
                conf_thresh: 0.5,
                nms_thresh: 0.5,
            },
            TaskKind::Meter => DecodeConfig {
                class_count: 1,
                conf_thresh: 0.25,
                nms_thresh: 0.45,
            },
        }
    }

    /// Semantic label for a class id, or `None` for ids this task does not
    /// know — those detections are dropped, not rendered.
    pub fn class_label(self, class_id: i64) -> Option<&'static str> {
        match (self, class_id) {
            (TaskKind::Helmet, 0) => Some("no_helmet"),
            (TaskKind::Helmet, 1) => Some("helmet"),
            (TaskKind::Flame, 0) => Some("flame"),
            (TaskKind::Smoking, 0) => Some("cigarette"),
            (TaskKind::Smoking, 1) => Some("face"),
            (TaskKind::Smoking, 2) => Some("smoking"),
            (TaskKind::Face, 0..=2) => Some("face"),
            (TaskKind::Meter, 0) => Some("meter"),
            _ => None,
        }
    }

    /// Overlay color for a class id.
    pub fn class_color(self, class_id: i64) -> Color {
        match (self, class_id) {
            (TaskKind::Helmet, 0) => COLOR_RED,
            (TaskKind::Helmet, _) => COLOR_GREEN,
            (TaskKind::Flame, _) => COLOR_ORANGE,
            (TaskKind::Smoking, 0) => COLOR_YELLOW,
            (TaskKind::Smoking, 1) => COLOR_CYAN,
            (TaskKind::Smoking, _) => COLOR_RED,
            (TaskKind::Face, _) => COLOR_CYAN,
            (TaskKind::Meter, _) => COLOR_YELLOW,
        }
    }

    /// Whether this batch of detections counts as the task's abnormal state.
    /// Helmet flags the presence of a bare head; every other task flags any
    /// detection at all.
    pub fn is_abnormal(self, detections: &[Detection]) -> bool {
        match self {
            TaskKind::Helmet => detections.iter().any(|d| d.class_id == 0),
            _ => !detections.is_empty(),
        }
    }

    /// Operator-facing status line for the window overlay.
    pub fn status_text(self, abnormal: bool) -> &'static str {
        match (self, abnormal) {
            (TaskKind::Helmet, true) => "Hardhat: No Hardhat Detected!",
            (TaskKind::Helmet, false) => "Hardhat: Normal",
            (TaskKind::Flame, true) => "Fire Detected!",
            (TaskKind::Flame, false) => "Fire: Normal",
            (TaskKind::Smoking, true) => "Smoking: Detected!",
            (TaskKind::Smoking, false) => "Smoking: Normal",
            (TaskKind::Face, true) => "Face: Detected",
            (TaskKind::Face, false) => "Face: No face",
            (TaskKind::Meter, true) => "Meter: Detected",
            (TaskKind::Meter, false) => "Meter: Not Detected",
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "helmet" => Ok(TaskKind::Helmet),
            "flame" => Ok(TaskKind::Flame),
            "smoking" => Ok(TaskKind::Smoking),
            "face" => Ok(TaskKind::Face),
            "meter" => Ok(TaskKind::Meter),
            other => Err(format!("unknown task {other:?}")),
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: i64) -> Detection {
        Detection {
            bbox: [0.0, 0.0, 10.0, 10.0],
            score: 0.9,
            class_id,
        }
    }

    #[test]
    fn helmet_labels_and_colors_follow_class_semantics() {
        assert_eq!(TaskKind::Helmet.class_label(0), Some("no_helmet"));
        assert_eq!(TaskKind::Helmet.class_color(0), COLOR_RED);
        assert_eq!(TaskKind::Helmet.class_label(1), Some("helmet"));
        assert_eq!(TaskKind::Helmet.class_color(1), COLOR_GREEN);
    }

    #[test]
    fn unknown_class_ids_are_dropped() {
        assert_eq!(TaskKind::Helmet.class_label(7), None);
        assert_eq!(TaskKind::Flame.class_label(1), None);
        assert_eq!(TaskKind::Smoking.class_label(3), None);
    }

    #[test]
    fn helmet_is_abnormal_only_on_bare_heads() {
        assert!(TaskKind::Helmet.is_abnormal(&[det(0)]));
        assert!(!TaskKind::Helmet.is_abnormal(&[det(1)]));
        assert!(TaskKind::Helmet.is_abnormal(&[det(1), det(0)]));
        assert!(!TaskKind::Helmet.is_abnormal(&[]));
    }

    #[test]
    fn other_tasks_flag_any_detection() {
        assert!(TaskKind::Flame.is_abnormal(&[det(0)]));
        assert!(!TaskKind::Flame.is_abnormal(&[]));
        assert!(TaskKind::Face.is_abnormal(&[det(2)]));
    }

    #[test]
    fn task_names_round_trip() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.name().parse::<TaskKind>().unwrap(), kind);
        }
    }
}
