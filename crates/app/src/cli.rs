//! Command line surface.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::pipeline::{
    config::{PipelineConfig, TaskSpec},
    tasks::TaskKind,
};

/// Multi-task camera detection for NPU-equipped SoCs.
///
/// Each task flag declares one detection workload and the model artifact
/// backing it; every configured task gets its own worker pool and output
/// window. At least one task is required.
#[derive(Debug, Parser)]
#[command(name = "sitewatch", version, about)]
pub struct Cli {
    /// Helmet detection model (class 0: no_helmet, class 1: helmet).
    #[arg(long, value_name = "MODEL")]
    pub helmet: Option<PathBuf>,

    /// Flame detection model.
    #[arg(long, value_name = "MODEL")]
    pub flame: Option<PathBuf>,

    /// Smoking detection model (cigarette/face/smoking classes).
    #[arg(long, value_name = "MODEL")]
    pub smoking: Option<PathBuf>,

    /// Face detection model.
    #[arg(long, value_name = "MODEL")]
    pub face: Option<PathBuf>,

    /// Meter detection model.
    #[arg(long, value_name = "MODEL")]
    pub meter: Option<PathBuf>,

    /// Preferred camera device id; ids 0..=5 are probed as fallback.
    #[arg(long, default_value_t = 0)]
    pub camera: i32,

    /// Per-consumer frame queue depth.
    #[arg(long, default_value_t = 5)]
    pub buffer: usize,

    /// Coordinate camera ownership with other processes via a pid lockfile.
    #[arg(long)]
    pub lock_device: bool,
}

impl Cli {
    pub fn into_config(self) -> Result<PipelineConfig> {
        let mut tasks = Vec::new();
        let declared = [
            (TaskKind::Helmet, self.helmet),
            (TaskKind::Flame, self.flame),
            (TaskKind::Smoking, self.smoking),
            (TaskKind::Face, self.face),
            (TaskKind::Meter, self.meter),
        ];
        for (kind, model_path) in declared {
            if let Some(model_path) = model_path {
                tasks.push(TaskSpec { kind, model_path });
            }
        }
        let mut config = PipelineConfig::new(tasks)?;
        config.camera_id = self.camera;
        config.queue_depth = self.buffer.max(1);
        config.lock_device = self.lock_device;
        Ok(config)
    }
}
