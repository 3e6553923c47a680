//! Canonical pipeline configuration shared by every stage.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use npu_core::NpuCore;
use video_ingest::CaptureSettings;

use crate::pipeline::tasks::TaskKind;

/// One detection task: which workload, and which model artifact backs it.
#[derive(Clone, Debug)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub model_path: PathBuf,
}

/// Validated configuration for a pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub tasks: Vec<TaskSpec>,
    /// Preferred camera device id; the hub falls back over 0..=5.
    pub camera_id: i32,
    /// Per-consumer queue depth for the fan-out buffer and hub clients.
    pub queue_depth: usize,
    /// Workers per task, one model context each. Defaults to the number of
    /// accelerator cores.
    pub workers_per_task: usize,
    pub capture: CaptureSettings,
    /// Interval between aggregate status lines on stdout.
    pub status_interval: Duration,
    /// Take the advisory device lockfile before opening the camera.
    pub lock_device: bool,
}

impl PipelineConfig {
    pub fn new(tasks: Vec<TaskSpec>) -> Result<Self> {
        if tasks.is_empty() {
            bail!("no detection task configured; pass at least one of --helmet/--flame/--smoking/--face/--meter");
        }
        for (i, task) in tasks.iter().enumerate() {
            if tasks[..i].iter().any(|t| t.kind == task.kind) {
                bail!("task {} configured twice", task.kind);
            }
        }
        Ok(Self {
            tasks,
            camera_id: 0,
            queue_depth: 5,
            workers_per_task: NpuCore::COUNT,
            capture: CaptureSettings::default(),
            status_interval: Duration::from_secs(5),
            lock_device: false,
        })
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.kind.name()).collect()
    }
}
