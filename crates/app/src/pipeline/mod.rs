//! Pipeline supervisor: construction, steady state, drain, teardown.
//!
//! Lifecycle: **Init** wires the camera hub, fan-out, display serializer and
//! one worker pool per task. **Running** pumps frames from the hub into the
//! fan-out and prints periodic aggregate statistics. **Draining** (signal,
//! quit key, or capture fault) stops the display, the pools and the hub, in
//! that order, joining everything. **Terminated** prints the final summary.
//! No thread is ever cancelled; everything winds down off the shared run
//! flag.

pub mod annotation;
pub mod config;
pub mod display;
pub mod flag;
pub mod smoking;
pub mod stats;
pub mod tasks;
pub mod worker;

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use tracing::{error, info};
use video_ingest::{CameraHub, CaptureBackend, DeviceLock, FanOutBuffer, PollOutcome};

use crate::pipeline::{
    config::PipelineConfig,
    display::{DisplayBackend, DisplayServer},
    flag::RunFlag,
    worker::{ModelFactory, TaskPool, TaskPoolStats},
};

pub use crate::pipeline::flag::install_signal_handlers;

/// Poll interval of the distributor thread.
const PUMP_TIMEOUT: Duration = Duration::from_millis(100);
/// Supervisor wake interval while running.
const SUPERVISE_TICK: Duration = Duration::from_millis(200);

pub struct Pipeline {
    config: PipelineConfig,
    run: RunFlag,
    hub: Arc<CameraHub>,
    fanout: Arc<FanOutBuffer>,
    display: DisplayServer,
    pools: Vec<TaskPool>,
    pump: Option<thread::JoinHandle<()>>,
    _device_lock: Option<DeviceLock>,
}

impl Pipeline {
    /// Construct and start every stage. Returns an error on fatal init
    /// problems: no usable camera, or a model that fails to load.
    pub fn build(
        config: PipelineConfig,
        capture: Box<dyn CaptureBackend>,
        display_backend: Box<dyn DisplayBackend>,
        factory: Arc<dyn ModelFactory>,
    ) -> Result<Self> {
        let run = RunFlag::new();

        let device_lock = if config.lock_device {
            Some(
                DeviceLock::acquire(DeviceLock::path_for(config.camera_id))
                    .context("camera is in use by another process")?,
            )
        } else {
            None
        };

        let hub = Arc::new(CameraHub::new(capture));
        hub.open(config.camera_id, config.capture)
            .context("no usable camera")?;
        let client = hub
            .subscribe("distributor", config.queue_depth)
            .context("failed to register the distributor client")?;
        hub.start().context("failed to start capture")?;

        let fanout = Arc::new(FanOutBuffer::new(&config.task_names(), config.queue_depth));
        let display = DisplayServer::start(display_backend, run.clone());

        let mut pools = Vec::with_capacity(config.tasks.len());
        for spec in &config.tasks {
            let pool = TaskPool::start(
                spec.clone(),
                config.workers_per_task,
                fanout.clone(),
                display.sink(),
                run.clone(),
                factory.clone(),
            )
            .with_context(|| format!("failed to start the {} task", spec.kind))?;
            pools.push(pool);
        }

        // Pump last: everything downstream is ready to consume.
        let pump = {
            let hub = hub.clone();
            let fanout = fanout.clone();
            let run = run.clone();
            thread::Builder::new()
                .name("frame-distributor".into())
                .spawn(move || {
                    while run.is_running() {
                        match hub.poll(client, PUMP_TIMEOUT) {
                            PollOutcome::Frame(frame) => fanout.publish(&frame),
                            PollOutcome::TimedOut => continue,
                            PollOutcome::Closed => break,
                        }
                    }
                })
                .expect("failed to spawn distributor thread")
        };

        info!(
            "pipeline up: device {}, {} tasks, {} workers each",
            hub.device_id(),
            config.tasks.len(),
            config.workers_per_task
        );

        Ok(Self {
            config,
            run,
            hub,
            fanout,
            display,
            pools,
            pump: Some(pump),
            _device_lock: device_lock,
        })
    }

    pub fn run_flag(&self) -> RunFlag {
        self.run.clone()
    }

    pub fn pool_stats(&self) -> Vec<TaskPoolStats> {
        self.pools.iter().map(TaskPool::stats).collect()
    }

    /// Steady state: watch the run flag and the hub, print a status line at
    /// the configured interval, then drain. Returns an error when the run
    /// ended because the camera died.
    pub fn run(&mut self) -> Result<()> {
        let mut last_status = Instant::now();
        while self.run.is_running() {
            if self.hub.is_faulted() {
                error!("capture fault detected, draining");
                self.run.request_stop();
                break;
            }
            thread::sleep(SUPERVISE_TICK);
            if last_status.elapsed() >= self.config.status_interval {
                let line = stats::format_status(&self.hub.stats(), &self.pool_stats());
                info!("{line}");
                println!("{line}");
                last_status = Instant::now();
            }
        }

        let faulted = self.hub.is_faulted();
        self.shutdown();

        let summary = stats::format_summary(&self.hub.stats(), &self.pool_stats());
        info!("{summary}");
        println!("{summary}");

        if faulted {
            bail!("camera failed and could not be re-opened");
        }
        Ok(())
    }

    /// Draining: stop stages in dependency order and join everything.
    fn shutdown(&mut self) {
        self.run.request_stop();
        self.display.stop();
        for pool in self.pools.iter_mut().rev() {
            pool.stop();
        }
        self.fanout.close();
        self.hub.stop();
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
        info!("pipeline terminated");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
