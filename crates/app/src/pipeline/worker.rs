//! Per-task worker pools.
//!
//! A pool runs one worker per accelerator core. Each worker creates its own
//! model context inside the worker thread (pinned to its core) and reports
//! the load result over a bounded init channel, so `TaskPool::start` fails
//! fast when a model is broken. Workers never share contexts and hold no
//! lock while inference runs.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::bounded;
use npu_core::{Detection, ImageView, ModelRuntime, NpuCore, NpuError};
use tracing::{debug, error, info};
use video_ingest::{FanOutBuffer, Frame, PollOutcome};

use crate::pipeline::{
    annotation::{self, LabeledBox, Overlay},
    config::TaskSpec,
    display::{DisplayJob, DisplaySink},
    flag::RunFlag,
    smoking::SmokingGuard,
    tasks::{COLOR_GREEN, COLOR_RED, TaskKind},
};

/// Timeout for one blocking take from the task queue.
const TAKE_TIMEOUT: Duration = Duration::from_millis(100);

/// Creates one model context per (task, core). The pool calls this from
/// inside each worker thread.
pub trait ModelFactory: Send + Sync + 'static {
    fn create(&self, task: &TaskSpec, core: NpuCore) -> Result<Box<dyn ModelRuntime>, NpuError>;
}

impl<F> ModelFactory for F
where
    F: Fn(&TaskSpec, NpuCore) -> Result<Box<dyn ModelRuntime>, NpuError> + Send + Sync + 'static,
{
    fn create(&self, task: &TaskSpec, core: NpuCore) -> Result<Box<dyn ModelRuntime>, NpuError> {
        self(task, core)
    }
}

#[derive(Default)]
struct TaskCounters {
    frames: AtomicU64,
    detections: AtomicU64,
    abnormal: AtomicU64,
    infer_errors: AtomicU64,
}

/// Point-in-time view of one pool's counters.
#[derive(Clone, Copy, Debug)]
pub struct TaskPoolStats {
    pub task: TaskKind,
    pub frames: u64,
    pub detections: u64,
    pub abnormal: u64,
    pub infer_errors: u64,
    pub fps: f64,
    pub queue_depth: usize,
}

pub struct TaskPool {
    kind: TaskKind,
    fanout: Arc<FanOutBuffer>,
    counters: Arc<TaskCounters>,
    started: Instant,
    stop: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl TaskPool {
    /// Spawn `worker_count` workers for `spec`, waiting for every model
    /// context to come up. The first load failure stops the pool and is
    /// returned to the caller.
    pub fn start(
        spec: TaskSpec,
        worker_count: usize,
        fanout: Arc<FanOutBuffer>,
        display: DisplaySink,
        run: RunFlag,
        factory: Arc<dyn ModelFactory>,
    ) -> Result<Self, NpuError> {
        let worker_count = worker_count.max(1);
        let counters = Arc::new(TaskCounters::default());
        let stop = Arc::new(AtomicBool::new(false));
        let guard = Arc::new(Mutex::new(SmokingGuard::new()));
        let started = Instant::now();
        let (init_tx, init_rx) = bounded::<Result<usize, NpuError>>(worker_count);

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let ctx = WorkerContext {
                spec: spec.clone(),
                core: NpuCore::for_worker(index),
                fanout: fanout.clone(),
                display: display.clone(),
                run: run.clone(),
                stop: stop.clone(),
                counters: counters.clone(),
                guard: guard.clone(),
                factory: factory.clone(),
                started,
            };
            let init_tx = init_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{index}", spec.kind))
                .spawn(move || worker_main(ctx, init_tx))
                .expect("failed to spawn task worker");
            workers.push(handle);
        }
        drop(init_tx);

        let mut pool = Self {
            kind: spec.kind,
            fanout,
            counters,
            started,
            stop,
            workers,
        };

        for _ in 0..worker_count {
            match init_rx.recv() {
                Ok(Ok(core_index)) => {
                    debug!("{} worker up on core {core_index}", pool.kind);
                }
                Ok(Err(err)) => {
                    error!("{} model load failed: {err}", pool.kind);
                    pool.stop();
                    return Err(err);
                }
                Err(_) => {
                    pool.stop();
                    return Err(NpuError::UnsupportedModel(
                        "worker exited before reporting model load".into(),
                    ));
                }
            }
        }
        info!("{} pool started with {worker_count} workers", pool.kind);
        Ok(pool)
    }

    /// Stop the pool and join every worker, newest first — the reverse of
    /// creation order, so contexts are released in reverse as well.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        while let Some(handle) = self.workers.pop() {
            let _ = handle.join();
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn stats(&self) -> TaskPoolStats {
        let frames = self.counters.frames.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();
        TaskPoolStats {
            task: self.kind,
            frames,
            detections: self.counters.detections.load(Ordering::Relaxed),
            abnormal: self.counters.abnormal.load(Ordering::Relaxed),
            infer_errors: self.counters.infer_errors.load(Ordering::Relaxed),
            fps: if elapsed > 0.0 {
                frames as f64 / elapsed
            } else {
                0.0
            },
            queue_depth: self.fanout.depth(self.kind.name()),
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerContext {
    spec: TaskSpec,
    core: NpuCore,
    fanout: Arc<FanOutBuffer>,
    display: DisplaySink,
    run: RunFlag,
    stop: Arc<AtomicBool>,
    counters: Arc<TaskCounters>,
    guard: Arc<Mutex<SmokingGuard>>,
    factory: Arc<dyn ModelFactory>,
    started: Instant,
}

fn worker_main(ctx: WorkerContext, init_tx: crossbeam_channel::Sender<Result<usize, NpuError>>) {
    let mut runtime = match ctx.factory.create(&ctx.spec, ctx.core) {
        Ok(runtime) => {
            if init_tx.send(Ok(ctx.core.index())).is_err() {
                return;
            }
            runtime
        }
        Err(err) => {
            let _ = init_tx.send(Err(err));
            return;
        }
    };
    drop(init_tx);

    let task_name = ctx.spec.kind.name();
    while ctx.run.is_running() && !ctx.stop.load(Ordering::Relaxed) {
        match ctx.fanout.take(task_name, TAKE_TIMEOUT) {
            PollOutcome::Frame(frame) => process_frame(&ctx, runtime.as_mut(), &frame),
            PollOutcome::TimedOut => continue,
            PollOutcome::Closed => break,
        }
    }
    debug!("{task_name} worker on core {} exiting", ctx.core.index());
}

fn process_frame(ctx: &WorkerContext, runtime: &mut dyn ModelRuntime, frame: &Frame) {
    let kind = ctx.spec.kind;
    let image = ImageView {
        data: &frame.data,
        width: frame.width,
        height: frame.height,
        channels: frame.format.channels(),
    };

    let mut batch = match runtime.infer(image) {
        Ok(batch) => batch,
        Err(err) => {
            ctx.counters.infer_errors.fetch_add(1, Ordering::Relaxed);
            debug!("{kind} inference error (frame dropped): {err}");
            return;
        }
    };
    batch.frame_id = frame.id;
    let frames_done = ctx.counters.frames.fetch_add(1, Ordering::Relaxed) + 1;
    metrics::histogram!("task_infer_latency_ms", "task" => kind.name()).record(batch.latency_ms);

    // Keep only the classes this task knows; unknown ids are dropped.
    let known: Vec<Detection> = batch
        .detections
        .iter()
        .filter(|d| kind.class_label(d.class_id).is_some())
        .cloned()
        .collect();
    ctx.counters
        .detections
        .fetch_add(known.len() as u64, Ordering::Relaxed);

    let mut abnormal = kind.is_abnormal(&known);
    let mut draw_all = true;
    if kind == TaskKind::Smoking {
        let has_cigarette = known.iter().any(|d| d.class_id == 0);
        let has_face = known.iter().any(|d| d.class_id == 1);
        let has_smoking = known.iter().any(|d| d.class_id == 2);
        let verdict = ctx
            .guard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .update(has_face, has_cigarette, has_smoking);
        abnormal = verdict.reported;
        // Until the stricter display ratio holds, only direct smoking
        // evidence is rendered.
        draw_all = verdict.displayed;
    }
    if abnormal {
        ctx.counters.abnormal.fetch_add(1, Ordering::Relaxed);
    }

    let boxes: Vec<LabeledBox> = known
        .iter()
        .filter(|d| kind != TaskKind::Smoking || draw_all || d.class_id == 2)
        .map(|d| LabeledBox {
            bbox: d.bbox,
            label: kind.class_label(d.class_id).unwrap_or_default(),
            color: kind.class_color(d.class_id),
            score: d.score,
        })
        .collect();

    let mut status = kind.status_text(abnormal).to_string();
    if kind == TaskKind::Flame && abnormal {
        status = format!(
            "{status} (Count: {})",
            ctx.counters.abnormal.load(Ordering::Relaxed)
        );
    }
    let elapsed = ctx.started.elapsed().as_secs_f64();
    let overlay = Overlay {
        status,
        status_color: if abnormal { COLOR_RED } else { COLOR_GREEN },
        fps: if elapsed > 0.0 {
            frames_done as f64 / elapsed
        } else {
            0.0
        },
        detections: ctx.counters.detections.load(Ordering::Relaxed),
        queue_depth: ctx.fanout.depth(kind.name()),
        latency_ms: batch.latency_ms,
        core_index: batch.core_index,
    };
    let annotated = annotation::annotate(frame, &boxes, &overlay);
    ctx.display.submit(DisplayJob {
        window: kind.window_title(),
        frame: annotated,
    });
}
