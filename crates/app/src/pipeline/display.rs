//! Display serializer: one thread owns every native window call.
//!
//! The underlying toolkit is single-threaded by rule, so workers never call
//! it directly; they push `(window, annotated frame)` jobs into a bounded
//! queue and the serializer presents them in FIFO order, polling the
//! keyboard as it goes. A full queue drops its oldest job — display latency
//! must never back up into the inference threads.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{debug, info, warn};

use crate::pipeline::flag::RunFlag;

/// Capacity of the display job queue.
const DISPLAY_QUEUE_DEPTH: usize = 10;
/// Key poll timeout per presented frame, milliseconds.
const KEY_POLL_MS: i32 = 1;

const KEY_QUIT: i32 = 'q' as i32;
const KEY_ESC: i32 = 27;

/// Fully rendered frame ready for presentation.
pub struct AnnotatedFrame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub frame_id: u64,
}

pub struct DisplayJob {
    pub window: String,
    pub frame: AnnotatedFrame,
}

/// Native windowing surface owned by the serializer thread.
pub trait DisplayBackend: Send {
    fn create_window(&mut self, name: &str) -> Result<()>;
    fn show(&mut self, name: &str, frame: &AnnotatedFrame) -> Result<()>;
    /// Poll the key input; `None` when no key was pressed within the
    /// timeout.
    fn poll_key(&mut self, timeout_ms: i32) -> Option<i32>;
    fn destroy_all(&mut self);
}

/// Producer handle given to every worker. Cloneable; sends never block.
#[derive(Clone)]
pub struct DisplaySink {
    tx: Sender<DisplayJob>,
    probe: Receiver<DisplayJob>,
}

impl DisplaySink {
    /// Submit a job, discarding the oldest queued job when the queue is
    /// full.
    pub fn submit(&self, job: DisplayJob) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                let _ = self.probe.try_recv();
                metrics::counter!("display_jobs_dropped_total").increment(1);
                let _ = self.tx.try_send(job);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
        metrics::gauge!("display_queue_depth").set(self.tx.len() as f64);
    }

    pub fn depth(&self) -> usize {
        self.tx.len()
    }
}

pub struct DisplayServer {
    sink: DisplaySink,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DisplayServer {
    /// Spawn the serializer thread. A quit key ('q' or ESC) clears the
    /// global run flag.
    pub fn start(backend: Box<dyn DisplayBackend>, run: RunFlag) -> Self {
        let (tx, rx) = bounded(DISPLAY_QUEUE_DEPTH);
        let sink = DisplaySink {
            tx,
            probe: rx.clone(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("display".into())
            .spawn(move || display_loop(backend, rx, run, thread_stop))
            .expect("failed to spawn display thread");
        Self {
            sink,
            stop,
            handle: Some(handle),
        }
    }

    pub fn sink(&self) -> DisplaySink {
        self.sink.clone()
    }

    /// Drain outstanding jobs, destroy windows and join the thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DisplayServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn display_loop(
    mut backend: Box<dyn DisplayBackend>,
    rx: Receiver<DisplayJob>,
    run: RunFlag,
    stop: Arc<AtomicBool>,
) {
    debug!("display thread started");
    let mut windows: HashSet<String> = HashSet::new();

    while !stop.load(Ordering::Relaxed) {
        let job = match rx.recv_timeout(Duration::from_millis(20)) {
            Ok(job) => job,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        };
        present(&mut backend, &mut windows, &job);
        if let Some(key) = backend.poll_key(KEY_POLL_MS) {
            if key == KEY_QUIT || key == KEY_ESC {
                info!("quit key pressed");
                run.request_stop();
            }
        }
    }

    // Drain whatever is still queued before tearing the windows down.
    while let Ok(job) = rx.try_recv() {
        present(&mut backend, &mut windows, &job);
    }
    backend.destroy_all();
    debug!("display thread ended");
}

fn present(
    backend: &mut Box<dyn DisplayBackend>,
    windows: &mut HashSet<String>,
    job: &DisplayJob,
) {
    if !windows.contains(&job.window) {
        match backend.create_window(&job.window) {
            Ok(()) => {
                windows.insert(job.window.clone());
            }
            Err(err) => {
                warn!("failed to create window {:?}: {err}", job.window);
                return;
            }
        }
    }
    if let Err(err) = backend.show(&job.window, &job.frame) {
        warn!("failed to present to {:?}: {err}", job.window);
    }
}

#[cfg(feature = "with-opencv")]
pub use self::opencv_backend::OpenCvDisplay;

#[cfg(feature = "with-opencv")]
mod opencv_backend {
    use anyhow::{Context, Result};
    use opencv::{highgui, prelude::*};

    use super::{AnnotatedFrame, DisplayBackend};

    /// highgui-backed presentation. All calls stay on the serializer thread.
    #[derive(Default)]
    pub struct OpenCvDisplay;

    impl DisplayBackend for OpenCvDisplay {
        fn create_window(&mut self, name: &str) -> Result<()> {
            highgui::named_window(name, highgui::WINDOW_AUTOSIZE)
                .with_context(|| format!("named_window({name})"))?;
            Ok(())
        }

        fn show(&mut self, name: &str, frame: &AnnotatedFrame) -> Result<()> {
            let flat = Mat::from_slice(&frame.data).context("wrap frame buffer")?;
            let mat = flat
                .reshape(3, frame.height)
                .context("reshape frame buffer")?;
            highgui::imshow(name, &mat).with_context(|| format!("imshow({name})"))?;
            Ok(())
        }

        fn poll_key(&mut self, timeout_ms: i32) -> Option<i32> {
            match highgui::wait_key(timeout_ms.max(1)) {
                Ok(-1) | Err(_) => None,
                Ok(key) => Some(key),
            }
        }

        fn destroy_all(&mut self) {
            let _ = highgui::destroy_all_windows();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording {
        created: Vec<String>,
        shown: Vec<(String, u64)>,
        destroyed: bool,
    }

    struct RecordingBackend {
        log: Arc<Mutex<Recording>>,
        key_script: Vec<Option<i32>>,
    }

    impl DisplayBackend for RecordingBackend {
        fn create_window(&mut self, name: &str) -> Result<()> {
            self.log.lock().unwrap().created.push(name.to_string());
            Ok(())
        }

        fn show(&mut self, name: &str, frame: &AnnotatedFrame) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .shown
                .push((name.to_string(), frame.frame_id));
            Ok(())
        }

        fn poll_key(&mut self, _timeout_ms: i32) -> Option<i32> {
            self.key_script.pop().flatten()
        }

        fn destroy_all(&mut self) {
            self.log.lock().unwrap().destroyed = true;
        }
    }

    fn annotated(frame_id: u64) -> AnnotatedFrame {
        AnnotatedFrame {
            data: vec![0u8; 12],
            width: 2,
            height: 2,
            frame_id,
        }
    }

    fn job(window: &str, frame_id: u64) -> DisplayJob {
        DisplayJob {
            window: window.to_string(),
            frame: annotated(frame_id),
        }
    }

    fn wait_until(deadline_ms: u64, predicate: impl Fn() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_millis(deadline_ms);
        while std::time::Instant::now() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    #[test]
    fn windows_are_created_lazily_and_frames_presented_in_order() {
        let log = Arc::new(Mutex::new(Recording::default()));
        let backend = RecordingBackend {
            log: log.clone(),
            key_script: Vec::new(),
        };
        let run = RunFlag::new();
        let mut server = DisplayServer::start(Box::new(backend), run);
        let sink = server.sink();

        sink.submit(job("helmet Detection", 1));
        sink.submit(job("helmet Detection", 2));
        sink.submit(job("flame Detection", 3));

        assert!(wait_until(2_000, || log.lock().unwrap().shown.len() == 3));
        server.stop();

        let log = log.lock().unwrap();
        assert_eq!(log.created, vec!["helmet Detection", "flame Detection"]);
        let helmet_ids: Vec<u64> = log
            .shown
            .iter()
            .filter(|(w, _)| w == "helmet Detection")
            .map(|&(_, id)| id)
            .collect();
        assert_eq!(helmet_ids, vec![1, 2]);
        assert!(log.destroyed, "windows must be destroyed on stop");
    }

    #[test]
    fn quit_key_clears_the_run_flag() {
        let log = Arc::new(Mutex::new(Recording::default()));
        let backend = RecordingBackend {
            log,
            key_script: vec![Some('q' as i32)],
        };
        let run = RunFlag::new();
        let mut server = DisplayServer::start(Box::new(backend), run.clone());
        server.sink().submit(job("w", 1));

        assert!(wait_until(2_000, || !run.is_running()));
        server.stop();
    }

    #[test]
    fn overflow_discards_oldest_job() {
        // No server: exercise the sink's bounded queue directly.
        let (tx, rx) = bounded(3);
        let sink = DisplaySink {
            tx,
            probe: rx.clone(),
        };
        for id in 1..=5 {
            sink.submit(job("w", id));
        }
        let ids: Vec<u64> = rx.try_iter().map(|j| j.frame.frame_id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn stop_drains_outstanding_jobs() {
        let log = Arc::new(Mutex::new(Recording::default()));
        let backend = RecordingBackend {
            log: log.clone(),
            key_script: Vec::new(),
        };
        let run = RunFlag::new();
        let mut server = DisplayServer::start(Box::new(backend), run);
        let sink = server.sink();
        for id in 1..=6 {
            sink.submit(job("w", id));
        }
        server.stop();
        let log = log.lock().unwrap();
        assert_eq!(log.shown.len(), 6, "queued jobs must be presented on stop");
        assert!(log.destroyed);
    }
}
