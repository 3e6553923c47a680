//! Shared camera hub: one physical device, many subscribers.
//!
//! The hub owns the capture device, runs the capture loop on its own thread
//! and delivers every frame to each subscribed client through that client's
//! bounded queue (oldest-drop). A maintenance thread reaps clients that went
//! away without unsubscribing. Individual frame drops are not errors; losing
//! the device and failing to re-open it is fatal and surfaces through
//! [`CameraHub::is_faulted`].

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use tracing::{debug, error, info, warn};

use crate::{
    backend::{CaptureBackend, device_candidates},
    queue::{FrameQueue, PollOutcome},
    types::{CaptureError, CaptureSettings, Frame},
};

/// Consecutive failed reads tolerated before the device is released and
/// re-opened.
const DEFAULT_FAILURE_THRESHOLD: u32 = 100;
/// Pause between releasing a wedged device and re-opening it.
const DEFAULT_REOPEN_DELAY: Duration = Duration::from_secs(1);
/// How often the reaper scans the client table.
const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5);
/// A client with an empty queue and no access for this long is removed.
const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Stable handle for one subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClientId(u64);

struct ClientRecord {
    name: String,
    queue: Arc<FrameQueue>,
    active: AtomicBool,
    /// Unix millis of the last delivery or consumer fetch.
    last_access_ms: AtomicU64,
}

impl ClientRecord {
    fn touch(&self) {
        self.last_access_ms.store(current_millis(), Ordering::Relaxed);
    }
}

#[derive(Default)]
struct HubCounters {
    captured: AtomicU64,
    delivered: AtomicU64,
    read_failures: AtomicU64,
    reopens: AtomicU64,
}

struct HubShared {
    clients: Mutex<HashMap<u64, Arc<ClientRecord>>>,
    next_client_id: AtomicU64,
    ready: AtomicBool,
    running: AtomicBool,
    faulted: AtomicBool,
    device: AtomicU64,
    counters: HubCounters,
}

impl HubShared {
    fn close_all_queues(&self) {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        for client in clients.values() {
            client.queue.close();
        }
    }
}

/// Snapshot of hub-level counters for status reporting.
#[derive(Clone, Copy, Debug, Default)]
pub struct HubStats {
    pub frames_captured: u64,
    pub frames_delivered: u64,
    pub read_failures: u64,
    pub reopens: u64,
    pub clients: usize,
}

pub struct CameraHub {
    shared: Arc<HubShared>,
    backend: Mutex<Option<Box<dyn CaptureBackend>>>,
    settings: Mutex<CaptureSettings>,
    capture_thread: Mutex<Option<thread::JoinHandle<()>>>,
    reaper_thread: Mutex<Option<thread::JoinHandle<()>>>,
    failure_threshold: u32,
    reopen_delay: Duration,
    reap_interval: Duration,
    client_timeout: Duration,
}

impl CameraHub {
    pub fn new(backend: Box<dyn CaptureBackend>) -> Self {
        Self {
            shared: Arc::new(HubShared {
                clients: Mutex::new(HashMap::new()),
                next_client_id: AtomicU64::new(1),
                ready: AtomicBool::new(false),
                running: AtomicBool::new(false),
                faulted: AtomicBool::new(false),
                device: AtomicU64::new(0),
                counters: HubCounters::default(),
            }),
            backend: Mutex::new(Some(backend)),
            settings: Mutex::new(CaptureSettings::default()),
            capture_thread: Mutex::new(None),
            reaper_thread: Mutex::new(None),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reopen_delay: DEFAULT_REOPEN_DELAY,
            reap_interval: DEFAULT_REAP_INTERVAL,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    pub fn with_reaper_timing(mut self, interval: Duration, client_timeout: Duration) -> Self {
        self.reap_interval = interval;
        self.client_timeout = client_timeout;
        self
    }

    /// Open the requested device, falling back over ids 0..=5 when it is not
    /// usable. Each candidate is configured and then probed for real
    /// throughput; candidates below the configured floor are rejected.
    pub fn open(&self, device_id: i32, settings: CaptureSettings) -> Result<(), CaptureError> {
        let mut guard = self.backend.lock().unwrap_or_else(|e| e.into_inner());
        let backend = guard.as_mut().ok_or(CaptureError::NotReady)?;

        let opened = open_with_fallback(backend.as_mut(), device_id, &settings)?;
        *self.settings.lock().unwrap_or_else(|e| e.into_inner()) = settings;
        self.shared.device.store(opened as u64, Ordering::Relaxed);
        self.shared.ready.store(true, Ordering::SeqCst);
        info!("camera hub ready on device {opened}");
        Ok(())
    }

    /// Launch the capture and reaper threads. Idempotent; a no-op when the
    /// hub is already running.
    pub fn start(&self) -> Result<(), CaptureError> {
        if !self.shared.ready.load(Ordering::SeqCst) {
            return Err(CaptureError::NotReady);
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let backend = match self
            .backend
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            Some(backend) => backend,
            None => {
                // A stopped hub cannot be restarted; its backend is gone.
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(CaptureError::NotReady);
            }
        };
        let settings = *self.settings.lock().unwrap_or_else(|e| e.into_inner());
        let shared = self.shared.clone();
        let threshold = self.failure_threshold;
        let reopen_delay = self.reopen_delay;
        let capture = thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || capture_loop(shared, backend, settings, threshold, reopen_delay))
            .expect("failed to spawn capture thread");
        *self
            .capture_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(capture);

        let shared = self.shared.clone();
        let interval = self.reap_interval;
        let timeout = self.client_timeout;
        let reaper = thread::Builder::new()
            .name("camera-reaper".into())
            .spawn(move || reaper_loop(shared, interval, timeout))
            .expect("failed to spawn reaper thread");
        *self.reaper_thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(reaper);

        Ok(())
    }

    /// Stop capture and maintenance, close every client queue and join both
    /// threads. Idempotent.
    pub fn stop(&self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        self.shared.close_all_queues();
        if let Some(handle) = self
            .capture_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
        if let Some(handle) = self
            .reaper_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
        if was_running {
            info!("camera hub stopped");
        }
    }

    /// Register a sink. Fails with [`CaptureError::NotReady`] before a
    /// successful [`CameraHub::open`].
    pub fn subscribe(&self, name: &str, queue_depth: usize) -> Result<ClientId, CaptureError> {
        if !self.shared.ready.load(Ordering::SeqCst) {
            return Err(CaptureError::NotReady);
        }
        let id = self.shared.next_client_id.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(ClientRecord {
            name: name.to_string(),
            queue: Arc::new(FrameQueue::new(queue_depth)),
            active: AtomicBool::new(true),
            last_access_ms: AtomicU64::new(current_millis()),
        });
        let mut clients = self
            .shared
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        clients.insert(id, record);
        info!("camera client {id} ({name}) subscribed, {} active", clients.len());
        Ok(ClientId(id))
    }

    /// Deregister a sink and wake any poller blocked on it.
    pub fn unsubscribe(&self, client: ClientId) -> bool {
        let mut clients = self
            .shared
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match clients.remove(&client.0) {
            Some(record) => {
                record.active.store(false, Ordering::SeqCst);
                record.queue.close();
                info!("camera client {} ({}) unsubscribed", client.0, record.name);
                true
            }
            None => false,
        }
    }

    /// Blocking read with timeout for one client. A fetch refreshes the
    /// client's last-access stamp so live consumers are never reaped.
    pub fn poll(&self, client: ClientId, timeout: Duration) -> PollOutcome {
        let record = {
            let clients = self
                .shared
                .clients
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match clients.get(&client.0) {
                Some(record) => record.clone(),
                None => return PollOutcome::Closed,
            }
        };
        record.touch();
        let outcome = record.queue.take(timeout);
        if matches!(outcome, PollOutcome::Frame(_)) {
            record.touch();
        }
        outcome
    }

    /// True once a device re-open has failed; the hub will not recover and
    /// the supervisor is expected to drain the pipeline.
    pub fn is_faulted(&self) -> bool {
        self.shared.faulted.load(Ordering::SeqCst)
    }

    pub fn device_id(&self) -> i32 {
        self.shared.device.load(Ordering::Relaxed) as i32
    }

    pub fn stats(&self) -> HubStats {
        let clients = self
            .shared
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        HubStats {
            frames_captured: self.shared.counters.captured.load(Ordering::Relaxed),
            frames_delivered: self.shared.counters.delivered.load(Ordering::Relaxed),
            read_failures: self.shared.counters.read_failures.load(Ordering::Relaxed),
            reopens: self.shared.counters.reopens.load(Ordering::Relaxed),
            clients,
        }
    }
}

impl Drop for CameraHub {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Try the requested device id, then the remaining candidates, returning the
/// id that opened and passed the throughput probe.
fn open_with_fallback(
    backend: &mut dyn CaptureBackend,
    requested: i32,
    settings: &CaptureSettings,
) -> Result<i32, CaptureError> {
    for candidate in device_candidates(requested) {
        match backend.open(candidate, settings) {
            Ok(()) => {}
            Err(err) => {
                debug!("device {candidate}: {err}");
                continue;
            }
        }
        let measured = probe_throughput(backend, settings.probe_frames);
        if measured >= settings.min_fps {
            info!("device {candidate} probe: {measured:.1} fps");
            return Ok(candidate);
        }
        let rejection = CaptureError::Throughput {
            device: candidate,
            measured,
            floor: settings.min_fps,
        };
        warn!("{rejection}, trying the next candidate");
        backend.close();
    }
    Err(CaptureError::NoDevice { requested })
}

/// Measure sustained read throughput over a short burst of reads.
fn probe_throughput(backend: &mut dyn CaptureBackend, frames: u32) -> f64 {
    let start = Instant::now();
    let mut ok = 0u32;
    for _ in 0..frames {
        if backend.read().is_some() {
            ok += 1;
        }
    }
    let elapsed = start.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        ok as f64 / elapsed
    } else {
        ok as f64
    }
}

fn capture_loop(
    shared: Arc<HubShared>,
    mut backend: Box<dyn CaptureBackend>,
    settings: CaptureSettings,
    failure_threshold: u32,
    reopen_delay: Duration,
) {
    debug!("capture loop started");
    let mut consecutive_failures = 0u32;
    let mut next_frame_id = 0u64;

    while shared.running.load(Ordering::Relaxed) {
        match backend.read() {
            Some(img) => {
                consecutive_failures = 0;
                next_frame_id += 1;
                let frame = Frame {
                    data: Arc::new(img.data),
                    width: img.width,
                    height: img.height,
                    id: next_frame_id,
                    timestamp_ms: chrono::Utc::now().timestamp_millis(),
                    format: img.format,
                };
                shared.counters.captured.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("ingest_frames_captured_total").increment(1);

                let clients = shared.clients.lock().unwrap_or_else(|e| e.into_inner());
                for client in clients.values() {
                    if !client.active.load(Ordering::Relaxed) {
                        continue;
                    }
                    if client.queue.push(frame.clone()) {
                        metrics::counter!("ingest_client_evicted_total", "client" => client.name.clone())
                            .increment(1);
                    }
                    client.touch();
                    shared.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                consecutive_failures += 1;
                shared.counters.read_failures.fetch_add(1, Ordering::Relaxed);
                if consecutive_failures >= failure_threshold {
                    warn!(
                        "{consecutive_failures} consecutive failed reads, re-opening device"
                    );
                    backend.close();
                    interruptible_sleep(&shared.running, reopen_delay);
                    if !shared.running.load(Ordering::Relaxed) {
                        break;
                    }
                    shared.counters.reopens.fetch_add(1, Ordering::Relaxed);
                    let device = shared.device.load(Ordering::Relaxed) as i32;
                    match open_with_fallback(backend.as_mut(), device, &settings) {
                        Ok(opened) => {
                            shared.device.store(opened as u64, Ordering::Relaxed);
                            consecutive_failures = 0;
                            info!("device re-opened as {opened}");
                        }
                        Err(err) => {
                            error!("device re-open failed: {err}");
                            shared.faulted.store(true, Ordering::SeqCst);
                            shared.running.store(false, Ordering::SeqCst);
                            shared.close_all_queues();
                            break;
                        }
                    }
                } else {
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    backend.close();
    debug!(
        "capture loop ended after {} frames",
        shared.counters.captured.load(Ordering::Relaxed)
    );
}

fn reaper_loop(shared: Arc<HubShared>, interval: Duration, client_timeout: Duration) {
    while shared.running.load(Ordering::Relaxed) {
        interruptible_sleep(&shared.running, interval);
        if !shared.running.load(Ordering::Relaxed) {
            break;
        }
        let now = current_millis();
        let timeout_ms = client_timeout.as_millis() as u64;
        let mut clients = shared.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.retain(|id, client| {
            // Pending frames always count as live.
            if !client.queue.is_empty() {
                return true;
            }
            let stale =
                now.saturating_sub(client.last_access_ms.load(Ordering::Relaxed)) > timeout_ms;
            let inactive = !client.active.load(Ordering::Relaxed);
            if inactive || stale {
                info!("reaping camera client {id} ({})", client.name);
                client.queue.close();
                false
            } else {
                true
            }
        });
    }
}

/// Sleep in short slices so shutdown does not have to wait out long pauses.
fn interruptible_sleep(running: &AtomicBool, total: Duration) {
    let slice = Duration::from_millis(20);
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if !running.load(Ordering::Relaxed) {
            return;
        }
        thread::sleep(slice.min(deadline.saturating_duration_since(Instant::now())));
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    };
    use std::time::Duration;

    use super::*;
    use crate::backend::{CaptureBackend, CapturedImage};
    use crate::types::FrameFormat;

    type ReadFn = Box<dyn FnMut(u64) -> Option<CapturedImage> + Send>;

    /// Backend scripted per-test: which device ids open, and what each read
    /// (indexed from 0, probe reads included) returns.
    struct ScriptedBackend {
        open_ok: Box<dyn Fn(i32) -> bool + Send>,
        read_fn: ReadFn,
        opens: Arc<Mutex<Vec<i32>>>,
        reads: u64,
        open: bool,
    }

    impl ScriptedBackend {
        fn always_good() -> (Self, Arc<Mutex<Vec<i32>>>) {
            Self::new(|_| true, Box::new(|_| Some(image())))
        }

        fn new(
            open_ok: impl Fn(i32) -> bool + Send + 'static,
            read_fn: ReadFn,
        ) -> (Self, Arc<Mutex<Vec<i32>>>) {
            let opens = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    open_ok: Box::new(open_ok),
                    read_fn,
                    opens: opens.clone(),
                    reads: 0,
                    open: false,
                },
                opens,
            )
        }
    }

    fn image() -> CapturedImage {
        CapturedImage {
            data: vec![0u8; 12],
            width: 2,
            height: 2,
            format: FrameFormat::Bgr8,
        }
    }

    impl CaptureBackend for ScriptedBackend {
        fn open(&mut self, device: i32, _settings: &CaptureSettings) -> Result<(), CaptureError> {
            self.opens.lock().unwrap().push(device);
            if (self.open_ok)(device) {
                self.open = true;
                Ok(())
            } else {
                Err(CaptureError::Open { device })
            }
        }

        fn read(&mut self) -> Option<CapturedImage> {
            if !self.open {
                return None;
            }
            let idx = self.reads;
            self.reads += 1;
            // Reads are not free on real hardware; a tiny pause keeps test
            // capture loops from spinning through millions of frames.
            std::thread::sleep(Duration::from_micros(200));
            (self.read_fn)(idx)
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn test_settings() -> CaptureSettings {
        CaptureSettings {
            probe_frames: 3,
            min_fps: 0.0,
            ..CaptureSettings::default()
        }
    }

    #[test]
    fn subscribe_before_open_is_not_ready() {
        let (backend, _) = ScriptedBackend::always_good();
        let hub = CameraHub::new(Box::new(backend));
        match hub.subscribe("helmet", 5) {
            Err(CaptureError::NotReady) => {}
            _ => panic!("expected NotReady"),
        }
    }

    #[test]
    fn open_falls_back_over_candidates() {
        let (backend, opens) = ScriptedBackend::new(|device| device == 1, Box::new(|_| Some(image())));
        let hub = CameraHub::new(Box::new(backend));
        hub.open(3, test_settings()).unwrap();
        assert_eq!(hub.device_id(), 1);
        assert_eq!(&*opens.lock().unwrap(), &[3, 0, 1]);
    }

    #[test]
    fn open_rejects_device_below_throughput_floor() {
        // Device 0 opens but every read fails, so its measured throughput is
        // zero; device 1 reads fine.
        let reads = Box::new(|_idx| Some(image()));
        let (mut backend, _) = ScriptedBackend::new(|_| true, reads);
        let gate = Arc::new(AtomicU32::new(0));
        let gate_reads = gate.clone();
        backend.read_fn = Box::new(move |_| {
            if gate_reads.load(Ordering::Relaxed) == 0 {
                None
            } else {
                Some(image())
            }
        });
        let opens = backend.opens.clone();
        // Flip the gate after the first open is probed.
        let open_gate = gate.clone();
        backend.open_ok = Box::new(move |device| {
            if device != 0 {
                open_gate.store(1, Ordering::Relaxed);
            }
            true
        });

        let hub = CameraHub::new(Box::new(backend));
        let settings = CaptureSettings {
            probe_frames: 3,
            min_fps: 1.0,
            ..CaptureSettings::default()
        };
        hub.open(0, settings).unwrap();
        assert_eq!(hub.device_id(), 1);
        assert_eq!(&*opens.lock().unwrap(), &[0, 1]);
    }

    #[test]
    fn all_candidates_failing_is_no_device() {
        let (backend, _) = ScriptedBackend::new(|_| false, Box::new(|_| None));
        let hub = CameraHub::new(Box::new(backend));
        match hub.open(0, test_settings()) {
            Err(CaptureError::NoDevice { requested: 0 }) => {}
            other => panic!("expected NoDevice, got {other:?}"),
        }
    }

    #[test]
    fn frames_reach_every_subscriber_with_increasing_ids() {
        let (backend, _) = ScriptedBackend::always_good();
        let hub = CameraHub::new(Box::new(backend));
        hub.open(0, test_settings()).unwrap();
        let a = hub.subscribe("helmet", 5).unwrap();
        let b = hub.subscribe("flame", 5).unwrap();
        hub.start().unwrap();

        for client in [a, b] {
            let mut last = 0u64;
            for _ in 0..3 {
                match hub.poll(client, Duration::from_millis(500)) {
                    PollOutcome::Frame(frame) => {
                        assert!(frame.id > last);
                        last = frame.id;
                    }
                    _ => panic!("expected frame"),
                }
            }
        }
        hub.stop();
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (backend, _) = ScriptedBackend::always_good();
        let hub = CameraHub::new(Box::new(backend));
        hub.open(0, test_settings()).unwrap();
        hub.start().unwrap();
        hub.start().unwrap();
        hub.stop();
        hub.stop();
    }

    #[test]
    fn unsubscribed_client_polls_closed() {
        let (backend, _) = ScriptedBackend::always_good();
        let hub = CameraHub::new(Box::new(backend));
        hub.open(0, test_settings()).unwrap();
        let client = hub.subscribe("face", 5).unwrap();
        assert!(hub.unsubscribe(client));
        match hub.poll(client, Duration::from_millis(10)) {
            PollOutcome::Closed => {}
            _ => panic!("expected closed"),
        }
        hub.stop();
    }

    #[test]
    fn read_storm_triggers_exactly_one_reopen_and_recovers() {
        // Succeed through the probe plus a handful of frames, then fail
        // until the backend is re-opened (open #2 onwards reads fine again).
        let opens_seen = Arc::new(AtomicU32::new(0));
        let opens_for_read = opens_seen.clone();
        let read_fn: ReadFn = Box::new(move |idx| {
            if opens_for_read.load(Ordering::Relaxed) >= 2 || idx < 8 {
                Some(image())
            } else {
                None
            }
        });
        let opens_for_open = opens_seen.clone();
        let (backend, opens) = ScriptedBackend::new(
            move |_| {
                opens_for_open.fetch_add(1, Ordering::Relaxed);
                true
            },
            read_fn,
        );

        let hub = CameraHub::new(Box::new(backend))
            .with_failure_threshold(10)
            .with_reopen_delay(Duration::from_millis(10));
        hub.open(0, test_settings()).unwrap();
        let client = hub.subscribe("helmet", 5).unwrap();
        hub.start().unwrap();

        // Wait for publication to resume after the storm.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut resumed = false;
        let mut seen = 0u32;
        while Instant::now() < deadline {
            if let PollOutcome::Frame(_) = hub.poll(client, Duration::from_millis(100)) {
                seen += 1;
                // The first few frames predate the storm; keep draining until
                // the reopen has happened.
                if hub.stats().reopens >= 1 && seen > 8 {
                    resumed = true;
                    break;
                }
            }
        }
        hub.stop();

        assert!(resumed, "publication did not resume after re-open");
        assert_eq!(hub.stats().reopens, 1, "expected exactly one re-open");
        assert_eq!(&*opens.lock().unwrap(), &[0, 0]);
        assert!(!hub.is_faulted());
    }

    #[test]
    fn reopen_failure_faults_the_hub_and_wakes_pollers() {
        let first_open = Arc::new(AtomicU32::new(0));
        let opens = first_open.clone();
        let (backend, _) = ScriptedBackend::new(
            move |_| opens.fetch_add(1, Ordering::Relaxed) == 0,
            Box::new(|idx| if idx < 5 { Some(image()) } else { None }),
        );
        let hub = CameraHub::new(Box::new(backend))
            .with_failure_threshold(5)
            .with_reopen_delay(Duration::from_millis(10));
        hub.open(0, test_settings()).unwrap();
        let client = hub.subscribe("flame", 5).unwrap();
        hub.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !hub.is_faulted() && Instant::now() < deadline {
            let _ = hub.poll(client, Duration::from_millis(20));
        }
        assert!(hub.is_faulted());
        // Queues were closed on fault; pollers observe Closed once drained.
        loop {
            match hub.poll(client, Duration::from_millis(50)) {
                PollOutcome::Frame(_) => continue,
                PollOutcome::Closed => break,
                PollOutcome::TimedOut => panic!("expected closed after fault"),
            }
        }
        hub.stop();
    }

    #[test]
    fn reaper_removes_stale_empty_clients_but_keeps_backlogged_ones() {
        // The camera delivers a short burst and then goes quiet (threshold
        // high enough that no re-open happens during the test), so
        // last-access stamps stop being refreshed by delivery.
        let (backend, _) = ScriptedBackend::new(
            |_| true,
            Box::new(|idx| if idx < 8 { Some(image()) } else { None }),
        );
        let hub = CameraHub::new(Box::new(backend))
            .with_failure_threshold(100_000)
            .with_reaper_timing(Duration::from_millis(50), Duration::from_millis(150));
        hub.open(0, test_settings()).unwrap();
        let backlogged = hub.subscribe("backlogged", 5).unwrap();
        let drained = hub.subscribe("drained", 5).unwrap();
        hub.start().unwrap();

        // Let the burst land in both queues, then empty only one of them.
        std::thread::sleep(Duration::from_millis(100));
        while let PollOutcome::Frame(_) = hub.poll(drained, Duration::from_millis(20)) {}

        // Several reaper scans beyond the client timeout.
        std::thread::sleep(Duration::from_millis(500));

        match hub.poll(drained, Duration::from_millis(10)) {
            PollOutcome::Closed => {}
            _ => panic!("empty stale client should have been reaped"),
        }
        match hub.poll(backlogged, Duration::from_millis(10)) {
            PollOutcome::Frame(_) => {}
            _ => panic!("client with pending frames must never be reaped"),
        }
        hub.stop();
    }
}
