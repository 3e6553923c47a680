//! The process-wide run flag and signal wiring.

use std::sync::{
    Arc, Once,
    atomic::{AtomicBool, Ordering},
};

use tracing::{info, warn};

/// Cooperative termination signal shared by every loop in the pipeline.
///
/// Cleared by SIGINT/SIGTERM, the display quit key, or a fatal capture
/// fault; never set back. All blocking waits use short timeouts, so clearing
/// the flag is all a caller ever needs to do.
#[derive(Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Trap SIGINT/SIGTERM and translate them into a run-flag clear. The handler
/// does nothing else; draining is the supervisor's job.
pub fn install_signal_handlers(run: &RunFlag) {
    static HANDLER: Once = Once::new();
    let run = run.clone();
    HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            run.request_stop();
        }) {
            warn!("failed to install signal handler: {err}");
        } else {
            info!("signal handlers installed");
        }
    });
}
