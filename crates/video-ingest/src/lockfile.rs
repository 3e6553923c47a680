//! Advisory single-writer lock for a shared capture device.
//!
//! The lock is a plain file whose only content is the owning process id.
//! A stale lock (owner no longer exists) is discarded on acquire, so a crash
//! never wedges the device. This coordinates multiple sitewatch processes on
//! one box; it does not protect against non-cooperating programs.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    process,
};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

pub struct DeviceLock {
    path: PathBuf,
}

impl DeviceLock {
    /// Default lock path for a device id.
    pub fn path_for(device_id: i32) -> PathBuf {
        std::env::temp_dir().join(format!("sitewatch-camera-{device_id}.lock"))
    }

    /// Acquire the lock, reclaiming it if the recorded owner is gone.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(owner) = read_owner(&path) {
            if owner != process::id() && process_alive(owner) {
                bail!(
                    "camera is locked by running process {owner} ({})",
                    path.display()
                );
            }
            warn!("discarding stale camera lock held by dead process {owner}");
            let _ = fs::remove_file(&path);
        }

        let mut file = fs::File::create(&path)
            .with_context(|| format!("failed to create lock file {}", path.display()))?;
        writeln!(file, "{}", process::id())?;
        info!("acquired camera lock {}", path.display());
        Ok(Self { path })
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        // Only remove a lock we still own.
        if read_owner(&self.path) == Some(process::id()) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}
