//! OpenCV-backed camera capture.

use opencv::{
    core::MatTraitConstManual,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst, VideoWriter},
};
use tracing::{debug, info, warn};

use crate::{
    backend::{CaptureBackend, CapturedImage},
    types::{CaptureError, CaptureSettings, FrameFormat},
};

/// V4L2-first capture device driven through OpenCV's videoio module.
#[derive(Default)]
pub struct OpenCvCapture {
    cap: Option<VideoCapture>,
    device: i32,
}

impl OpenCvCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureBackend for OpenCvCapture {
    fn open(&mut self, device: i32, settings: &CaptureSettings) -> Result<(), CaptureError> {
        self.close();

        for backend in [videoio::CAP_V4L2, videoio::CAP_ANY] {
            let mut cap = match VideoCapture::new(device, backend) {
                Ok(cap) => cap,
                Err(err) => {
                    debug!("device {device}: backend {backend} failed to construct: {err}");
                    continue;
                }
            };
            if !cap.is_opened().unwrap_or(false) {
                continue;
            }
            configure(&mut cap, settings);
            info!("opened camera device {device} via videoio backend {backend}");
            self.cap = Some(cap);
            self.device = device;
            return Ok(());
        }

        Err(CaptureError::Open { device })
    }

    fn read(&mut self) -> Option<CapturedImage> {
        let cap = self.cap.as_mut()?;
        let mut mat = Mat::default();
        match cap.read(&mut mat) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => {
                debug!("device {}: read error: {err}", self.device);
                return None;
            }
        }
        let size = mat.size().ok()?;
        if size.width <= 0 || size.height <= 0 {
            return None;
        }
        let data = mat.data_bytes().ok()?.to_vec();
        Some(CapturedImage {
            data,
            width: size.width,
            height: size.height,
            format: FrameFormat::Bgr8,
        })
    }

    fn close(&mut self) {
        if let Some(mut cap) = self.cap.take() {
            let _ = cap.release();
            info!("camera device {} released", self.device);
        }
    }

    fn is_open(&self) -> bool {
        self.cap
            .as_ref()
            .map(|cap| cap.is_opened().unwrap_or(false))
            .unwrap_or(false)
    }
}

/// Apply capture settings in the order the driver expects: fourcc first,
/// then buffer depth, resolution, frame rate, and focus/exposure defaults.
fn configure(cap: &mut VideoCapture, settings: &CaptureSettings) {
    let mut mjpg_set = false;
    if let Ok(mjpg) = VideoWriter::fourcc('M', 'J', 'P', 'G') {
        mjpg_set = matches!(cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64), Ok(true));
    }
    if !mjpg_set {
        if let Ok(yuyv) = VideoWriter::fourcc('Y', 'U', 'Y', 'V') {
            let _ = cap.set(videoio::CAP_PROP_FOURCC, yuyv as f64);
        }
        warn!("MJPG not accepted by driver, falling back to YUYV");
    }
    let _ = cap.set(videoio::CAP_PROP_BUFFERSIZE, 2.0);
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, settings.width as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, settings.height as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, settings.fps);
    let _ = cap.set(videoio::CAP_PROP_AUTOFOCUS, 0.0);
    let _ = cap.set(videoio::CAP_PROP_AUTO_EXPOSURE, 1.0);

    let actual_w = cap.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0);
    let actual_h = cap.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0);
    let actual_fps = cap.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
    info!(
        "camera configured: {actual_w:.0}x{actual_h:.0} @ {actual_fps:.0} fps (mjpg: {mjpg_set})"
    );
}
