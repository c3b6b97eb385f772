//! V4L2 capture session via the `v4l` crate.
//!
//! `acquire` negotiates a stream against advisory constraints, spawns
//! a capture thread that publishes frames into a last-write-wins watch
//! slot, and resolves once the stream has produced its first frame.
//! One live handle per session; release is idempotent.

use crate::frame::{self, Frame};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("stream failed: {0}")]
    StreamFailed(String),
    #[error("a capture handle is already live for this session")]
    AlreadyActive,
}

/// Camera facing preference. Advisory — V4L2 has no facing notion, so
/// this is logged and otherwise left to device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    User,
    Environment,
}

impl std::str::FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "front" => Ok(Facing::User),
            "environment" | "rear" | "back" => Ok(Facing::Environment),
            other => Err(format!("unknown facing: {other} (use user|environment)")),
        }
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::User => write!(f, "user"),
            Facing::Environment => write!(f, "environment"),
        }
    }
}

/// Advisory stream constraints — ideal, not exact. The driver may
/// negotiate different dimensions; the handle reports what it got.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub facing: Facing,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            facing: Facing::User,
        }
    }
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, converted to RGB).
    Yuyv,
    /// RGB24 (3 bytes/pixel, passed through).
    Rgb24,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Gatekeeper for the one-live-handle-per-session rule.
pub struct CaptureSession {
    active: Arc<AtomicBool>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acquire a live video stream matching the constraints.
    ///
    /// Resolves only after the stream has produced its first frame, so
    /// callers may start pulling frames immediately. A second acquire
    /// before `release` is rejected with `AlreadyActive`.
    pub async fn acquire(
        &self,
        device_path: &str,
        constraints: CaptureConstraints,
    ) -> Result<CaptureHandle, CaptureError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyActive);
        }

        match self.acquire_inner(device_path, constraints).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn acquire_inner(
        &self,
        device_path: &str,
        constraints: CaptureConstraints,
    ) -> Result<CaptureHandle, CaptureError> {
        if !Path::new(device_path).exists() {
            return Err(CaptureError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CaptureError::DeviceBusy
            } else if msg.contains("denied") || msg.contains("EACCES") {
                CaptureError::PermissionDenied(format!("{device_path}: {e}"))
            } else {
                CaptureError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CaptureError::StreamFailed(format!("failed to query capabilities: {e}")))?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            facing_hint = %constraints.facing,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::StreamingNotSupported);
        }

        // Constraints are ideal values; take whatever the driver gives back.
        let mut fmt = device.format().map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.width;
        fmt.height = constraints.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CaptureError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else {
            return Err(CaptureError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or RGB3)",
                negotiated.fourcc
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let (frames_tx, frames_rx) = watch::channel::<Option<Frame>>(None);
        let stop = Arc::new(AtomicBool::new(false));

        let thread = spawn_capture_thread(
            device,
            negotiated.width,
            negotiated.height,
            pixel_format,
            frames_tx,
            Arc::clone(&stop),
        );

        let mut handle = CaptureHandle {
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            frames_rx,
            stop,
            thread: Some(thread),
            session_active: Arc::clone(&self.active),
        };

        // Callers must not pull frames before the stream is live.
        if let Err(e) = wait_first_frame(&mut handle.frames_rx.clone()).await {
            handle.release();
            return Err(e);
        }

        Ok(handle)
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Block until the capture thread publishes its first frame.
async fn wait_first_frame(
    rx: &mut watch::Receiver<Option<Frame>>,
) -> Result<(), CaptureError> {
    let wait = async {
        loop {
            if rx.borrow_and_update().is_some() {
                return Ok(());
            }
            if rx.changed().await.is_err() {
                return Err(CaptureError::StreamFailed(
                    "capture thread exited before first frame".into(),
                ));
            }
        }
    };

    tokio::time::timeout(FIRST_FRAME_TIMEOUT, wait)
        .await
        .map_err(|_| {
            CaptureError::StreamFailed(format!(
                "no frame within {}s",
                FIRST_FRAME_TIMEOUT.as_secs()
            ))
        })?
}

/// Dequeue frames on a dedicated thread, converting to RGB and
/// publishing into the watch slot (last write wins).
fn spawn_capture_thread(
    device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    frames_tx: watch::Sender<Option<Frame>>,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("tryon-capture".into())
        .spawn(move || {
            tracing::info!("capture thread started");

            let mut stream =
                match MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to create mmap stream");
                        return;
                    }
                };

            while !stop.load(Ordering::SeqCst) {
                let (buf, meta) = match stream.next() {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to dequeue buffer");
                        continue;
                    }
                };

                let rgb = match pixel_format {
                    PixelFormat::Yuyv => match frame::yuyv_to_rgb(buf, width, height) {
                        Ok(rgb) => rgb,
                        Err(e) => {
                            tracing::warn!(error = %e, "YUYV conversion failed");
                            continue;
                        }
                    },
                    PixelFormat::Rgb24 => {
                        let expected = Frame::rgb_len(width, height);
                        if buf.len() < expected {
                            tracing::warn!(
                                expected,
                                actual = buf.len(),
                                "RGB3 buffer too short"
                            );
                            continue;
                        }
                        buf[..expected].to_vec()
                    }
                };

                frames_tx.send_replace(Some(Frame {
                    data: rgb,
                    width,
                    height,
                    timestamp: std::time::Instant::now(),
                    sequence: meta.sequence,
                }));
            }

            tracing::info!("capture thread stopped");
        })
        .expect("failed to spawn capture thread")
}

/// Owns the live hardware stream: the capture thread and its stop flag.
/// At most one per session.
#[derive(Debug)]
pub struct CaptureHandle {
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    frames_rx: watch::Receiver<Option<Frame>>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    session_active: Arc<AtomicBool>,
}

impl CaptureHandle {
    /// Subscribe to the latest-frame register.
    pub fn frames(&self) -> watch::Receiver<Option<Frame>> {
        self.frames_rx.clone()
    }

    /// Stop the capture thread and free the device. Idempotent.
    pub fn release(&mut self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.session_active.store(false, Ordering::SeqCst);
        tracing::info!(device = %self.device_path, "capture released");
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..16 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        devices.push(DeviceInfo {
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_from_str() {
        assert_eq!("user".parse::<Facing>().unwrap(), Facing::User);
        assert_eq!("rear".parse::<Facing>().unwrap(), Facing::Environment);
        assert!("sideways".parse::<Facing>().is_err());
    }

    #[tokio::test]
    async fn test_acquire_missing_device() {
        let session = CaptureSession::new();
        let err = session
            .acquire("/dev/video-nonexistent", CaptureConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_acquire_releases_the_session_slot() {
        let session = CaptureSession::new();
        for _ in 0..2 {
            let err = session
                .acquire("/dev/video-nonexistent", CaptureConstraints::default())
                .await
                .unwrap_err();
            // Both attempts see the device error, not AlreadyActive.
            assert!(matches!(err, CaptureError::DeviceNotFound(_)));
        }
    }
}
