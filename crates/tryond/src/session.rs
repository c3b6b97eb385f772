//! Session controller — sequences the pipeline up and tears it down.
//!
//! Bring-up order: model → camera → scene → detection loop → render
//! loop. Teardown runs in reverse of acquisition (detection, render,
//! camera, renderer) with every step idempotent, so it is safe to
//! invoke from an error handler mid-initialization and safe to invoke
//! twice.

use crate::detection::DetectionLoop;
use crate::render::{OverlayImage, OverlayRenderer, RenderLoop};
use crate::snapshot::{Snapshot, SnapshotCompositor, SnapshotError};
use thiserror::Error;
use tokio::sync::watch;
use tryon_core::{ModelError, ModelLifecycle, Pose, PoseEstimator};
use tryon_hw::{CaptureConstraints, CaptureError, CaptureHandle, CaptureSession, Frame};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("model initialization failed: {0}")]
    Init(#[from] ModelError),
    #[error("camera capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("render resources unavailable: {0}")]
    Render(#[from] crate::render::RenderError),
    #[error("no frame available yet")]
    NoFrame,
    #[error("snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Overall session status, broadcast for the surrounding UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Starting,
    Running,
    Failed(String),
    Stopped,
}

/// Everything a session needs before it starts.
pub struct SessionParams {
    pub device: String,
    pub constraints: CaptureConstraints,
    pub estimator: PoseEstimator,
    pub render_fps: u32,
}

/// The glue visible to the surrounding UI: owns both loops, the shared
/// registers, the capture handle and the capture list.
pub struct SessionController {
    lifecycle: ModelLifecycle,
    capture: CaptureSession,
    params: SessionParams,
    renderer: Option<Box<dyn OverlayRenderer>>,

    detection: DetectionLoop,
    render: RenderLoop,
    handle: Option<CaptureHandle>,
    frames_rx: Option<watch::Receiver<Option<Frame>>>,
    compositor: SnapshotCompositor,

    pose_tx: watch::Sender<Option<Pose>>,
    fps_tx: watch::Sender<u32>,
    overlay_tx: watch::Sender<Option<OverlayImage>>,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionController {
    pub fn new(
        lifecycle: ModelLifecycle,
        renderer: Box<dyn OverlayRenderer>,
        params: SessionParams,
    ) -> Self {
        let (pose_tx, _) = watch::channel(None);
        let (fps_tx, _) = watch::channel(0);
        let (overlay_tx, _) = watch::channel(None);
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        Self {
            lifecycle,
            capture: CaptureSession::new(),
            params,
            renderer: Some(renderer),
            detection: DetectionLoop::new(),
            render: RenderLoop::new(),
            handle: None,
            frames_rx: None,
            compositor: SnapshotCompositor::new(),
            pose_tx,
            fps_tx,
            overlay_tx,
            status_tx,
        }
    }

    /// Bring the whole pipeline up. On any fatal failure the already
    /// acquired resources are torn down and the status carries the
    /// reason.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.status_tx.send_replace(SessionStatus::Starting);
        match self.start_inner().await {
            Ok(()) => {
                self.status_tx.send_replace(SessionStatus::Running);
                tracing::info!("session running");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "session start failed");
                self.stop().await;
                self.status_tx
                    .send_replace(SessionStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn start_inner(&mut self) -> Result<(), SessionError> {
        let engine = self.lifecycle.initialize().await?;

        let handle = self
            .capture
            .acquire(&self.params.device, self.params.constraints)
            .await?;
        let frames_rx = handle.frames();

        let mut renderer = self.renderer.take().ok_or(SessionError::Render(
            crate::render::RenderError::SceneCreation("renderer already consumed".into()),
        ))?;
        if let Err(e) = renderer.create_scene(handle.width, handle.height) {
            // Keep the renderer for disposal; the handle drops and
            // releases the camera on its own.
            self.renderer = Some(renderer);
            return Err(e.into());
        }

        self.detection.start(
            frames_rx.clone(),
            engine,
            self.params.estimator,
            self.pose_tx.clone(),
            self.fps_tx.clone(),
        );

        self.render.start(
            renderer,
            self.pose_tx.subscribe(),
            self.overlay_tx.clone(),
            self.params.render_fps,
        );

        self.frames_rx = Some(frames_rx);
        self.handle = Some(handle);
        Ok(())
    }

    /// Tear everything down in reverse-of-acquisition order. Every
    /// step is idempotent; calling this twice (or from a half-started
    /// state) is safe.
    pub async fn stop(&mut self) {
        self.detection.stop().await;
        if let Some(renderer) = self.render.stop().await {
            self.renderer = Some(renderer);
        }
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.dispose();
        }
        self.frames_rx = None;
        self.status_tx.send_replace(SessionStatus::Stopped);
        tracing::info!("session stopped");
    }

    /// Capture a still of the current camera frame and overlay.
    pub fn snapshot(&mut self) -> Result<u32, SessionError> {
        let frame = self
            .frames_rx
            .as_ref()
            .and_then(|rx| rx.borrow().clone())
            .ok_or(SessionError::NoFrame)?;
        let overlay = self.overlay_tx.borrow().clone();
        let snap = self.compositor.capture(&frame, overlay.as_ref())?;
        Ok(snap.index)
    }

    pub fn delete_snapshot(&mut self, index: u32) -> bool {
        self.compositor.delete(index)
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        self.compositor.list()
    }

    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Latest published pose (None until the first detection).
    pub fn pose(&self) -> Option<Pose> {
        *self.pose_tx.borrow()
    }

    /// Latest detection-loop fps metric.
    pub fn fps(&self) -> u32 {
        *self.fps_tx.borrow()
    }
}
