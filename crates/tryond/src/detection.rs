//! Detection loop — pull frame, infer, publish pose.
//!
//! One cooperative task, strictly sequential cycles: the next inference
//! is only issued after the previous one's result has been processed,
//! which throttles detection to inference speed. The published pose is
//! a single-writer watch register, so the render loop and the
//! compositor always read the latest value and ordering never goes
//! backward.

use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tryon_core::{EngineHandle, Pose, PoseEstimator};
use tryon_hw::Frame;

/// Poll interval while the frame register is still empty.
const IDLE_POLL: Duration = Duration::from_millis(10);
/// Cap on the published fps metric (sub-millisecond cycles).
const FPS_CAP: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Running,
    Stopped,
}

/// Continuously-rescheduled detection unit of work.
pub struct DetectionLoop {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    state: LoopState,
}

impl DetectionLoop {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            task: None,
            state: LoopState::Idle,
        }
    }

    /// Transition Idle → Running and schedule the first cycle.
    ///
    /// Each cycle: read the latest frame, run inference (at most one
    /// call in flight), publish the smoothed pose on a face hit, hold
    /// the previous pose on an empty result, log and continue on a
    /// per-cycle failure, publish the fps metric.
    pub fn start(
        &mut self,
        mut frames: watch::Receiver<Option<Frame>>,
        engine: EngineHandle,
        estimator: PoseEstimator,
        pose_tx: watch::Sender<Option<Pose>>,
        fps_tx: watch::Sender<u32>,
    ) {
        if self.state != LoopState::Idle {
            tracing::warn!(state = ?self.state, "detection start ignored");
            return;
        }
        self.state = LoopState::Running;

        let shutdown_rx = self.shutdown.subscribe();
        self.task = Some(tokio::spawn(async move {
            tracing::info!("detection loop started");

            while !*shutdown_rx.borrow() {
                let started = Instant::now();

                let frame = frames.borrow_and_update().clone();
                let Some(frame) = frame else {
                    tokio::time::sleep(IDLE_POLL).await;
                    continue;
                };

                match engine.estimate(frame.data, frame.width, frame.height).await {
                    Ok(faces) => {
                        if let Some(first) = faces.first() {
                            let previous = *pose_tx.borrow();
                            if let Some(pose) = estimator.estimate(first, previous.as_ref()) {
                                pose_tx.send_replace(Some(pose));
                            }
                        }
                        // Empty result: hold the previous pose so the
                        // overlay does not flicker on a momentary miss.
                    }
                    Err(e) => {
                        // A single bad frame never stops the loop.
                        tracing::warn!(error = %e, "detection cycle failed");
                    }
                }

                fps_tx.send_replace(cycle_fps(started.elapsed()));
                tokio::task::yield_now().await;
            }

            tracing::info!("detection loop stopped");
        }));
    }

    /// Transition to Stopped and cancel future scheduling. Safe to call
    /// repeatedly and during an in-flight cycle: that cycle finishes
    /// but schedules no successor.
    pub async fn stop(&mut self) {
        self.shutdown.send_replace(true);
        self.state = LoopState::Stopped;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }
}

impl Default for DetectionLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Fps metric for one cycle: 1000 / wall-clock ms, floored, capped.
fn cycle_fps(elapsed: Duration) -> u32 {
    let ms = elapsed.as_millis() as u64;
    if ms == 0 {
        FPS_CAP
    } else {
        ((1000 / ms) as u32).min(FPS_CAP)
    }
}
