//! Inference engine seam.
//!
//! The landmark model is a black box behind [`LandmarkModel`]. Because
//! model inference is blocking and the model is not `Sync`, it runs on
//! a dedicated OS thread; async callers talk to it through a clone-safe
//! [`EngineHandle`] (mpsc request, oneshot reply). One request is served
//! at a time, so callers that await each reply before sending the next
//! get at most one inference in flight by construction.

use crate::types::LandmarkSet;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model load failed: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Black-box face-landmark model: one RGB frame in, zero or more
/// landmark sets out (one per detected face, best face first).
///
/// `infer` may fail per call; callers treat that as transient.
pub trait LandmarkModel: Send {
    fn infer(&mut self, rgb: &[u8], width: u32, height: u32)
        -> Result<Vec<LandmarkSet>, ModelError>;
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Estimate {
        rgb: Vec<u8>,
        width: u32,
        height: u32,
        reply: oneshot::Sender<Result<Vec<LandmarkSet>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run inference on one frame. Suspends until the engine thread
    /// has produced the result for this frame.
    pub async fn estimate(
        &self,
        rgb: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<Vec<LandmarkSet>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Estimate {
                rgb,
                width,
                height,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn a loaded model on a dedicated named OS thread and return the
/// handle async callers use to reach it. The thread exits when the
/// last handle is dropped.
pub fn spawn_engine(mut model: Box<dyn LandmarkModel>) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("tryon-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Estimate {
                        rgb,
                        width,
                        height,
                        reply,
                    } => {
                        let result = model
                            .infer(&rgb, width, height)
                            .map_err(EngineError::Model);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Landmark;

    struct FixedModel {
        sets: Vec<LandmarkSet>,
    }

    impl LandmarkModel for FixedModel {
        fn infer(
            &mut self,
            _rgb: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<LandmarkSet>, ModelError> {
            Ok(self.sets.clone())
        }
    }

    struct FailingModel;

    impl LandmarkModel for FailingModel {
        fn infer(
            &mut self,
            _rgb: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<LandmarkSet>, ModelError> {
            Err(ModelError::Inference("bad frame".into()))
        }
    }

    #[tokio::test]
    async fn test_estimate_round_trip() {
        let set = LandmarkSet::new(vec![Landmark { x: 1.0, y: 2.0, z: 3.0 }], 0.9);
        let handle = spawn_engine(Box::new(FixedModel { sets: vec![set] }));

        let result = handle.estimate(vec![0u8; 12], 2, 2).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get(0).map(|l| l.y), Some(2.0));
    }

    #[tokio::test]
    async fn test_estimate_surfaces_per_call_failure() {
        let handle = spawn_engine(Box::new(FailingModel));
        let err = handle.estimate(vec![0u8; 12], 2, 2).await.unwrap_err();
        assert!(matches!(err, EngineError::Model(ModelError::Inference(_))));
    }

    #[tokio::test]
    async fn test_requests_served_in_order() {
        let set = LandmarkSet::new(vec![], 0.0);
        let handle = spawn_engine(Box::new(FixedModel { sets: vec![set] }));
        for _ in 0..8 {
            let result = handle.estimate(vec![0u8; 3], 1, 1).await.unwrap();
            assert_eq!(result.len(), 1);
        }
    }
}
