//! Model lifecycle — single asynchronous load of the inference engine.
//!
//! Status is broadcast on a watch channel. Transitions only move
//! forward (`Unloaded → Loading → Ready`), except a load may fail
//! (`Loading → Failed`) and a later explicit `initialize()` call may
//! retry (`Failed → Loading`). Once `Ready` the engine persists for
//! the life of the process; there is no unload.

use crate::engine::{spawn_engine, EngineHandle, LandmarkModel, ModelError};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Tri-state (plus failure) status of the inference engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
    Failed(String),
}

/// Factory that performs the blocking model construction. Runs on the
/// blocking pool, so it may take as long as it needs.
pub type ModelLoader = Arc<dyn Fn() -> Result<Box<dyn LandmarkModel>, ModelError> + Send + Sync>;

/// Owns the process-wide engine load.
///
/// Concurrent `initialize()` calls during `Loading` do not start a
/// second load; they await and observe the in-flight outcome.
pub struct ModelLifecycle {
    loader: ModelLoader,
    status_tx: watch::Sender<ModelStatus>,
    engine: Mutex<Option<EngineHandle>>,
}

impl ModelLifecycle {
    pub fn new(loader: ModelLoader) -> Self {
        let (status_tx, _) = watch::channel(ModelStatus::Unloaded);
        Self {
            loader,
            status_tx,
            engine: Mutex::new(None),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> ModelStatus {
        self.status_tx.borrow().clone()
    }

    /// Subscribe to status transitions.
    pub fn subscribe(&self) -> watch::Receiver<ModelStatus> {
        self.status_tx.subscribe()
    }

    /// Trigger (or join) the engine load and return the handle once
    /// `Ready`. On failure the status carries the reason and the error
    /// is returned; no automatic retry happens — re-invoking this
    /// method after a failure starts a fresh load.
    pub async fn initialize(&self) -> Result<EngineHandle, ModelError> {
        let mut rx = self.status_tx.subscribe();

        // Atomically claim the load if nobody holds it.
        let claimed = self.status_tx.send_if_modified(|status| match status {
            ModelStatus::Unloaded | ModelStatus::Failed(_) => {
                *status = ModelStatus::Loading;
                true
            }
            _ => false,
        });

        if claimed {
            return self.run_load().await;
        }

        // Somebody else is (or was) loading: observe their outcome.
        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                ModelStatus::Ready => {
                    let engine = self
                        .engine
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .clone();
                    return engine.ok_or_else(|| {
                        ModelError::Load("engine handle missing after load".into())
                    });
                }
                ModelStatus::Failed(reason) => return Err(ModelError::Load(reason)),
                ModelStatus::Loading | ModelStatus::Unloaded => {
                    if rx.changed().await.is_err() {
                        return Err(ModelError::Load("lifecycle dropped during load".into()));
                    }
                }
            }
        }
    }

    /// Perform the load this caller claimed.
    async fn run_load(&self) -> Result<EngineHandle, ModelError> {
        tracing::info!("loading landmark model");
        let loader = Arc::clone(&self.loader);
        let loaded = tokio::task::spawn_blocking(move || loader())
            .await
            .map_err(|e| ModelError::Load(format!("load task panicked: {e}")))?;

        match loaded {
            Ok(model) => {
                let handle = spawn_engine(model);
                *self
                    .engine
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle.clone());
                self.status_tx.send_replace(ModelStatus::Ready);
                tracing::info!("landmark model ready");
                Ok(handle)
            }
            Err(e) => {
                tracing::error!(error = %e, "landmark model load failed");
                self.status_tx
                    .send_replace(ModelStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }
}
