//! tryon-core — Face-landmark inference and pose estimation.
//!
//! Wraps the MediaPipe FaceMesh network (via ONNX Runtime) behind a
//! black-box engine seam, owns the process-wide model lifecycle, and
//! turns landmark sets into smoothed overlay poses.

pub mod engine;
pub mod facemesh;
pub mod lifecycle;
pub mod pose;
pub mod types;

pub use engine::{spawn_engine, EngineError, EngineHandle, LandmarkModel, ModelError};
pub use facemesh::{EngineConfig, FaceMesh};
pub use lifecycle::{ModelLifecycle, ModelLoader, ModelStatus};
pub use pose::{PoseEstimator, DEFAULT_SMOOTHING};
pub use types::{Landmark, LandmarkSet, Pose};
