//! MediaPipe FaceMesh landmark model via ONNX Runtime.
//!
//! Runs the 468-point face mesh network on a full RGB frame and maps
//! the landmark coordinates back to frame pixel space. The network is
//! single-face; `max_faces` caps the returned list all the same so the
//! engine contract stays honest.

use crate::engine::{LandmarkModel, ModelError};
use crate::types::{Landmark, LandmarkSet};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// --- Named constants (no magic numbers) ---
const FACEMESH_INPUT_SIZE: usize = 192;
const FACEMESH_LANDMARK_COUNT: usize = 468;
const FACEMESH_OUTPUT_LEN: usize = FACEMESH_LANDMARK_COUNT * 3;
const FACEMESH_MEAN: f32 = 127.5;
const FACEMESH_STD: f32 = 127.5;
const FACEMESH_PRESENCE_THRESHOLD: f32 = 0.5;

/// Inference engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Upper bound on faces returned per frame.
    pub max_faces: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_faces: 1 }
    }
}

/// FaceMesh-based landmark model.
pub struct FaceMesh {
    session: Session,
    config: EngineConfig,
    /// Output indices (landmarks, presence score), discovered at load.
    landmark_output: usize,
    score_output: usize,
}

impl FaceMesh {
    /// Load the FaceMesh ONNX model from the given path.
    pub fn load(model_path: &str, config: EngineConfig) -> Result<Self, ModelError> {
        if !Path::new(model_path).exists() {
            return Err(ModelError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded FaceMesh model"
        );

        if output_names.len() < 2 {
            return Err(ModelError::Load(format!(
                "FaceMesh model requires 2 outputs (landmarks, score), got {}",
                output_names.len()
            )));
        }

        let (landmark_output, score_output) = discover_output_indices(&output_names);
        tracing::debug!(landmark_output, score_output, "FaceMesh output tensor mapping");

        Ok(Self {
            session,
            config,
            landmark_output,
            score_output,
        })
    }

    /// Preprocess an RGB frame into a normalized NCHW tensor, resizing
    /// with bilinear interpolation (plain stretch, no letterbox — the
    /// landmark coordinates un-stretch on the way out).
    fn preprocess(&self, rgb: &[u8], width: usize, height: usize) -> Array4<f32> {
        let size = FACEMESH_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        let scale_x = width as f32 / size as f32;
        let scale_y = height as f32 / size as f32;

        for y in 0..size {
            let src_y = (y as f32 + 0.5) * scale_y - 0.5;
            let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
            let y1 = (y0 + 1).min(height - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for x in 0..size {
                let src_x = (x as f32 + 0.5) * scale_x - 0.5;
                let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
                let x1 = (x0 + 1).min(width - 1);
                let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

                for c in 0..3 {
                    let tl = rgb[(y0 * width + x0) * 3 + c] as f32;
                    let tr = rgb[(y0 * width + x1) * 3 + c] as f32;
                    let bl = rgb[(y1 * width + x0) * 3 + c] as f32;
                    let br = rgb[(y1 * width + x1) * 3 + c] as f32;

                    let val = tl * (1.0 - fx) * (1.0 - fy)
                        + tr * fx * (1.0 - fy)
                        + bl * (1.0 - fx) * fy
                        + br * fx * fy;

                    tensor[[0, c, y, x]] = (val - FACEMESH_MEAN) / FACEMESH_STD;
                }
            }
        }

        tensor
    }
}

impl LandmarkModel for FaceMesh {
    fn infer(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<LandmarkSet>, ModelError> {
        let expected = (width * height * 3) as usize;
        if rgb.len() < expected {
            return Err(ModelError::Inference(format!(
                "RGB buffer too short: expected {expected}, got {}",
                rgb.len()
            )));
        }

        let input = self.preprocess(rgb, width as usize, height as usize);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, score) = outputs[self.score_output]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("score tensor: {e}")))?;
        let presence = score.first().copied().unwrap_or(0.0);

        if presence < FACEMESH_PRESENCE_THRESHOLD || self.config.max_faces == 0 {
            // No face (or caller asked for none): empty result, not an error.
            return Ok(vec![]);
        }

        let (_, raw) = outputs[self.landmark_output]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("landmark tensor: {e}")))?;

        if raw.len() < FACEMESH_OUTPUT_LEN {
            return Err(ModelError::Inference(format!(
                "landmark tensor too short: expected {FACEMESH_OUTPUT_LEN}, got {}",
                raw.len()
            )));
        }

        // Map from network input space back to frame pixel space.
        let scale_x = width as f32 / FACEMESH_INPUT_SIZE as f32;
        let scale_y = height as f32 / FACEMESH_INPUT_SIZE as f32;

        let points: Vec<Landmark> = (0..FACEMESH_LANDMARK_COUNT)
            .map(|i| Landmark {
                x: raw[i * 3] * scale_x,
                y: raw[i * 3 + 1] * scale_y,
                z: raw[i * 3 + 2],
            })
            .collect();

        Ok(vec![LandmarkSet::new(points, presence)])
    }
}

/// Discover output tensor ordering by element-count heuristic: the
/// landmark tensor carries 1404 floats, the presence score one. Exports
/// with unrecognizable names fall back to positional ordering
/// ([0] = landmarks, [1] = score).
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let score_by_name = names
        .iter()
        .position(|n| n.contains("score") || n.contains("conf"));
    let landmark_by_name = names
        .iter()
        .position(|n| n.contains("mesh") || n.contains("landmark"));

    match (landmark_by_name, score_by_name) {
        (Some(lm), Some(sc)) if lm != sc => (lm, sc),
        _ => {
            tracing::info!(
                ?names,
                "FaceMesh: output names not recognized, using positional mapping [0]=landmarks, [1]=score"
            );
            (0, 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_named_outputs() {
        let names = vec!["conv2d_score".to_string(), "output_mesh".to_string()];
        assert_eq!(discover_output_indices(&names), (1, 0));
    }

    #[test]
    fn test_discover_falls_back_to_positional() {
        let names = vec!["473".to_string(), "474".to_string()];
        assert_eq!(discover_output_indices(&names), (0, 1));
    }

    #[test]
    fn test_load_missing_model_file() {
        let err = FaceMesh::load("/nonexistent/face_mesh.onnx", EngineConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::ModelNotFound(_)));
    }
}
