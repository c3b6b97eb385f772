use std::path::PathBuf;
use tryon_core::DEFAULT_SMOOTHING;
use tryon_hw::Facing;

/// Daemon configuration, loaded from `TRYON_*` environment variables;
/// CLI flags override individual fields afterward.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Ideal capture width (advisory).
    pub capture_width: u32,
    /// Ideal capture height (advisory).
    pub capture_height: u32,
    /// Camera facing hint.
    pub facing: Facing,
    /// Path to the FaceMesh ONNX model file.
    pub model_path: PathBuf,
    /// Path to the glasses overlay texture (RGBA image).
    pub overlay_path: PathBuf,
    /// Pose smoothing factor (0.1–0.2 is the useful range).
    pub smoothing: f32,
    /// Upper bound on faces returned per frame.
    pub max_faces: usize,
    /// Render loop cadence in frames per second.
    pub render_fps: u32,
}

impl Config {
    /// Load configuration from `TRYON_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("TRYON_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/share/tryon/models"));

        Self {
            camera_device: std::env::var("TRYON_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            capture_width: env_u32("TRYON_CAPTURE_WIDTH", 640),
            capture_height: env_u32("TRYON_CAPTURE_HEIGHT", 480),
            facing: std::env::var("TRYON_FACING")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Facing::User),
            model_path: std::env::var("TRYON_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| model_dir.join("face_mesh.onnx")),
            overlay_path: std::env::var("TRYON_OVERLAY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/usr/share/tryon/glasses.png")),
            smoothing: env_f32("TRYON_SMOOTHING", DEFAULT_SMOOTHING),
            max_faces: env_usize("TRYON_MAX_FACES", 1),
            render_fps: env_u32("TRYON_RENDER_FPS", crate::render::RENDER_FPS),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
