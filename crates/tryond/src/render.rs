//! Render loop and overlay renderer.
//!
//! The renderer is a black box behind [`OverlayRenderer`]; the bundled
//! [`SpriteRenderer`] rasterizes a glasses texture into an off-screen
//! RGBA canvas. The render loop runs on its own fixed cadence,
//! independent of detection: it reads whatever pose is latest (none →
//! overlay hidden) and redraws, publishing the rendered appearance
//! into a register the snapshot compositor reads.

use image::RgbaImage;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tryon_core::Pose;

/// Rendered sprite width at pose scale 1.0, in canvas pixels. The pose
/// scale is relative to a 100 px eye-corner distance, so the default
/// glasses span a bit over twice that.
const SPRITE_BASE_WIDTH: f32 = 220.0;

/// Display-frame cadence of the render loop.
pub const RENDER_FPS: u32 = 60;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("scene not created")]
    SceneNotCreated,
    #[error("overlay texture failed to load: {0}")]
    TextureLoad(String),
    #[error("scene creation failed: {0}")]
    SceneCreation(String),
}

/// The overlay scene's current rendered appearance.
#[derive(Clone)]
pub struct OverlayImage {
    /// RGBA pixels (width * height * 4 bytes).
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Black-box renderer seam.
///
/// Lifecycle: `create_scene` once, then any number of
/// transform/render calls, then `dispose` (idempotent).
pub trait OverlayRenderer: Send {
    /// Allocate scene resources for a canvas of the given dimensions.
    fn create_scene(&mut self, width: u32, height: u32) -> Result<(), RenderError>;

    /// Position the overlay for the next draw; `None` hides it.
    fn set_overlay_transform(&mut self, pose: Option<&Pose>);

    /// Draw the scene and return its rendered appearance.
    fn render_frame(&mut self) -> Result<OverlayImage, RenderError>;

    /// Release scene resources. Idempotent.
    fn dispose(&mut self);
}

/// Software renderer: draws one RGBA glasses texture with the pose's
/// translation, rotation and scale, bilinear-sampled.
pub struct SpriteRenderer {
    texture: RgbaImage,
    canvas: Option<RgbaImage>,
    transform: Option<Pose>,
}

impl SpriteRenderer {
    pub fn new(texture: RgbaImage) -> Self {
        Self {
            texture,
            canvas: None,
            transform: None,
        }
    }

    /// Load the glasses texture from an image file.
    pub fn from_path(path: &str) -> Result<Self, RenderError> {
        let texture = image::open(path)
            .map_err(|e| RenderError::TextureLoad(format!("{path}: {e}")))?
            .to_rgba8();
        tracing::info!(
            path,
            width = texture.width(),
            height = texture.height(),
            "overlay texture loaded"
        );
        Ok(Self::new(texture))
    }

    /// Draw the texture onto the canvas at the given pose.
    ///
    /// Walks the destination pixels of the sprite's rotated bounding
    /// box and inverse-maps each one into texture space (rotate by
    /// -rotation, divide by scale), sampling bilinearly.
    fn draw_sprite(canvas: &mut RgbaImage, texture: &RgbaImage, pose: &Pose) {
        let tex_w = texture.width() as f32;
        let tex_h = texture.height() as f32;
        if tex_w == 0.0 || tex_h == 0.0 {
            return;
        }

        // Pixels of rendered sprite per texture pixel.
        let px_scale = pose.scale * SPRITE_BASE_WIDTH / tex_w;
        if px_scale <= 0.0 {
            return;
        }

        let half_w = tex_w * px_scale / 2.0;
        let half_h = tex_h * px_scale / 2.0;
        let radius = (half_w * half_w + half_h * half_h).sqrt();

        let (cx, cy) = (pose.position[0], pose.position[1]);
        let (sin, cos) = pose.rotation_z.sin_cos();

        let x_min = ((cx - radius).floor() as i64).max(0) as u32;
        let y_min = ((cy - radius).floor() as i64).max(0) as u32;
        let x_max = ((cx + radius).ceil() as i64).max(0) as u32;
        let y_max = ((cy + radius).ceil() as i64).max(0) as u32;

        for y in y_min..y_max.min(canvas.height()) {
            for x in x_min..x_max.min(canvas.width()) {
                // Inverse transform: canvas → texture coordinates.
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                let ux = (dx * cos + dy * sin) / px_scale + tex_w / 2.0;
                let uy = (-dx * sin + dy * cos) / px_scale + tex_h / 2.0;

                if ux < 0.0 || uy < 0.0 || ux >= tex_w - 1.0 || uy >= tex_h - 1.0 {
                    continue;
                }

                let sample = bilinear_rgba(texture, ux, uy);
                if sample[3] == 0 {
                    continue;
                }
                let dst = canvas.get_pixel_mut(x, y);
                *dst = image::Rgba(alpha_over(sample, dst.0));
            }
        }
    }
}

impl OverlayRenderer for SpriteRenderer {
    fn create_scene(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::SceneCreation(format!(
                "degenerate canvas {width}x{height}"
            )));
        }
        self.canvas = Some(RgbaImage::new(width, height));
        tracing::info!(width, height, "overlay scene created");
        Ok(())
    }

    fn set_overlay_transform(&mut self, pose: Option<&Pose>) {
        self.transform = pose.copied();
    }

    fn render_frame(&mut self) -> Result<OverlayImage, RenderError> {
        let canvas = self.canvas.as_mut().ok_or(RenderError::SceneNotCreated)?;

        // Clear to fully transparent, then draw if a pose is set.
        for px in canvas.pixels_mut() {
            *px = image::Rgba([0, 0, 0, 0]);
        }
        if let Some(pose) = self.transform {
            Self::draw_sprite(canvas, &self.texture, &pose);
        }

        Ok(OverlayImage {
            rgba: canvas.as_raw().clone(),
            width: canvas.width(),
            height: canvas.height(),
        })
    }

    fn dispose(&mut self) {
        self.canvas = None;
        self.transform = None;
    }
}

/// Bilinear RGBA sample at fractional texture coordinates.
fn bilinear_rgba(texture: &RgbaImage, x: f32, y: f32) -> [u8; 4] {
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(texture.width() - 1);
    let y1 = (y0 + 1).min(texture.height() - 1);
    let fx = x - x.floor();
    let fy = y - y.floor();

    let tl = texture.get_pixel(x0, y0).0;
    let tr = texture.get_pixel(x1, y0).0;
    let bl = texture.get_pixel(x0, y1).0;
    let br = texture.get_pixel(x1, y1).0;

    std::array::from_fn(|c| {
        let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
        let bot = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
        (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8
    })
}

/// Source-over alpha compositing of `src` onto `dst`.
pub fn alpha_over(src: [u8; 4], dst: [u8; 4]) -> [u8; 4] {
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a == 0.0 {
        return [0, 0, 0, 0];
    }
    let blend = |s: u8, d: u8| {
        let v = (s as f32 * sa + d as f32 * da * (1.0 - sa)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };
    [
        blend(src[0], dst[0]),
        blend(src[1], dst[1]),
        blend(src[2], dst[2]),
        (out_a * 255.0).round() as u8,
    ]
}

/// Continuously-rescheduled render unit of work, clocked at
/// [`RENDER_FPS`] independent of the detection cadence.
pub struct RenderLoop {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<Box<dyn OverlayRenderer>>>,
}

impl RenderLoop {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            task: None,
        }
    }

    /// Start redrawing. Each tick reads the latest pose (idempotent
    /// redraw when nothing changed; hidden overlay when no pose has
    /// ever been published) and publishes the rendered appearance.
    /// Never waits on the detection loop.
    pub fn start(
        &mut self,
        mut renderer: Box<dyn OverlayRenderer>,
        pose_rx: watch::Receiver<Option<Pose>>,
        overlay_tx: watch::Sender<Option<OverlayImage>>,
        fps: u32,
    ) {
        if self.task.is_some() {
            tracing::warn!("render start ignored, loop already running");
            return;
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        self.task = Some(tokio::spawn(async move {
            tracing::info!(fps, "render loop started");
            let period = std::time::Duration::from_micros(1_000_000 / fps.max(1) as u64);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let pose = *pose_rx.borrow();
                        renderer.set_overlay_transform(pose.as_ref());
                        match renderer.render_frame() {
                            Ok(img) => {
                                overlay_tx.send_replace(Some(img));
                            }
                            Err(e) => tracing::warn!(error = %e, "render cycle failed"),
                        }
                    }
                }
            }

            tracing::info!("render loop stopped");
            renderer
        }));
    }

    /// Stop scheduling and hand the renderer back so the session can
    /// dispose it in teardown order. Idempotent; returns `None` when
    /// the loop was never started or already stopped.
    pub async fn stop(&mut self) -> Option<Box<dyn OverlayRenderer>> {
        self.shutdown.send_replace(true);
        match self.task.take() {
            Some(task) => task.await.ok(),
            None => None,
        }
    }
}

impl Default for RenderLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn solid_texture(w: u32, h: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba(rgba))
    }

    fn centered_pose(x: f32, y: f32, scale: f32) -> Pose {
        Pose {
            position: [x, y, 0.0],
            rotation_z: 0.0,
            scale,
        }
    }

    #[test]
    fn test_render_without_scene_fails() {
        let mut r = SpriteRenderer::new(solid_texture(4, 4, [255, 0, 0, 255]));
        assert!(matches!(
            r.render_frame(),
            Err(RenderError::SceneNotCreated)
        ));
    }

    #[test]
    fn test_hidden_overlay_renders_transparent() {
        let mut r = SpriteRenderer::new(solid_texture(4, 4, [255, 0, 0, 255]));
        r.create_scene(32, 32).unwrap();
        r.set_overlay_transform(None);
        let img = r.render_frame().unwrap();
        assert!(img.rgba.chunks_exact(4).all(|px| px[3] == 0));
    }

    #[test]
    fn test_sprite_lands_at_pose_position() {
        let mut r = SpriteRenderer::new(solid_texture(8, 8, [0, 255, 0, 255]));
        r.create_scene(64, 64).unwrap();
        let pose = centered_pose(32.0, 32.0, 0.1); // 22 px wide sprite
        r.set_overlay_transform(Some(&pose));
        let img = r.render_frame().unwrap();

        let at = |x: u32, y: u32| {
            let i = ((y * img.width + x) * 4) as usize;
            [img.rgba[i], img.rgba[i + 1], img.rgba[i + 2], img.rgba[i + 3]]
        };
        assert_eq!(at(32, 32), [0, 255, 0, 255]);
        // Far corner stays untouched.
        assert_eq!(at(2, 2)[3], 0);
    }

    #[test]
    fn test_redraw_is_idempotent() {
        let mut r = SpriteRenderer::new(solid_texture(8, 8, [0, 0, 255, 200]));
        r.create_scene(48, 48).unwrap();
        let pose = centered_pose(24.0, 24.0, 0.2);
        r.set_overlay_transform(Some(&pose));
        let a = r.render_frame().unwrap();
        let b = r.render_frame().unwrap();
        assert_eq!(a.rgba, b.rgba);
    }

    #[test]
    fn test_dispose_is_idempotent_and_releases_scene() {
        let mut r = SpriteRenderer::new(solid_texture(4, 4, [255, 0, 0, 255]));
        r.create_scene(16, 16).unwrap();
        r.dispose();
        r.dispose();
        assert!(r.render_frame().is_err());
    }

    #[test]
    fn test_alpha_over_opaque_src_wins() {
        assert_eq!(
            alpha_over([10, 20, 30, 255], [200, 200, 200, 255]),
            [10, 20, 30, 255]
        );
    }

    #[test]
    fn test_alpha_over_transparent_src_keeps_dst() {
        assert_eq!(
            alpha_over([10, 20, 30, 0], [200, 100, 50, 255]),
            [200, 100, 50, 255]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_render_loop_runs_without_any_pose() {
        let mut r = SpriteRenderer::new(solid_texture(4, 4, [255, 0, 0, 255]));
        r.create_scene(16, 16).unwrap();

        let (_pose_tx, pose_rx) = watch::channel(None);
        let (overlay_tx, mut overlay_rx) = watch::channel(None);

        let mut render = RenderLoop::new();
        render.start(Box::new(r), pose_rx, overlay_tx, 120);

        // The loop redraws even though detection never published.
        tokio::time::timeout(Duration::from_secs(1), overlay_rx.changed())
            .await
            .expect("render loop never produced a frame")
            .unwrap();
        let img = overlay_rx.borrow_and_update().clone().unwrap();
        assert!(img.rgba.chunks_exact(4).all(|px| px[3] == 0));

        let renderer = render.stop().await;
        assert!(renderer.is_some());
        assert!(render.stop().await.is_none()); // idempotent
    }
}
