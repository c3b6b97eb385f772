use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tryon_core::{EngineConfig, FaceMesh, LandmarkModel, ModelLifecycle, ModelLoader, PoseEstimator};
use tryon_hw::{CaptureConstraints, Facing};

mod config;
mod detection;
mod render;
mod session;
mod snapshot;

use config::Config;
use render::SpriteRenderer;
use session::{SessionController, SessionParams};

#[derive(Parser)]
#[command(name = "tryond", about = "tryon virtual try-on session daemon")]
struct Cli {
    /// V4L2 device path
    #[arg(long)]
    device: Option<String>,
    /// Ideal capture width
    #[arg(long)]
    width: Option<u32>,
    /// Ideal capture height
    #[arg(long)]
    height: Option<u32>,
    /// Camera facing hint (user|environment)
    #[arg(long)]
    facing: Option<Facing>,
    /// FaceMesh ONNX model path
    #[arg(long)]
    model: Option<String>,
    /// Glasses overlay texture path
    #[arg(long)]
    overlay: Option<String>,
    /// Pose smoothing factor
    #[arg(long)]
    alpha: Option<f32>,
    /// Capture a snapshot every N seconds while running
    #[arg(long)]
    snapshot_every: Option<u64>,
    /// List capture devices as JSON and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        let devices = tryon_hw::list_devices();
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    let mut cfg = Config::from_env();
    if let Some(device) = cli.device {
        cfg.camera_device = device;
    }
    if let Some(width) = cli.width {
        cfg.capture_width = width;
    }
    if let Some(height) = cli.height {
        cfg.capture_height = height;
    }
    if let Some(facing) = cli.facing {
        cfg.facing = facing;
    }
    if let Some(model) = cli.model {
        cfg.model_path = model.into();
    }
    if let Some(overlay) = cli.overlay {
        cfg.overlay_path = overlay.into();
    }
    if let Some(alpha) = cli.alpha {
        cfg.smoothing = alpha;
    }

    tracing::info!(
        device = %cfg.camera_device,
        model = %cfg.model_path.display(),
        overlay = %cfg.overlay_path.display(),
        "tryond starting"
    );

    let model_path = cfg.model_path.to_string_lossy().into_owned();
    let engine_config = EngineConfig {
        max_faces: cfg.max_faces,
    };
    let loader: ModelLoader = Arc::new(move || {
        FaceMesh::load(&model_path, engine_config)
            .map(|m| Box::new(m) as Box<dyn LandmarkModel>)
    });

    let renderer = SpriteRenderer::from_path(&cfg.overlay_path.to_string_lossy())
        .context("loading overlay texture")?;

    let mut session = SessionController::new(
        ModelLifecycle::new(loader),
        Box::new(renderer),
        SessionParams {
            device: cfg.camera_device.clone(),
            constraints: CaptureConstraints {
                width: cfg.capture_width,
                height: cfg.capture_height,
                facing: cfg.facing,
            },
            estimator: PoseEstimator::new(cfg.smoothing),
            render_fps: cfg.render_fps,
        },
    );

    session.start().await.context("starting try-on session")?;
    tracing::info!("tryond ready");

    let mut fps_ticker = tokio::time::interval(Duration::from_secs(1));
    let mut snap_ticker = cli
        .snapshot_every
        .map(|secs| tokio::time::interval(Duration::from_secs(secs.max(1))));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = fps_ticker.tick() => {
                tracing::info!(fps = session.fps(), pose = session.pose().is_some(), "detection");
            }
            _ = tick_opt(&mut snap_ticker) => {
                match session.snapshot() {
                    Ok(index) => tracing::info!(index, "snapshot captured"),
                    Err(e) => tracing::warn!(error = %e, "snapshot failed"),
                }
            }
        }
    }

    tracing::info!("tryond shutting down");
    session.stop().await;

    let summary = serde_json::json!({
        "status": format!("{:?}", session.status()),
        "snapshots": session.snapshots().len(),
        "last_fps": session.fps(),
    });
    println!("{summary}");

    Ok(())
}

/// Tick an optional interval; pending forever when absent.
async fn tick_opt(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
