//! tryon-hw — Hardware abstraction for live camera capture.
//!
//! Provides a V4L2-backed capture session that publishes RGB frames
//! into a latest-frame register, plus the pixel ops the pipeline needs
//! (YUYV conversion, horizontal mirroring).

pub mod capture;
pub mod frame;

pub use capture::{
    list_devices, CaptureConstraints, CaptureError, CaptureHandle, CaptureSession, DeviceInfo,
    Facing,
};
pub use frame::{mirror_horizontal, yuyv_to_rgb, Frame, FrameError};
