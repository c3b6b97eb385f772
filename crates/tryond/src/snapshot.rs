//! Snapshot compositor — still captures of the live try-on view.
//!
//! A capture mirrors the camera frame horizontally (the live preview
//! is mirrored, and a still should read the same way), mirrors and
//! composites the overlay's current rendered appearance on top at the
//! frame's native resolution, and appends the PNG to the capture list.

use crate::render::{alpha_over, OverlayImage};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use std::io::Cursor;
use thiserror::Error;
use tryon_hw::{frame::mirror_horizontal, Frame};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("frame buffer too short: expected {expected}, got {actual}")]
    BadFrame { expected: usize, actual: usize },
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// One captured still.
#[derive(Clone)]
pub struct Snapshot {
    /// Position in the capture list. Indices are never reused, so a
    /// deleted snapshot's index stays dead.
    pub index: u32,
    /// PNG-encoded composite at the frame's native resolution.
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
}

/// Append-only capture list with per-index deletion.
pub struct SnapshotCompositor {
    snapshots: Vec<Snapshot>,
    next_index: u32,
}

impl SnapshotCompositor {
    pub fn new() -> Self {
        Self {
            snapshots: Vec::new(),
            next_index: 0,
        }
    }

    /// Compose the current frame and overlay into a still and append it.
    pub fn capture(
        &mut self,
        frame: &Frame,
        overlay: Option<&OverlayImage>,
    ) -> Result<&Snapshot, SnapshotError> {
        let expected = Frame::rgb_len(frame.width, frame.height);
        if frame.data.len() < expected {
            return Err(SnapshotError::BadFrame {
                expected,
                actual: frame.data.len(),
            });
        }

        let composite = compose(frame, overlay);

        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(composite)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;

        let snapshot = Snapshot {
            index: self.next_index,
            png,
            width: frame.width,
            height: frame.height,
            created_at: Utc::now(),
        };
        self.next_index += 1;
        tracing::info!(index = snapshot.index, "snapshot captured");
        self.snapshots.push(snapshot);
        Ok(self.snapshots.last().expect("just pushed"))
    }

    /// Remove one snapshot. Surviving entries keep their indices.
    /// Returns false if the index was never assigned or already deleted.
    pub fn delete(&mut self, index: u32) -> bool {
        let before = self.snapshots.len();
        self.snapshots.retain(|s| s.index != index);
        let removed = self.snapshots.len() != before;
        if removed {
            tracing::info!(index, "snapshot deleted");
        }
        removed
    }

    pub fn get(&self, index: u32) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.index == index)
    }

    /// All snapshots in capture order.
    pub fn list(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl Default for SnapshotCompositor {
    fn default() -> Self {
        Self::new()
    }
}

/// Mirror the frame, then alpha-composite the (mirrored) overlay on top
/// at the frame's native resolution. The overlay was rendered in
/// unmirrored frame coordinates, so it is flipped along with the frame
/// to stay glued to the face.
fn compose(frame: &Frame, overlay: Option<&OverlayImage>) -> RgbaImage {
    let mut mirrored = frame.data[..Frame::rgb_len(frame.width, frame.height)].to_vec();
    mirror_horizontal(&mut mirrored, frame.width, frame.height);

    let mut canvas = RgbaImage::new(frame.width, frame.height);
    for (dst, src) in canvas.pixels_mut().zip(mirrored.chunks_exact(3)) {
        *dst = image::Rgba([src[0], src[1], src[2], 255]);
    }

    let Some(overlay) = overlay else {
        return canvas;
    };
    if overlay.width == 0 || overlay.height == 0 {
        return canvas;
    }

    // Nearest-neighbor stretch handles an overlay canvas that does not
    // match the frame dimensions (normally they are equal).
    for y in 0..frame.height {
        let oy = y * overlay.height / frame.height;
        for x in 0..frame.width {
            // Mirror the overlay sample horizontally.
            let ox = (frame.width - 1 - x) * overlay.width / frame.width;
            let i = ((oy * overlay.width + ox) * 4) as usize;
            let src = [
                overlay.rgba[i],
                overlay.rgba[i + 1],
                overlay.rgba[i + 2],
                overlay.rgba[i + 3],
            ];
            if src[3] == 0 {
                continue;
            }
            let dst = canvas.get_pixel_mut(x, y);
            *dst = image::Rgba(alpha_over(src, dst.0));
        }
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn rgb_frame(pixels: &[[u8; 3]], width: u32, height: u32) -> Frame {
        Frame {
            data: pixels.iter().flatten().copied().collect(),
            width,
            height,
            timestamp: Instant::now(),
            sequence: 0,
        }
    }

    fn decode(png: &[u8]) -> RgbaImage {
        image::load_from_memory(png).unwrap().to_rgba8()
    }

    #[test]
    fn test_capture_mirrors_the_frame() {
        let mut comp = SnapshotCompositor::new();
        // 2x1: red then blue
        let frame = rgb_frame(&[[255, 0, 0], [0, 0, 255]], 2, 1);
        let snap = comp.capture(&frame, None).unwrap();
        let img = decode(&snap.png);
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_capture_composites_overlay() {
        let mut comp = SnapshotCompositor::new();
        let frame = rgb_frame(&[[10, 10, 10], [10, 10, 10]], 2, 1);
        // Overlay: opaque green on the left, transparent on the right.
        let overlay = OverlayImage {
            rgba: vec![0, 255, 0, 255, 0, 0, 0, 0],
            width: 2,
            height: 1,
        };
        let snap = comp.capture(&frame, Some(&overlay)).unwrap();
        let img = decode(&snap.png);
        // Overlay is mirrored with the frame: the green pixel flips right.
        assert_eq!(img.get_pixel(1, 0).0, [0, 255, 0, 255]);
        assert_eq!(img.get_pixel(0, 0).0, [10, 10, 10, 255]);
    }

    #[test]
    fn test_capture_order_and_middle_delete() {
        let mut comp = SnapshotCompositor::new();
        let frames = [
            rgb_frame(&[[1, 0, 0]], 1, 1),
            rgb_frame(&[[0, 2, 0]], 1, 1),
            rgb_frame(&[[0, 0, 3]], 1, 1),
        ];
        for f in &frames {
            comp.capture(f, None).unwrap();
        }
        assert_eq!(
            comp.list().iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        assert!(comp.delete(1));
        assert!(!comp.delete(1)); // deleted entries never resurface
        assert_eq!(comp.len(), 2);

        // Survivors stay retrievable under their original indices,
        // and remain distinct.
        let first = decode(&comp.get(0).unwrap().png);
        let third = decode(&comp.get(2).unwrap().png);
        assert_eq!(first.get_pixel(0, 0).0, [1, 0, 0, 255]);
        assert_eq!(third.get_pixel(0, 0).0, [0, 0, 3, 255]);
        assert!(comp.get(1).is_none());
    }

    #[test]
    fn test_indices_not_reused_after_delete() {
        let mut comp = SnapshotCompositor::new();
        let frame = rgb_frame(&[[9, 9, 9]], 1, 1);
        comp.capture(&frame, None).unwrap();
        comp.delete(0);
        let snap = comp.capture(&frame, None).unwrap();
        assert_eq!(snap.index, 1);
    }

    #[test]
    fn test_capture_rejects_short_frame() {
        let mut comp = SnapshotCompositor::new();
        let frame = Frame {
            data: vec![0u8; 2],
            width: 2,
            height: 2,
            timestamp: Instant::now(),
            sequence: 0,
        };
        assert!(matches!(
            comp.capture(&frame, None),
            Err(SnapshotError::BadFrame { .. })
        ));
    }
}
