//! Frame type and pixel ops — YUYV conversion and horizontal mirror.

/// A captured RGB camera frame.
///
/// Owned snapshot of the device's buffer at capture time. The live
/// "latest frame" is a last-write-wins watch slot, so a frame pulled
/// from it is only current for the one detection or composition step
/// that pulled it.
#[derive(Clone, Debug)]
pub struct Frame {
    /// RGB24 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Byte length an RGB24 buffer of these dimensions must have.
    pub fn rgb_len(width: u32, height: u32) -> usize {
        (width * height * 3) as usize
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to RGB24 using BT.601 integer math.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V] — U and V are
/// shared by the pixel pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(Frame::rgb_len(width, height));
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        push_yuv_pixel(&mut rgb, y0, u, v);
        push_yuv_pixel(&mut rgb, y1, u, v);
    }
    Ok(rgb)
}

/// BT.601 YUV → RGB for one pixel.
fn push_yuv_pixel(rgb: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    rgb.push(r.clamp(0, 255) as u8);
    rgb.push(g.clamp(0, 255) as u8);
    rgb.push(b.clamp(0, 255) as u8);
}

/// Mirror an RGB24 buffer horizontally in-place (selfie convention:
/// the preview and any still taken from it read like a mirror).
pub fn mirror_horizontal(rgb: &mut [u8], width: u32, height: u32) {
    let w = width as usize;
    let h = height as usize;
    if rgb.len() < w * h * 3 {
        return;
    }

    for y in 0..h {
        let row = &mut rgb[y * w * 3..(y + 1) * w * 3];
        for x in 0..w / 2 {
            let left = x * 3;
            let right = (w - 1 - x) * 3;
            for c in 0..3 {
                row.swap(left + c, right + c);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_gray_pixels() {
        // Neutral chroma (U = V = 128): output stays gray.
        // Y = 128 → C = 112 → (298 * 112 + 128) >> 8 = 130.
        let yuyv = vec![128, 128, 128, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![130, 130, 130, 130, 130, 130]);
    }

    #[test]
    fn test_yuyv_black_and_white() {
        // Y = 16 is reference black, Y = 235 reference white.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(&rgb[..3], &[0, 0, 0]);
        assert_eq!(&rgb[3..], &[255, 255, 255]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_mirror_swaps_row_ends() {
        // 3x1 RGB: red, green, blue → blue, green, red
        let mut rgb = vec![255, 0, 0, 0, 255, 0, 0, 0, 255];
        mirror_horizontal(&mut rgb, 3, 1);
        assert_eq!(rgb, vec![0, 0, 255, 0, 255, 0, 255, 0, 0]);
    }

    #[test]
    fn test_mirror_is_involution() {
        let original: Vec<u8> = (0..4 * 2 * 3).collect();
        let mut rgb = original.clone();
        mirror_horizontal(&mut rgb, 4, 2);
        assert_ne!(rgb, original);
        mirror_horizontal(&mut rgb, 4, 2);
        assert_eq!(rgb, original);
    }

    #[test]
    fn test_mirror_short_buffer_is_noop() {
        let mut rgb = vec![1, 2, 3];
        mirror_horizontal(&mut rgb, 4, 4);
        assert_eq!(rgb, vec![1, 2, 3]);
    }
}
