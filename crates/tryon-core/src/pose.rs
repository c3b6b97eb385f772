//! Pose estimation — landmark set to smoothed overlay pose.
//!
//! Pure and deterministic: the estimator carries only its smoothing
//! factor, never mutable state, so the detection loop owns the
//! previous pose and passes it back in each cycle.

use crate::types::{LandmarkSet, Pose, LEFT_EYE_OUTER, NOSE_BRIDGE, RIGHT_EYE_OUTER};

/// Default exponential smoothing factor. Lower is smoother with more
/// lag, higher is snappier with more jitter; 0.1–0.2 is the useful range.
pub const DEFAULT_SMOOTHING: f32 = 0.15;

/// Inter-corner distance (pixels) that maps to overlay scale 1.0.
const EYE_DISTANCE_REFERENCE: f32 = 100.0;

/// Derives the overlay pose from face landmarks, smoothing toward the
/// raw target to keep the overlay from jittering frame to frame.
#[derive(Debug, Clone, Copy)]
pub struct PoseEstimator {
    alpha: f32,
}

impl PoseEstimator {
    /// Create an estimator with the given smoothing factor.
    /// The factor is clamped to (0, 1]; 1.0 disables smoothing.
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Estimate the overlay pose for one landmark set.
    ///
    /// Anchors: nose bridge for the depth component, eye outer corners
    /// for center, rotation (atan2 of the corner vector) and scale
    /// (Euclidean corner distance). Position and rotation are smoothed
    /// exponentially toward the raw target; scale snaps to the target.
    /// With no previous pose the raw target is returned unsmoothed.
    ///
    /// Returns `None` when the set is missing any anchor landmark.
    pub fn estimate(&self, landmarks: &LandmarkSet, previous: Option<&Pose>) -> Option<Pose> {
        let nose = landmarks.get(NOSE_BRIDGE)?;
        let left = landmarks.get(LEFT_EYE_OUTER)?;
        let right = landmarks.get(RIGHT_EYE_OUTER)?;

        let dx = right.x - left.x;
        let dy = right.y - left.y;

        let target = Pose {
            position: [
                (left.x + right.x) / 2.0,
                (left.y + right.y) / 2.0,
                nose.z,
            ],
            rotation_z: dy.atan2(dx),
            scale: (dx * dx + dy * dy).sqrt() / EYE_DISTANCE_REFERENCE,
        };

        let Some(prev) = previous else {
            // First detection snaps straight to the target.
            return Some(target);
        };

        Some(Pose {
            position: [
                lerp(prev.position[0], target.position[0], self.alpha),
                lerp(prev.position[1], target.position[1], self.alpha),
                lerp(prev.position[2], target.position[2], self.alpha),
            ],
            rotation_z: lerp(prev.rotation_z, target.rotation_z, self.alpha),
            scale: target.scale,
        })
    }
}

impl Default for PoseEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

fn lerp(from: f32, to: f32, alpha: f32) -> f32 {
    from + alpha * (to - from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Landmark;

    /// Build a landmark set with the three anchor points placed and
    /// every other slot zeroed.
    fn anchors(left: (f32, f32), right: (f32, f32), nose_z: f32) -> LandmarkSet {
        let mut points = vec![Landmark { x: 0.0, y: 0.0, z: 0.0 }; 468];
        points[LEFT_EYE_OUTER] = Landmark { x: left.0, y: left.1, z: 0.0 };
        points[RIGHT_EYE_OUTER] = Landmark { x: right.0, y: right.1, z: 0.0 };
        points[NOSE_BRIDGE] = Landmark { x: 0.0, y: 0.0, z: nose_z };
        LandmarkSet::new(points, 0.95)
    }

    #[test]
    fn test_rotation_horizontal_corners() {
        let est = PoseEstimator::default();
        let pose = est.estimate(&anchors((0.0, 0.0), (10.0, 0.0), 0.0), None).unwrap();
        assert!(pose.rotation_z.abs() < 1e-6);
    }

    #[test]
    fn test_rotation_vertical_corners() {
        let est = PoseEstimator::default();
        let pose = est.estimate(&anchors((0.0, 0.0), (0.0, 10.0), 0.0), None).unwrap();
        assert!((pose.rotation_z - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_first_detection_snaps_to_target() {
        let est = PoseEstimator::new(0.1);
        let pose = est
            .estimate(&anchors((40.0, 60.0), (140.0, 60.0), -0.5), None)
            .unwrap();
        assert_eq!(pose.position, [90.0, 60.0, -0.5]);
        assert!(pose.rotation_z.abs() < 1e-6);
        assert!((pose.scale - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_deterministic() {
        let est = PoseEstimator::new(0.2);
        let set = anchors((10.0, 20.0), (90.0, 35.0), -0.3);
        let prev = Pose {
            position: [0.0, 0.0, 0.0],
            rotation_z: 0.5,
            scale: 0.8,
        };
        let a = est.estimate(&set, Some(&prev)).unwrap();
        let b = est.estimate(&set, Some(&prev)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_smoothing_moves_fractionally_toward_target() {
        let est = PoseEstimator::new(0.2);
        let set = anchors((50.0, 0.0), (150.0, 0.0), 0.0); // target x = 100
        let prev = Pose {
            position: [0.0, 0.0, 0.0],
            rotation_z: 0.0,
            scale: 1.0,
        };
        let pose = est.estimate(&set, Some(&prev)).unwrap();
        assert!((pose.position[0] - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_smoothing_converges() {
        // With alpha = 0.2, twenty iterations leave under 1.2% of the
        // initial offset (0.8^20 ≈ 0.0115).
        let est = PoseEstimator::new(0.2);
        let set = anchors((50.0, 0.0), (150.0, 0.0), 0.0); // target x = 100
        let mut pose = Pose {
            position: [0.0, 0.0, 0.0],
            rotation_z: 0.0,
            scale: 1.0,
        };
        for _ in 0..20 {
            pose = est.estimate(&set, Some(&pose)).unwrap();
        }
        assert!(
            (pose.position[0] - 100.0).abs() < 100.0 * 0.012,
            "position did not converge: {}",
            pose.position[0]
        );
    }

    #[test]
    fn test_scale_snaps_without_smoothing() {
        let est = PoseEstimator::new(0.1);
        let set = anchors((0.0, 0.0), (200.0, 0.0), 0.0); // scale target 2.0
        let prev = Pose {
            position: [100.0, 0.0, 0.0],
            rotation_z: 0.0,
            scale: 1.0,
        };
        let pose = est.estimate(&set, Some(&prev)).unwrap();
        assert!((pose.scale - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_anchor_yields_none() {
        let est = PoseEstimator::default();
        let truncated = LandmarkSet::new(
            vec![Landmark { x: 0.0, y: 0.0, z: 0.0 }; LEFT_EYE_OUTER + 1],
            0.9,
        );
        assert!(est.estimate(&truncated, None).is_none());
    }
}
