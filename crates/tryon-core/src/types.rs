use serde::{Deserialize, Serialize};

/// FaceMesh topology index of the top of the nose bridge.
pub const NOSE_BRIDGE: usize = 168;
/// FaceMesh topology index of the left eye outer corner.
pub const LEFT_EYE_OUTER: usize = 33;
/// FaceMesh topology index of the right eye outer corner.
pub const RIGHT_EYE_OUTER: usize = 263;

/// A single anatomically-anchored 3D point from the landmark model,
/// in frame pixel coordinates (z is model-relative depth).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Ordered landmark set for one detected face (MediaPipe FaceMesh
/// topology, 468 points). Immutable once produced; each detection
/// cycle supersedes the previous set, never merges with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub points: Vec<Landmark>,
    /// Face presence confidence reported by the model.
    pub confidence: f32,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>, confidence: f32) -> Self {
        Self { points, confidence }
    }

    /// Landmark at a topology index, if the set carries that many points.
    pub fn get(&self, index: usize) -> Option<Landmark> {
        self.points.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Overlay placement derived from a landmark set: where the glasses
/// sit, how they tilt, and how wide they are.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Anchor point in frame pixel coordinates; z is the nose-bridge depth.
    pub position: [f32; 3],
    /// In-plane tilt in radians, from the eye-corner vector.
    pub rotation_z: f32,
    /// Overlay scale relative to the reference inter-corner distance.
    pub scale: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_set_get_in_range() {
        let set = LandmarkSet::new(
            vec![
                Landmark { x: 1.0, y: 2.0, z: 3.0 },
                Landmark { x: 4.0, y: 5.0, z: 6.0 },
            ],
            0.9,
        );
        assert_eq!(set.get(1).map(|l| l.x), Some(4.0));
    }

    #[test]
    fn test_landmark_set_get_out_of_range() {
        let set = LandmarkSet::new(vec![Landmark { x: 0.0, y: 0.0, z: 0.0 }], 0.9);
        assert!(set.get(NOSE_BRIDGE).is_none());
    }

    #[test]
    fn test_landmark_set_empty() {
        let set = LandmarkSet::new(vec![], 0.0);
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }
}
