//! Frame, keypoint and match containers shared with the surrounding
//! odometry pipeline. The pipeline owns and recycles them; the depth source
//! only reads coordinates and writes depth fields.

use nalgebra::{Vector2, Vector3, Vector4};

use crate::algorithms::brief::Descriptor;

/// Keypoint of the primary (left) image and its depth state.
#[derive(Debug, Clone, PartialEq)]
pub struct KeypointData {
    /// Position in the coordinates of its pyramid level.
    pub uv: Vector2<f64>,
    /// Rectified position at full resolution.
    pub rect_base_uv: Vector2<f64>,
    pub disparity: f32,
    /// Set when `xyz`/`xyzw` hold a valid reconstruction.
    pub has_depth: bool,
    pub xyz: Vector3<f64>,
    pub xyzw: Vector4<f64>,
    pub descriptor: Descriptor,
    pub pyramid_level: usize,
    pub keypoint_index: usize,
}

impl KeypointData {
    pub fn new(rect_base_uv: Vector2<f64>, pyramid_level: usize, descriptor: Descriptor) -> Self {
        let scale = (1u32 << pyramid_level) as f64;
        Self {
            uv: rect_base_uv / scale,
            rect_base_uv,
            disparity: 0.0,
            has_depth: false,
            xyz: Vector3::zeros(),
            xyzw: Vector4::zeros(),
            descriptor,
            pyramid_level,
            keypoint_index: 0,
        }
    }
}

/// Candidate correspondence detected in the secondary (right) image.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryFeature {
    /// Rectified position at full resolution.
    pub base_uv: Vector2<f64>,
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone, Default)]
pub struct PyramidLevel {
    pub level_num: usize,
    pub keypoints: Vec<KeypointData>,
    /// Secondary candidates for this level. Refinement at this level only
    /// runs when this is non-empty.
    pub secondary_features: Vec<SecondaryFeature>,
}

#[derive(Debug, Clone, Default)]
pub struct OdometryFrame {
    pub levels: Vec<PyramidLevel>,
}

impl OdometryFrame {
    pub fn with_levels(num_levels: usize) -> Self {
        Self {
            levels: (0..num_levels)
                .map(|level_num| PyramidLevel {
                    level_num,
                    ..Default::default()
                })
                .collect(),
        }
    }

    /// Append a keypoint to its level, fixing up its index.
    /// Returns `None` when the frame has no such level.
    pub fn push_keypoint(&mut self, mut keypoint: KeypointData) -> Option<KeypointRef> {
        let level = keypoint.pyramid_level;
        let keypoints = &mut self.levels.get_mut(level)?.keypoints;
        keypoint.keypoint_index = keypoints.len();
        keypoints.push(keypoint);

        Some(KeypointRef {
            level,
            index: keypoints.len() - 1,
        })
    }

    pub fn keypoint(&self, handle: KeypointRef) -> Option<&KeypointData> {
        self.levels.get(handle.level)?.keypoints.get(handle.index)
    }

    pub fn keypoint_mut(&mut self, handle: KeypointRef) -> Option<&mut KeypointData> {
        self.levels
            .get_mut(handle.level)?
            .keypoints
            .get_mut(handle.index)
    }

    pub fn keypoints(&self) -> impl Iterator<Item = &KeypointData> {
        self.levels.iter().flat_map(|level| level.keypoints.iter())
    }

    pub fn keypoints_mut(&mut self) -> impl Iterator<Item = &mut KeypointData> {
        self.levels
            .iter_mut()
            .flat_map(|level| level.keypoints.iter_mut())
    }
}

/// Index of a keypoint inside an [`OdometryFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeypointRef {
    pub level: usize,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStatus {
    #[default]
    Ok,
    NeedsDepthRefinement,
    RefinementFailed,
}

/// Correspondence between a reference-frame keypoint and a target-frame
/// keypoint, as produced by the temporal matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatch {
    pub ref_keypoint: KeypointRef,
    pub target_keypoint: KeypointRef,
    /// Copy of the target keypoint after depth refinement.
    pub refined_target_keypoint: Option<KeypointData>,
    pub status: MatchStatus,
    pub inlier: bool,
}

impl FeatureMatch {
    pub fn new(ref_keypoint: KeypointRef, target_keypoint: KeypointRef) -> Self {
        Self {
            ref_keypoint,
            target_keypoint,
            refined_target_keypoint: None,
            status: MatchStatus::NeedsDepthRefinement,
            inlier: true,
        }
    }
}
