//! Depth sources turn tracked keypoints into metric 3D points.

pub mod adaptive_threshold;
pub mod disparity_store;
pub mod match_buffer;
pub mod refiner;
pub mod stereo_disparity;

use crate::frame::{FeatureMatch, OdometryFrame};

/// Capability every depth source offers to the odometry pipeline.
///
/// The pipeline picks an implementation when it is assembled and drives it
/// once per frame. None of the calls fail as a whole: keypoints without depth
/// are flagged individually.
pub trait DepthSource {
    /// Whether the pixel `(u, v)` has a usable depth.
    fn have_xyz(&self, u: i32, v: i32) -> bool;

    /// Fill in the 3D position of every keypoint of `frame` that has depth.
    fn get_xyz(&self, frame: &mut OdometryFrame);

    /// Improve the depth of the target keypoints of the matches flagged
    /// [`MatchStatus::NeedsDepthRefinement`], updating their status and
    /// legality flags. Other matches are left as they are.
    ///
    /// [`MatchStatus::NeedsDepthRefinement`]: crate::frame::MatchStatus::NeedsDepthRefinement
    fn refine_xyz(&mut self, matches: &mut [FeatureMatch], frame: &mut OdometryFrame);

    /// Stereo baseline in metres.
    fn baseline(&self) -> f64;
}
