//! Stereo-disparity depth source for visual odometry.
//!
//! Given a dense disparity map from an external stereo matcher, a
//! [`StereoDisparity`] reconstructs metric 3D positions of tracked keypoints
//! and can refine them by matching keypoints against features of the right
//! image along their epipolar lines.

pub mod algorithms;
pub mod calibration;
pub mod depth;
pub mod error;
pub mod features;
pub mod frame;
pub mod options;

pub use calibration::{CameraIntrinsics, StereoCalibration};
pub use depth::{stereo_disparity::StereoDisparity, DepthSource};
pub use error::{CalibrationError, DepthError, OptionsError};
pub use frame::{FeatureMatch, KeypointData, KeypointRef, MatchStatus, OdometryFrame};
pub use options::StereoDisparityOptions;
