use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Pinhole intrinsics of the rectified left camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub width: usize,
    pub height: usize,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Square pixels with the principal point in the middle of the image.
    pub fn from_focal(focal: f64, width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            fx: focal,
            fy: focal,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    /// Camera Intrinsic `3x3` Matrix known as `K`
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    fn inverse_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }
}

/// Calibration of a rectified stereo pair.
///
/// Both cameras share the same intrinsics after rectification and the right
/// camera sits `baseline` metres along the positive x axis of the left one.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoCalibration {
    rectified: CameraIntrinsics,
    baseline: f64,
}

impl StereoCalibration {
    pub fn new(rectified: CameraIntrinsics, baseline: f64) -> Result<Self, CalibrationError> {
        if rectified.width == 0 || rectified.height == 0 {
            return Err(CalibrationError::EmptyImage(
                rectified.width,
                rectified.height,
            ));
        }
        if !(rectified.fx > 0.0 && rectified.fy > 0.0) {
            return Err(CalibrationError::FocalLength(rectified.fx, rectified.fy));
        }
        if !(baseline > 0.0) {
            return Err(CalibrationError::Baseline(baseline));
        }

        Ok(Self {
            rectified,
            baseline,
        })
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    pub fn width(&self) -> usize {
        self.rectified.width
    }

    pub fn height(&self) -> usize {
        self.rectified.height
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.rectified
    }

    /// Reprojection matrix mapping homogeneous `(u, v, disparity, 1)` to
    /// homogeneous camera-frame `(x, y, z, w)`.
    ///
    /// Equivalent to the `Q` matrix of `cv::stereoRectify` for a pair with
    /// identical principal points.
    pub fn uvd1_to_xyz(&self) -> Matrix4<f64> {
        let CameraIntrinsics { fx, fy, cx, cy, .. } = self.rectified;
        Matrix4::new(
            1.0 / fx,
            0.0,
            0.0,
            -cx / fx,
            0.0,
            1.0 / fy,
            0.0,
            -cy / fy,
            0.0,
            0.0,
            0.0,
            1.0,
            0.0,
            0.0,
            1.0 / (fx * self.baseline),
            0.0,
        )
    }

    /// Fundamental matrix `F` with `x_right^T F x_left = 0`.
    ///
    /// `F = K^-T [t]x R K^-1` with `R = I` and `t = (-baseline, 0, 0)`.
    pub fn fundamental(&self) -> Matrix3<f64> {
        let b = self.baseline;
        let t_cross = Matrix3::new(
            0.0, 0.0, 0.0, //
            0.0, 0.0, b, //
            0.0, -b, 0.0,
        );
        let k_inv = self.rectified.inverse_matrix();

        k_inv.transpose() * t_cross * k_inv
    }

    /// Project a camera-frame point to `(u, v, disparity)` in the left image.
    /// Points on or behind the image plane have no projection.
    pub fn project(&self, xyz: &Vector3<f64>) -> Option<Vector3<f64>> {
        if xyz.z <= 0.0 {
            return None;
        }
        let uv1 = self.rectified.matrix() * (xyz / xyz.z);
        let disparity = self.rectified.fx * self.baseline / xyz.z;

        Some(Vector3::new(uv1.x, uv1.y, disparity))
    }
}
