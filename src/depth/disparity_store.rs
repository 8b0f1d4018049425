use tracing::warn;

use crate::{algorithms::reprojection::interpolate_disparity, error::DepthError};

/// Owned copy of the current dense disparity map.
///
/// The map is row-major with one `f32` per pixel, `0.0` meaning "no disparity".
/// Its dimensions are fixed at construction.
#[derive(Debug, Clone)]
pub struct DisparityStore {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl DisparityStore {
    /// Starts out with an all-zero map, so nothing has depth until the first
    /// call to [`set_disparity_data`](Self::set_disparity_data).
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Copy `disparity_data` into the store. The caller's buffer is not
    /// referenced after this returns. A map of the wrong size is rejected and
    /// the previous map is kept.
    pub fn set_disparity_data(&mut self, disparity_data: &[f32]) -> Result<(), DepthError> {
        if disparity_data.len() != self.data.len() {
            warn!(
                got = disparity_data.len(),
                expected = self.data.len(),
                "rejecting disparity map with mismatched dimensions"
            );
            return Err(DepthError::DimensionMismatch {
                got: disparity_data.len(),
                expected: self.data.len(),
                width: self.width,
                height: self.height,
            });
        }

        self.data.copy_from_slice(disparity_data);
        Ok(())
    }

    fn index(&self, u: i32, v: i32) -> Option<usize> {
        let in_bounds = u >= 0 && v >= 0 && (u as usize) < self.width && (v as usize) < self.height;
        in_bounds.then(|| v as usize * self.width + u as usize)
    }

    /// Raw sample at `(u, v)`, `None` when out of bounds.
    pub fn raw(&self, u: i32, v: i32) -> Option<f32> {
        self.index(u, v).map(|i| self.data[i])
    }

    /// Usable disparity at `(u, v)`: in bounds and non-zero.
    pub fn disparity(&self, u: i32, v: i32) -> Option<f32> {
        self.raw(u, v).filter(|&d| d != 0.0)
    }

    pub fn have_xyz(&self, u: i32, v: i32) -> bool {
        self.disparity(u, v).is_some()
    }

    /// Disparity at a keypoint position: the pixel itself for integral
    /// positions, bilinear interpolation otherwise.
    pub fn sample(&self, u: f64, v: f64) -> Option<f32> {
        if u.fract() == 0.0 && v.fract() == 0.0 {
            self.disparity(u as i32, v as i32)
        } else {
            interpolate_disparity(self, u, v)
        }
    }
}
