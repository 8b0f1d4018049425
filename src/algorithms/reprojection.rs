use nalgebra::{Matrix4, Vector3, Vector4};

use crate::depth::disparity_store::DisparityStore;

/// Homogeneous camera-frame point of `(u, v, disparity)`.
pub fn reproject_homogeneous(
    uvd1_to_xyz: &Matrix4<f64>,
    u: f64,
    v: f64,
    disparity: f32,
) -> Vector4<f64> {
    uvd1_to_xyz * Vector4::new(u, v, disparity as f64, 1.0)
}

/// Euclidean camera-frame point of `(u, v, disparity)`, equivalent to
/// `cv::reprojectImageTo3D` for a single pixel.
///
/// `disparity` must be strictly positive; a zero disparity is a point at
/// infinity and produces non-finite coordinates.
pub fn reproject(uvd1_to_xyz: &Matrix4<f64>, u: f64, v: f64, disparity: f32) -> Vector3<f64> {
    let xyzw = reproject_homogeneous(uvd1_to_xyz, u, v, disparity);
    xyzw.xyz() / xyzw.w
}

/// Disparity at a fractional pixel position from its four integer neighbours.
///
/// With all four neighbours valid the disparities are blended bilinearly, and
/// the caller reprojects the blended value once. Otherwise the valid neighbour
/// carrying the largest bilinear weight is used on its own. `None` when `(u, v)`
/// lies outside the image or none of the neighbours has a disparity.
pub fn interpolate_disparity(store: &DisparityStore, u: f64, v: f64) -> Option<f32> {
    if !(u >= 0.0 && v >= 0.0 && u < store.width() as f64 && v < store.height() as f64) {
        return None;
    }

    let (u0, v0) = (u.floor(), v.floor());
    let (wu, wv) = (u - u0, v - v0);
    let (u0, v0) = (u0 as i32, v0 as i32);

    // top-left, top-right, bottom-left, bottom-right
    let neighbours = [
        (u0, v0, (1.0 - wu) * (1.0 - wv)),
        (u0 + 1, v0, wu * (1.0 - wv)),
        (u0, v0 + 1, (1.0 - wu) * wv),
        (u0 + 1, v0 + 1, wu * wv),
    ]
    .map(|(nu, nv, weight)| (store.disparity(nu, nv), weight));

    if neighbours.iter().all(|(d, _)| d.is_some()) {
        let blended = neighbours
            .iter()
            .map(|(d, w)| d.map_or(0.0, |d| d as f64) * w)
            .sum::<f64>();
        return Some(blended as f32);
    }

    neighbours
        .iter()
        .filter_map(|&(d, w)| d.map(|d| (d, w)))
        .fold(None, |best: Option<(f32, f64)>, (d, w)| match best {
            Some((_, best_w)) if best_w >= w => best,
            _ => Some((d, w)),
        })
        .map(|(d, _)| d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CameraIntrinsics, StereoCalibration};
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn calibration() -> StereoCalibration {
        StereoCalibration::new(
            CameraIntrinsics {
                width: 64,
                height: 48,
                fx: 410.0,
                fy: 405.0,
                cx: 31.5,
                cy: 24.25,
            },
            0.12,
        )
        .unwrap()
    }

    #[test]
    fn reprojection_round_trip() {
        let calib = calibration();
        let q = calib.uvd1_to_xyz();
        let points = [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.3, -0.2, 2.5),
            Vector3::new(-1.2, 0.7, 7.0),
            Vector3::new(0.05, 0.01, 0.4),
        ];

        for point in points {
            let uvd = calib.project(&point).unwrap();
            let xyz = reproject(&q, uvd.x, uvd.y, uvd.z as f32);
            // disparity passes through f32
            assert_relative_eq!(xyz, point, epsilon = 1e-12, max_relative = 1e-6);
        }
    }

    #[test]
    fn depth_is_focal_times_baseline_over_disparity() {
        let calib = calibration();
        let xyz = reproject(&calib.uvd1_to_xyz(), 31.5, 24.25, 16.0);
        assert_relative_eq!(xyz.z, 410.0 * 0.12 / 16.0, max_relative = 1e-12);
        assert_abs_diff_eq!(xyz.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(xyz.y, 0.0, epsilon = 1e-12);
    }

    fn store_with(values: &[(usize, usize, f32)]) -> DisparityStore {
        let mut data = vec![0.0; 8 * 6];
        for &(u, v, d) in values {
            data[v * 8 + u] = d;
        }
        let mut store = DisparityStore::new(8, 6);
        store.set_disparity_data(&data).unwrap();
        store
    }

    #[test]
    fn blends_when_all_neighbours_are_valid() {
        let store = store_with(&[(2, 2, 10.0), (3, 2, 20.0), (2, 3, 10.0), (3, 3, 20.0)]);
        assert_relative_eq!(interpolate_disparity(&store, 2.25, 2.5).unwrap(), 12.5);
    }

    #[test]
    fn falls_back_to_valid_neighbour_instead_of_blending_zero() {
        let d = 7.5;
        let store = store_with(&[(2, 2, d), (3, 2, d), (2, 3, d)]);
        assert_eq!(interpolate_disparity(&store, 2.5, 2.5), Some(d));
    }

    #[test]
    fn fallback_prefers_the_nearest_neighbour() {
        let store = store_with(&[(3, 2, 4.0), (2, 3, 9.0)]);
        assert_eq!(interpolate_disparity(&store, 2.8, 2.3), Some(4.0));
        assert_eq!(interpolate_disparity(&store, 2.2, 2.9), Some(9.0));
    }

    #[test]
    fn fails_without_any_valid_neighbour() {
        let store = store_with(&[(6, 4, 3.0)]);
        assert_eq!(interpolate_disparity(&store, 1.5, 1.5), None);
        assert_eq!(interpolate_disparity(&store, -0.5, 1.5), None);
        assert_eq!(interpolate_disparity(&store, 1.5, 6.0), None);
    }

    #[test]
    fn right_edge_uses_in_bounds_neighbours() {
        let store = store_with(&[(7, 5, 5.0)]);
        assert_eq!(interpolate_disparity(&store, 7.5, 5.5), Some(5.0));
    }
}
