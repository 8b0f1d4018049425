use nalgebra::{Matrix3, Vector2, Vector3};

/// Perpendicular distance in pixels from `right` to the epipolar line of
/// `left` in the right image, for a fundamental matrix with
/// `x_right^T F x_left = 0`.
pub fn epipolar_line_distance(
    fundamental: &Matrix3<f64>,
    left: &Vector2<f64>,
    right: &Vector2<f64>,
) -> f64 {
    let line = fundamental * Vector3::new(left.x, left.y, 1.0);
    let norm = line.x.hypot(line.y);
    if norm == 0.0 {
        // left point is the epipole, every line passes through it
        return 0.0;
    }

    line.dot(&Vector3::new(right.x, right.y, 1.0)).abs() / norm
}
