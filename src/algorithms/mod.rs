//! Collection of geometry and descriptor algorithms used by the depth sources

pub mod brief;
pub mod epipolar;
pub mod reprojection;
