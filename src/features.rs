use image::{imageops, GrayImage};
use imageproc::corners::{corners_fast9, Corner};
use nalgebra::Vector2;

use crate::{
    algorithms::brief::{self, Descriptor},
    frame::SecondaryFeature,
};

/// Feature object which holds a pixel on an image and its binary descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub keypoint: Vector2<u32>,
    pub descriptor: Descriptor,
}

/// Uses FAST (Features from Accelerated Segment Test)
/// as a keypoint detector for features like corners in a grayscale image.
/// Corners closer than `margin` pixels to the border are dropped.
pub fn fast_keypoints(image: &GrayImage, threshold: u8, margin: u32) -> Vec<Vector2<u32>> {
    let (width, height) = image.dimensions();

    corners_fast9(image, threshold)
        .into_iter()
        .filter(|Corner { x, y, .. }| {
            *x >= margin && *y >= margin && *x + margin < width && *y + margin < height
        })
        .map(|Corner { x, y, .. }| Vector2::new(x, y))
        .collect()
}

/// FAST keypoints described with BRIEF over a `feature_window_size` patch.
pub fn extract_features(
    image: &GrayImage,
    threshold: u8,
    feature_window_size: usize,
) -> Vec<Feature> {
    // using a kernel value of 2 indicated by reference:
    // https://medium.com/data-breach/introduction-to-brief-binary-robust-independent-elementary-features-436f4a31a0e6
    const GAUSSIAN_KERNEL_SIGMA: f32 = 2.0;

    let half_window = (feature_window_size / 2) as u32;

    // apply a gaussian blur to the image for computing BRIEF descriptors,
    // that way the descriptor is not overly sensitive to high frequency noise.
    let smoothed_image = imageproc::filter::gaussian_blur_f32(image, GAUSSIAN_KERNEL_SIGMA);

    fast_keypoints(image, threshold, half_window)
        .into_iter()
        .map(|keypoint| Feature {
            descriptor: brief::compute_descriptor(
                keypoint.x,
                keypoint.y,
                &smoothed_image,
                half_window as i32,
            ),
            keypoint,
        })
        .collect()
}

/// Successively halved copies of `image`, starting with the image itself.
/// Stops early once a level would be smaller than `min_size` on either side.
pub fn image_pyramid(image: &GrayImage, num_levels: usize, min_size: u32) -> Vec<GrayImage> {
    let mut levels = vec![image.clone()];

    while levels.len() < num_levels {
        let Some(previous) = levels.last() else {
            break;
        };
        let (width, height) = (previous.width() / 2, previous.height() / 2);
        if width < min_size || height < min_size {
            break;
        }
        let next = imageops::resize(previous, width, height, imageops::FilterType::Triangle);
        levels.push(next);
    }

    levels
}

/// Features of the secondary (right) image for every pyramid level, with
/// positions scaled back to full resolution.
pub fn extract_secondary_features(
    image: &GrayImage,
    threshold: u8,
    feature_window_size: usize,
    num_levels: usize,
) -> Vec<Vec<SecondaryFeature>> {
    image_pyramid(image, num_levels, feature_window_size as u32)
        .iter()
        .enumerate()
        .map(|(level, level_image)| {
            let scale = (1u32 << level) as f64;
            extract_features(level_image, threshold, feature_window_size)
                .into_iter()
                .map(|Feature { keypoint, descriptor }| SecondaryFeature {
                    base_uv: Vector2::new(keypoint.x as f64, keypoint.y as f64) * scale,
                    descriptor,
                })
                .collect()
        })
        .collect()
}
