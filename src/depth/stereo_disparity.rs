use std::iter;

use image::GrayImage;
use nalgebra::{Matrix4, Vector3};
use tracing::debug;

use super::{
    adaptive_threshold::AdaptiveThreshold,
    disparity_store::DisparityStore,
    match_buffer::LevelMatches,
    refiner::{EpipolarRefiner, RefinementSummary},
    DepthSource,
};
use crate::{
    algorithms::reprojection,
    calibration::StereoCalibration,
    error::{DepthError, OptionsError},
    features,
    frame::{FeatureMatch, KeypointData, OdometryFrame},
    options::StereoDisparityOptions,
};

/// Depth source for a calibrated stereo pair whose dense disparity map is
/// computed elsewhere.
///
/// Only the left image and the disparity map are needed for [`get_xyz`].
/// [`refine_xyz`] additionally uses features of the right image, stored in the
/// frame levels by [`detect_secondary_features`] or by the caller.
///
/// The calibration is borrowed for the lifetime of the depth source.
///
/// [`get_xyz`]: DepthSource::get_xyz
/// [`refine_xyz`]: DepthSource::refine_xyz
/// [`detect_secondary_features`]: StereoDisparity::detect_secondary_features
#[derive(Debug)]
pub struct StereoDisparity<'a> {
    calib: &'a StereoCalibration,
    options: StereoDisparityOptions,
    uvd1_to_xyz: Matrix4<f64>,
    disparity: DisparityStore,
    refiner: EpipolarRefiner,
    adaptive_threshold: AdaptiveThreshold,
}

impl<'a> StereoDisparity<'a> {
    pub fn new(
        calib: &'a StereoCalibration,
        options: StereoDisparityOptions,
    ) -> Result<Self, OptionsError> {
        options.validate()?;

        let (width, height) = (calib.width(), calib.height());
        Ok(Self {
            calib,
            uvd1_to_xyz: calib.uvd1_to_xyz(),
            disparity: DisparityStore::new(width, height),
            refiner: EpipolarRefiner::new(calib, &options),
            adaptive_threshold: AdaptiveThreshold::new(&options, width, height),
            options,
        })
    }

    pub fn options(&self) -> &StereoDisparityOptions {
        &self.options
    }

    /// Replace the disparity map with a copy of `disparity_data`.
    /// `disparity_data` is not referenced after this returns.
    pub fn set_disparity_data(&mut self, disparity_data: &[f32]) -> Result<(), DepthError> {
        self.disparity.set_disparity_data(disparity_data)
    }

    /// Current FAST threshold of the secondary feature search.
    pub fn fast_threshold(&self) -> u8 {
        self.adaptive_threshold.fast_threshold()
    }

    /// Right-image positions selected at `level` by the last refinement.
    pub fn level_matches(&self, level: usize) -> Option<&LevelMatches> {
        self.refiner.level_matches(level)
    }

    /// Camera-frame point of `(u, v, disparity)`. `disparity` must be positive.
    pub fn get_xyz_values(&self, u: f64, v: f64, disparity: f32) -> Vector3<f64> {
        reprojection::reproject(&self.uvd1_to_xyz, u, v, disparity)
    }

    fn assign_depth(&self, keypoint: &mut KeypointData, disparity: f32) {
        let (u, v) = (keypoint.rect_base_uv.x, keypoint.rect_base_uv.y);
        let xyzw = reprojection::reproject_homogeneous(&self.uvd1_to_xyz, u, v, disparity);
        keypoint.disparity = disparity;
        keypoint.xyzw = xyzw;
        keypoint.xyz = xyzw.xyz() / xyzw.w;
        keypoint.has_depth = true;
    }

    /// Depth of a keypoint at a fractional position from the four surrounding
    /// pixels. On failure the keypoint is flagged and its 3D fields are kept.
    pub fn get_xyz_interp(&self, keypoint: &mut KeypointData) -> bool {
        let uv = keypoint.rect_base_uv;
        match reprojection::interpolate_disparity(&self.disparity, uv.x, uv.y) {
            Some(disparity) => {
                self.assign_depth(keypoint, disparity);
                true
            }
            None => {
                keypoint.has_depth = false;
                false
            }
        }
    }

    fn get_keypoint_xyz(&self, keypoint: &mut KeypointData) -> bool {
        let uv = keypoint.rect_base_uv;
        if uv.x.fract() != 0.0 || uv.y.fract() != 0.0 {
            return self.get_xyz_interp(keypoint);
        }

        match self.disparity.disparity(uv.x as i32, uv.y as i32) {
            Some(disparity) => {
                self.assign_depth(keypoint, disparity);
                true
            }
            None => {
                keypoint.has_depth = false;
                false
            }
        }
    }

    /// Detect features in the right image at the current FAST threshold and
    /// store them as the secondary candidates of the matching frame levels.
    /// Levels beyond the configured pyramid are cleared.
    ///
    /// Returns the number of candidates on the full resolution level.
    pub fn detect_secondary_features(
        &self,
        right_image: &GrayImage,
        frame: &mut OdometryFrame,
    ) -> Result<usize, DepthError> {
        let (width, height) = right_image.dimensions();
        if width as usize != self.calib.width() || height as usize != self.calib.height() {
            return Err(DepthError::ImageSizeMismatch {
                got_width: width,
                got_height: height,
                width: self.calib.width(),
                height: self.calib.height(),
            });
        }

        let per_level = features::extract_secondary_features(
            right_image,
            self.fast_threshold(),
            self.options.feature_window_size,
            self.options.num_pyramid_levels,
        );

        for (level, secondary) in frame
            .levels
            .iter_mut()
            .zip(per_level.into_iter().chain(iter::repeat_with(Vec::new)))
        {
            level.secondary_features = secondary;
        }

        let detected = frame
            .levels
            .first()
            .map_or(0, |level| level.secondary_features.len());
        debug!(
            detected,
            threshold = self.fast_threshold(),
            "detected secondary features"
        );

        Ok(detected)
    }

    /// [`DepthSource::refine_xyz`] returning the per-pass counts.
    pub fn refine_matches(
        &mut self,
        matches: &mut [FeatureMatch],
        frame: &mut OdometryFrame,
    ) -> RefinementSummary {
        let summary = self.refiner.refine(matches, frame, &self.disparity);

        let has_candidates = frame
            .levels
            .iter()
            .any(|level| !level.secondary_features.is_empty());
        if has_candidates {
            let detected = frame
                .levels
                .first()
                .map_or(0, |level| level.secondary_features.len());
            let threshold = self.adaptive_threshold.update(detected);
            debug!(
                refined = summary.refined,
                retained = summary.retained,
                failed = summary.failed,
                skipped = summary.skipped,
                detected,
                threshold,
                "refined stereo depth"
            );
        }

        summary
    }
}

impl DepthSource for StereoDisparity<'_> {
    fn have_xyz(&self, u: i32, v: i32) -> bool {
        self.disparity.have_xyz(u, v)
    }

    fn get_xyz(&self, frame: &mut OdometryFrame) {
        let mut num_total = 0;
        let mut num_valid = 0;
        for keypoint in frame.keypoints_mut() {
            num_total += 1;
            if self.get_keypoint_xyz(keypoint) {
                num_valid += 1;
            }
        }

        debug!(num_total, num_valid, "computed keypoint depth");
    }

    fn refine_xyz(&mut self, matches: &mut [FeatureMatch], frame: &mut OdometryFrame) {
        self.refine_matches(matches, frame);
    }

    fn baseline(&self) -> f64 {
        self.calib.baseline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        calibration::CameraIntrinsics,
        depth::match_buffer::INITIAL_CAPACITY,
        frame::{KeypointRef, MatchStatus, SecondaryFeature},
    };
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    const WIDTH: usize = 64;
    const HEIGHT: usize = 48;

    fn calibration() -> StereoCalibration {
        StereoCalibration::new(CameraIntrinsics::from_focal(400.0, WIDTH, HEIGHT), 0.1).unwrap()
    }

    fn descriptor(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    fn constant_map(disparity: f32) -> Vec<f32> {
        vec![disparity; WIDTH * HEIGHT]
    }

    #[test]
    fn integral_keypoints_use_the_pixel_directly() {
        let calib = calibration();
        let mut depth = StereoDisparity::new(&calib, Default::default()).unwrap();
        let mut map = vec![0.0; WIDTH * HEIGHT];
        map[10 * WIDTH + 20] = 8.0;
        depth.set_disparity_data(&map).unwrap();

        let mut frame = OdometryFrame::with_levels(1);
        let valid = frame
            .push_keypoint(KeypointData::new(Vector2::new(20.0, 10.0), 0, descriptor(0)))
            .unwrap();
        let invalid = frame
            .push_keypoint(KeypointData::new(Vector2::new(21.0, 10.0), 0, descriptor(0)))
            .unwrap();
        depth.get_xyz(&mut frame);

        let keypoint = frame.keypoint(valid).unwrap();
        assert!(keypoint.has_depth);
        assert_eq!(keypoint.disparity, 8.0);
        assert_relative_eq!(keypoint.xyz.z, 400.0 * 0.1 / 8.0, max_relative = 1e-12);
        assert_relative_eq!(keypoint.xyzw.xyz() / keypoint.xyzw.w, keypoint.xyz);
        assert!(!frame.keypoint(invalid).unwrap().has_depth);
    }

    #[test]
    fn failed_interpolation_leaves_position_untouched() {
        let calib = calibration();
        let depth = StereoDisparity::new(&calib, Default::default()).unwrap();

        let mut keypoint = KeypointData::new(Vector2::new(5.5, 5.5), 0, descriptor(0));
        keypoint.has_depth = true;
        keypoint.xyz = Vector3::new(1.0, 2.0, 3.0);

        assert!(!depth.get_xyz_interp(&mut keypoint));
        assert!(!keypoint.has_depth);
        assert_eq!(keypoint.xyz, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn rejected_map_keeps_previous_depth() {
        let calib = calibration();
        let mut depth = StereoDisparity::new(&calib, Default::default()).unwrap();
        depth.set_disparity_data(&constant_map(4.0)).unwrap();

        assert!(depth.set_disparity_data(&[1.0; 10]).is_err());
        assert!(depth.have_xyz(0, 0));
        assert_eq!(depth.baseline(), 0.1);
    }

    /// One keypoint at (30, 20) with a dense prior of 10 px and candidates
    /// around its epipolar line.
    fn refinement_frame(candidates: Vec<SecondaryFeature>) -> (OdometryFrame, Vec<FeatureMatch>) {
        let mut frame = OdometryFrame::with_levels(1);
        let target = frame
            .push_keypoint(KeypointData::new(Vector2::new(30.0, 20.0), 0, descriptor(0)))
            .unwrap();
        frame.levels[0].secondary_features = candidates;
        let matches = vec![FeatureMatch::new(target, target)];
        (frame, matches)
    }

    fn candidate(u: f64, v: f64, byte: u8) -> SecondaryFeature {
        SecondaryFeature {
            base_uv: Vector2::new(u, v),
            descriptor: descriptor(byte),
        }
    }

    #[test]
    fn accepted_refinement_replaces_dense_depth() {
        let calib = calibration();
        let mut depth = StereoDisparity::new(&calib, Default::default()).unwrap();
        depth.set_disparity_data(&constant_map(10.0)).unwrap();

        let (mut frame, mut matches) = refinement_frame(vec![candidate(20.5, 20.3, 0)]);
        depth.get_xyz(&mut frame);
        let summary = depth.refine_matches(&mut matches, &mut frame);

        assert_eq!(summary.refined, 1);
        let keypoint = &frame.levels[0].keypoints[0];
        assert_eq!(keypoint.disparity, 9.5);
        assert_relative_eq!(keypoint.xyz, depth.get_xyz_values(30.0, 20.0, 9.5));
        assert_eq!(matches[0].status, MatchStatus::Ok);
        assert_eq!(matches[0].refined_target_keypoint.as_ref(), Some(keypoint));
        assert_eq!(
            depth.level_matches(0).unwrap().legal_matches().count(),
            1
        );
    }

    #[test]
    fn epipolar_rejection_for_every_tolerance() {
        let calib = calibration();
        for tolerance in [0.0, 0.25, 0.5, 1.0, 1.5, 3.0, 7.5] {
            let options = StereoDisparityOptions {
                max_dist_epipolar_line: tolerance,
                ..Default::default()
            };
            let mut depth = StereoDisparity::new(&calib, options).unwrap();
            depth.set_disparity_data(&constant_map(10.0)).unwrap();

            // best descriptor just outside the tolerance, worse one on the line
            let (mut frame, mut matches) = refinement_frame(vec![
                candidate(20.0, 20.0 + tolerance + 0.5, 0),
                candidate(20.25, 20.0, 0x0f),
            ]);
            depth.get_xyz(&mut frame);
            depth.refine_matches(&mut matches, &mut frame);

            let keypoint = &frame.levels[0].keypoints[0];
            assert_eq!(keypoint.disparity, 9.75, "tolerance {tolerance}");
        }
    }

    #[test]
    fn displacement_bound_keeps_dense_estimate() {
        let calib = calibration();
        let mut depth = StereoDisparity::new(&calib, Default::default()).unwrap();
        depth.set_disparity_data(&constant_map(10.0)).unwrap();

        // 3 px away from the prior of 10 px
        let (mut frame, mut matches) = refinement_frame(vec![candidate(23.0, 20.0, 0)]);
        depth.get_xyz(&mut frame);
        let before = frame.levels[0].keypoints[0].clone();
        let summary = depth.refine_matches(&mut matches, &mut frame);

        assert_eq!(summary.retained, 1);
        assert_eq!(frame.levels[0].keypoints[0], before);
        assert_eq!(matches[0].status, MatchStatus::Ok);
        assert!(matches[0].inlier);
    }

    #[test]
    fn refinement_recovers_depth_missing_from_dense_map() {
        let calib = calibration();
        let mut depth = StereoDisparity::new(&calib, Default::default()).unwrap();
        depth.set_disparity_data(&constant_map(0.0)).unwrap();

        // no prior, any disparity up to the maximum is admissible
        let (mut frame, mut matches) = refinement_frame(vec![candidate(5.0, 20.0, 0)]);
        depth.get_xyz(&mut frame);
        assert!(!frame.levels[0].keypoints[0].has_depth);

        depth.refine_matches(&mut matches, &mut frame);
        let keypoint = &frame.levels[0].keypoints[0];
        assert!(keypoint.has_depth);
        assert_eq!(keypoint.disparity, 25.0);
    }

    #[test]
    fn repeated_refinement_stays_near_the_dense_map() {
        let calib = calibration();
        let mut depth = StereoDisparity::new(&calib, Default::default()).unwrap();
        depth.set_disparity_data(&constant_map(10.0)).unwrap();

        // only 10.9 px lies within 1 px of the map, the closer descriptors
        // sit at 11.8 and 12.7 px
        let (mut frame, matches) = refinement_frame(vec![
            candidate(19.1, 20.0, 0x01),
            candidate(18.2, 20.0, 0),
            candidate(17.3, 20.0, 0),
        ]);
        // the same target twice in one pass
        let mut matches = vec![matches[0].clone(); 2];
        depth.get_xyz(&mut frame);

        for pass in 0..3 {
            for feature_match in &mut matches {
                feature_match.status = MatchStatus::NeedsDepthRefinement;
            }
            let summary = depth.refine_matches(&mut matches, &mut frame);
            assert_eq!(summary.refined, 2, "pass {pass}");

            let disparity = frame.levels[0].keypoints[0].disparity;
            assert_relative_eq!(disparity, 10.9, max_relative = 1e-5);
            assert!((disparity - 10.0).abs() <= 1.0, "pass {pass}: {disparity}");
        }
    }

    #[test]
    fn matches_not_flagged_for_refinement_are_left_alone() {
        let calib = calibration();
        let mut depth = StereoDisparity::new(&calib, Default::default()).unwrap();
        depth.set_disparity_data(&constant_map(10.0)).unwrap();

        let (mut frame, matches) = refinement_frame(vec![candidate(20.5, 20.0, 0)]);
        let mut done = matches[0].clone();
        done.status = MatchStatus::Ok;
        let mut rejected = matches[0].clone();
        rejected.status = MatchStatus::RefinementFailed;
        rejected.inlier = false;
        let mut matches = vec![done.clone(), rejected.clone()];

        depth.get_xyz(&mut frame);
        let summary = depth.refine_matches(&mut matches, &mut frame);

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.refined, 0);
        assert_eq!(matches, vec![done, rejected]);
        assert_eq!(frame.levels[0].keypoints[0].disparity, 10.0);
        assert!(depth.level_matches(0).unwrap().right_keypoints().is_empty());
    }

    #[test]
    fn every_level_starts_with_the_initial_capacity() {
        let calib = calibration();
        let depth = StereoDisparity::new(&calib, Default::default()).unwrap();

        for level in 0..depth.options().num_pyramid_levels {
            let capacity = depth.level_matches(level).unwrap().capacity();
            assert!(capacity >= INITIAL_CAPACITY, "level {level}: {capacity}");
        }
    }

    #[test]
    fn each_pass_clears_selections_and_keeps_the_allocation() {
        let calib = calibration();
        let mut depth = StereoDisparity::new(&calib, Default::default()).unwrap();
        depth.set_disparity_data(&constant_map(10.0)).unwrap();

        // enough accepted selections to grow level 0
        let (mut frame, matches) = refinement_frame(vec![candidate(20.5, 20.0, 0)]);
        let mut matches = vec![matches[0].clone(); 2 * INITIAL_CAPACITY];
        depth.get_xyz(&mut frame);
        depth.refine_matches(&mut matches, &mut frame);

        let first = depth.level_matches(0).unwrap();
        assert_eq!(first.legal_indices().len(), 2 * INITIAL_CAPACITY);
        let capacity = first.capacity();
        assert!(capacity >= 2 * INITIAL_CAPACITY);

        let (mut frame, mut matches) = refinement_frame(vec![candidate(21.0, 20.0, 0)]);
        depth.get_xyz(&mut frame);
        depth.refine_matches(&mut matches, &mut frame);

        let second = depth.level_matches(0).unwrap();
        assert_eq!(second.right_keypoints(), &[Vector2::new(21.0, 20.0)]);
        assert_eq!(second.legal_indices(), &[0]);
        assert_eq!(second.capacity(), capacity);
    }

    #[test]
    fn unmatched_keypoint_without_depth_is_marked_illegal() {
        let calib = calibration();
        let mut depth = StereoDisparity::new(&calib, Default::default()).unwrap();

        // candidate to the right of the keypoint gives negative disparity
        let (mut frame, mut matches) = refinement_frame(vec![candidate(35.0, 20.0, 0)]);
        depth.get_xyz(&mut frame);
        let summary = depth.refine_matches(&mut matches, &mut frame);

        assert_eq!(summary.failed, 1);
        assert_eq!(matches[0].status, MatchStatus::RefinementFailed);
        assert!(!matches[0].inlier);
    }

    #[test]
    fn levels_without_candidates_are_skipped() {
        let calib = calibration();
        let mut depth = StereoDisparity::new(&calib, Default::default()).unwrap();
        let threshold = depth.fast_threshold();

        let (mut frame, mut matches) = refinement_frame(Vec::new());
        let dangling = KeypointRef { level: 4, index: 0 };
        matches.push(FeatureMatch::new(dangling, dangling));
        let summary = depth.refine_matches(&mut matches, &mut frame);

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(matches[0].status, MatchStatus::NeedsDepthRefinement);
        assert_eq!(matches[1].status, MatchStatus::RefinementFailed);
        // no candidates, no controller update
        assert_eq!(depth.fast_threshold(), threshold);
    }

    /// Keypoint A prefers candidate C, but C prefers keypoint B.
    fn asymmetric_frame() -> (OdometryFrame, Vec<FeatureMatch>) {
        let mut frame = OdometryFrame::with_levels(1);
        let a = frame
            .push_keypoint(KeypointData::new(Vector2::new(30.0, 20.0), 0, descriptor(0x01)))
            .unwrap();
        let b = frame
            .push_keypoint(KeypointData::new(Vector2::new(30.0, 21.0), 0, descriptor(0x00)))
            .unwrap();
        frame.levels[0].secondary_features = vec![
            candidate(20.0, 20.0, 0x00),
            candidate(20.0, 25.0, 0xff),
        ];
        let matches = vec![FeatureMatch::new(a, a), FeatureMatch::new(b, b)];
        (frame, matches)
    }

    #[test]
    fn mutual_match_check_changes_the_outcome() {
        let calib = calibration();
        let mut outcomes = Vec::new();

        for require_mutual_match in [true, false] {
            let options = StereoDisparityOptions {
                require_mutual_match,
                ..Default::default()
            };
            let mut depth = StereoDisparity::new(&calib, options).unwrap();
            depth.set_disparity_data(&constant_map(10.0)).unwrap();

            let (mut frame, mut matches) = asymmetric_frame();
            depth.get_xyz(&mut frame);
            // only A is refined here; B stays on its dense estimate
            let summary = depth.refine_matches(&mut matches[..1], &mut frame);
            outcomes.push((summary.refined, matches[0].refined_target_keypoint.is_some()));
        }

        assert_eq!(outcomes, vec![(0, false), (1, true)]);
    }

    #[test]
    fn refinement_feeds_the_adaptive_threshold() {
        let calib = calibration();
        let mut depth = StereoDisparity::new(&calib, Default::default()).unwrap();
        let initial = depth.fast_threshold();

        // 64x48 / 250 asks for 12 features, 300 raises the threshold
        let (mut frame, mut matches) =
            refinement_frame((0..300).map(|i| candidate(i as f64, 40.0, 0xff)).collect());
        depth.refine_matches(&mut matches, &mut frame);

        assert!(depth.fast_threshold() > initial);
    }

    #[test]
    fn wrong_sized_right_image_is_rejected() {
        let calib = calibration();
        let depth = StereoDisparity::new(&calib, Default::default()).unwrap();
        let mut frame = OdometryFrame::with_levels(3);

        assert!(matches!(
            depth.detect_secondary_features(&GrayImage::new(10, 10), &mut frame),
            Err(DepthError::ImageSizeMismatch { .. })
        ));
    }

    #[test]
    fn usable_as_trait_object() {
        let calib = calibration();
        let mut source: Box<dyn DepthSource + '_> =
            Box::new(StereoDisparity::new(&calib, Default::default()).unwrap());
        let mut frame = OdometryFrame::with_levels(1);
        source.get_xyz(&mut frame);
        source.refine_xyz(&mut [], &mut frame);
        assert!(!source.have_xyz(0, 0));
        assert_eq!(source.baseline(), 0.1);
    }
}
