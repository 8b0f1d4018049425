use nalgebra::{Matrix3, Matrix4};
use tracing::trace;

use super::{disparity_store::DisparityStore, match_buffer::LevelMatches};
use crate::{
    algorithms::{brief::hamming_distance, epipolar::epipolar_line_distance, reprojection},
    calibration::StereoCalibration,
    frame::{FeatureMatch, KeypointData, MatchStatus, OdometryFrame, SecondaryFeature},
    options::StereoDisparityOptions,
};

/// Counts of one refinement pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefinementSummary {
    /// Keypoints whose depth was recomputed from a secondary match.
    pub refined: usize,
    /// Keypoints without an accepted match that kept their dense-map depth.
    pub retained: usize,
    /// Matches left without any depth.
    pub failed: usize,
    /// Matches not flagged for refinement, or at levels without secondary
    /// candidates.
    pub skipped: usize,
}

enum Search {
    NoCandidate,
    NotMutual(usize),
    Accepted { candidate: usize, disparity: f64 },
}

/// Re-matches target keypoints against the secondary candidates of their
/// pyramid level and recomputes depth from the matched disparity.
#[derive(Debug, Clone)]
pub struct EpipolarRefiner {
    fundamental: Matrix3<f64>,
    uvd1_to_xyz: Matrix4<f64>,
    max_dist_epipolar_line: f64,
    max_refinement_displacement: f64,
    max_disparity: f64,
    require_mutual_match: bool,
    matched_right_keypoints_per_level: Vec<LevelMatches>,
}

impl EpipolarRefiner {
    pub fn new(calib: &StereoCalibration, options: &StereoDisparityOptions) -> Self {
        Self {
            fundamental: calib.fundamental(),
            uvd1_to_xyz: calib.uvd1_to_xyz(),
            max_dist_epipolar_line: options.max_dist_epipolar_line,
            max_refinement_displacement: options.max_refinement_displacement,
            max_disparity: options.max_disparity,
            require_mutual_match: options.require_mutual_match,
            matched_right_keypoints_per_level: (0..options.num_pyramid_levels)
                .map(|_| LevelMatches::default())
                .collect(),
        }
    }

    /// Right-image positions selected at `level` during the last pass.
    pub fn level_matches(&self, level: usize) -> Option<&LevelMatches> {
        self.matched_right_keypoints_per_level.get(level)
    }

    /// Disparity of the pair if `right` is a plausible correspondence of `left`.
    /// `prior` is the dense-map disparity at `left`, if the map has one.
    fn admissible(
        &self,
        left: &KeypointData,
        prior: Option<f32>,
        right: &SecondaryFeature,
    ) -> Option<f64> {
        let distance =
            epipolar_line_distance(&self.fundamental, &left.rect_base_uv, &right.base_uv);
        if distance > self.max_dist_epipolar_line {
            return None;
        }

        let disparity = left.rect_base_uv.x - right.base_uv.x;
        if !(disparity > 0.0 && disparity <= self.max_disparity) {
            return None;
        }

        // refinements may only nudge the dense map disparity
        if let Some(prior) = prior {
            if (disparity - prior as f64).abs() > self.max_refinement_displacement {
                return None;
            }
        }

        Some(disparity)
    }

    fn best_candidate(
        &self,
        keypoint: &KeypointData,
        prior: Option<f32>,
        candidates: &[SecondaryFeature],
    ) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64, u32)> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            let Some(disparity) = self.admissible(keypoint, prior, candidate) else {
                continue;
            };
            let score = hamming_distance(&keypoint.descriptor, &candidate.descriptor);
            if best.map_or(true, |(_, _, best_score)| score < best_score) {
                best = Some((index, disparity, score));
            }
        }

        best.map(|(index, disparity, _)| (index, disparity))
    }

    fn best_keypoint(
        &self,
        candidate: &SecondaryFeature,
        keypoints: &[KeypointData],
        dense: &DisparityStore,
    ) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (index, keypoint) in keypoints.iter().enumerate() {
            let prior = dense.sample(keypoint.rect_base_uv.x, keypoint.rect_base_uv.y);
            if self.admissible(keypoint, prior, candidate).is_none() {
                continue;
            }
            let score = hamming_distance(&keypoint.descriptor, &candidate.descriptor);
            if best.map_or(true, |(_, best_score)| score < best_score) {
                best = Some((index, score));
            }
        }

        best.map(|(index, _)| index)
    }

    fn search(
        &self,
        keypoint: &KeypointData,
        keypoint_index: usize,
        keypoints: &[KeypointData],
        candidates: &[SecondaryFeature],
        dense: &DisparityStore,
    ) -> Search {
        let prior = dense.sample(keypoint.rect_base_uv.x, keypoint.rect_base_uv.y);
        let Some((candidate, disparity)) = self.best_candidate(keypoint, prior, candidates)
        else {
            return Search::NoCandidate;
        };

        if self.require_mutual_match {
            let reverse = self.best_keypoint(&candidates[candidate], keypoints, dense);
            if reverse != Some(keypoint_index) {
                return Search::NotMutual(candidate);
            }
        }

        Search::Accepted {
            candidate,
            disparity,
        }
    }

    /// Refine every match flagged [`MatchStatus::NeedsDepthRefinement`].
    /// Candidate disparities are bounded around `dense`, never around depth
    /// written by an earlier refinement.
    pub fn refine(
        &mut self,
        matches: &mut [FeatureMatch],
        frame: &mut OdometryFrame,
        dense: &DisparityStore,
    ) -> RefinementSummary {
        if self.matched_right_keypoints_per_level.len() < frame.levels.len() {
            self.matched_right_keypoints_per_level
                .resize_with(frame.levels.len(), LevelMatches::default);
        }
        self.matched_right_keypoints_per_level
            .iter_mut()
            .for_each(LevelMatches::clear);

        let mut summary = RefinementSummary::default();

        for feature_match in matches.iter_mut() {
            if feature_match.status != MatchStatus::NeedsDepthRefinement {
                summary.skipped += 1;
                continue;
            }

            let handle = feature_match.target_keypoint;
            let Some(level) = frame.levels.get(handle.level) else {
                feature_match.status = MatchStatus::RefinementFailed;
                feature_match.inlier = false;
                summary.failed += 1;
                continue;
            };
            let Some(keypoint) = level.keypoints.get(handle.index) else {
                feature_match.status = MatchStatus::RefinementFailed;
                feature_match.inlier = false;
                summary.failed += 1;
                continue;
            };
            if level.secondary_features.is_empty() {
                summary.skipped += 1;
                continue;
            }

            let had_depth = keypoint.has_depth;
            let outcome = self.search(
                keypoint,
                handle.index,
                &level.keypoints,
                &level.secondary_features,
                dense,
            );
            let level_matches = &mut self.matched_right_keypoints_per_level[handle.level];

            match outcome {
                Search::Accepted {
                    candidate,
                    disparity,
                } => {
                    let slot = level_matches.push(level.secondary_features[candidate].base_uv);
                    level_matches.mark_legal(slot);

                    let keypoint = &mut frame.levels[handle.level].keypoints[handle.index];
                    let (u, v) = (keypoint.rect_base_uv.x, keypoint.rect_base_uv.y);
                    let xyzw = reprojection::reproject_homogeneous(
                        &self.uvd1_to_xyz,
                        u,
                        v,
                        disparity as f32,
                    );
                    keypoint.disparity = disparity as f32;
                    keypoint.xyzw = xyzw;
                    keypoint.xyz = xyzw.xyz() / xyzw.w;
                    keypoint.has_depth = true;

                    feature_match.refined_target_keypoint = Some(keypoint.clone());
                    feature_match.status = MatchStatus::Ok;
                    summary.refined += 1;
                    continue;
                }
                Search::NotMutual(candidate) => {
                    trace!(
                        level = handle.level,
                        index = handle.index,
                        "secondary match is not mutual"
                    );
                    level_matches.push(level.secondary_features[candidate].base_uv);
                }
                Search::NoCandidate => {
                    trace!(
                        level = handle.level,
                        index = handle.index,
                        "no secondary candidate within epipolar and displacement bounds"
                    );
                }
            }

            // the dense-map estimate, if any, stays in place
            if had_depth {
                feature_match.status = MatchStatus::Ok;
                summary.retained += 1;
            } else {
                feature_match.status = MatchStatus::RefinementFailed;
                feature_match.inlier = false;
                summary.failed += 1;
            }
        }

        summary
    }
}
