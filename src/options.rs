use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

/// Tuning of the stereo-disparity depth source. Read once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoDisparityOptions {
    /// Side length in pixels of the patch described around each feature.
    pub feature_window_size: usize,
    pub num_pyramid_levels: usize,
    /// Initial FAST threshold of the secondary feature search.
    pub fast_threshold: i32,
    pub fast_threshold_min: i32,
    pub fast_threshold_max: i32,
    pub target_pixels_per_feature: usize,
    pub fast_threshold_adaptive_gain: f32,
    pub use_adaptive_threshold: bool,
    pub require_mutual_match: bool,
    /// Pixels.
    pub max_dist_epipolar_line: f64,
    /// Pixels.
    pub max_refinement_displacement: f64,
    pub max_disparity: f64,
}

impl Default for StereoDisparityOptions {
    fn default() -> Self {
        Self {
            feature_window_size: 9,
            num_pyramid_levels: 3,
            fast_threshold: 20,
            fast_threshold_min: 5,
            fast_threshold_max: 70,
            target_pixels_per_feature: 250,
            fast_threshold_adaptive_gain: 0.005,
            use_adaptive_threshold: true,
            require_mutual_match: true,
            max_dist_epipolar_line: 1.5,
            max_refinement_displacement: 1.0,
            max_disparity: 128.0,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, OptionsError> {
    value.trim().parse().map_err(|_| OptionsError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

impl StereoDisparityOptions {
    pub fn from_json(json: &str) -> Result<Self, OptionsError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Build options from dashed string key/value pairs, as found in
    /// visual odometry configurations. Unknown keys are ignored so that a
    /// pipeline can hand over its whole option map.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, OptionsError> {
        let mut options = Self::default();

        for (key, value) in map {
            match key.as_str() {
                "feature-window-size" => options.feature_window_size = parse(key, value)?,
                "max-pyramid-level" => options.num_pyramid_levels = parse(key, value)?,
                "fast-threshold" => options.fast_threshold = parse(key, value)?,
                "fast-threshold-min" => options.fast_threshold_min = parse(key, value)?,
                "fast-threshold-max" => options.fast_threshold_max = parse(key, value)?,
                "target-pixels-per-feature" => {
                    options.target_pixels_per_feature = parse(key, value)?
                }
                "fast-threshold-adaptive-gain" => {
                    options.fast_threshold_adaptive_gain = parse(key, value)?
                }
                "use-adaptive-threshold" => options.use_adaptive_threshold = parse(key, value)?,
                "stereo-require-mutual-match" => {
                    options.require_mutual_match = parse(key, value)?
                }
                "stereo-max-dist-epipolar-line" => {
                    options.max_dist_epipolar_line = parse(key, value)?
                }
                "stereo-max-refinement-displacement" => {
                    options.max_refinement_displacement = parse(key, value)?
                }
                "stereo-max-disparity" => options.max_disparity = parse(key, value)?,
                _ => {}
            }
        }

        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.feature_window_size == 0 {
            return Err(OptionsError::Range(
                "feature_window_size",
                "must be positive".into(),
            ));
        }
        if self.num_pyramid_levels == 0 {
            return Err(OptionsError::Range(
                "num_pyramid_levels",
                "must be positive".into(),
            ));
        }
        if self.target_pixels_per_feature == 0 {
            return Err(OptionsError::Range(
                "target_pixels_per_feature",
                "must be positive".into(),
            ));
        }
        if !(self.fast_threshold_min <= self.fast_threshold
            && self.fast_threshold <= self.fast_threshold_max)
        {
            return Err(OptionsError::Range(
                "fast_threshold",
                format!(
                    "{} not within [{}, {}]",
                    self.fast_threshold, self.fast_threshold_min, self.fast_threshold_max
                ),
            ));
        }
        if self.fast_threshold_min < 0 || self.fast_threshold_max > u8::MAX as i32 {
            return Err(OptionsError::Range(
                "fast_threshold",
                "bounds must fit a u8 intensity".into(),
            ));
        }
        // a negative gain pushes the threshold away from its target
        if !(self.fast_threshold_adaptive_gain.is_finite()
            && self.fast_threshold_adaptive_gain >= 0.0)
        {
            return Err(OptionsError::Range(
                "fast_threshold_adaptive_gain",
                format!(
                    "{} must be finite and non-negative",
                    self.fast_threshold_adaptive_gain
                ),
            ));
        }
        if !(self.max_dist_epipolar_line >= 0.0) {
            return Err(OptionsError::Range(
                "max_dist_epipolar_line",
                "must be non-negative".into(),
            ));
        }
        if !(self.max_refinement_displacement >= 0.0) {
            return Err(OptionsError::Range(
                "max_refinement_displacement",
                "must be non-negative".into(),
            ));
        }
        if !(self.max_disparity > 0.0) {
            return Err(OptionsError::Range(
                "max_disparity",
                "must be positive".into(),
            ));
        }
        Ok(())
    }
}
