use crate::options::StereoDisparityOptions;

/// Feedback loop driving the FAST threshold of the secondary feature search
/// towards a target number of features per frame.
#[derive(Debug, Clone)]
pub struct AdaptiveThreshold {
    threshold: i32,
    min: i32,
    max: i32,
    target_num_features: usize,
    gain: f32,
    enabled: bool,
}

impl AdaptiveThreshold {
    pub fn new(options: &StereoDisparityOptions, width: usize, height: usize) -> Self {
        Self {
            threshold: options
                .fast_threshold
                .clamp(options.fast_threshold_min, options.fast_threshold_max),
            min: options.fast_threshold_min,
            max: options.fast_threshold_max,
            target_num_features: (width * height / options.target_pixels_per_feature).max(1),
            gain: options.fast_threshold_adaptive_gain,
            enabled: options.use_adaptive_threshold,
        }
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Threshold as the intensity difference expected by FAST.
    pub fn fast_threshold(&self) -> u8 {
        self.threshold.clamp(0, u8::MAX as i32) as u8
    }

    pub fn target_num_features(&self) -> usize {
        self.target_num_features
    }

    /// Feed the number of features detected with the current threshold.
    /// Too many features raise the threshold, too few lower it.
    /// Returns the threshold to use next.
    pub fn update(&mut self, num_detected: usize) -> i32 {
        if !self.enabled {
            return self.threshold;
        }

        let error = num_detected as f32 - self.target_num_features as f32;
        let adjustment = (error * self.gain) as i32;
        self.threshold = (self.threshold + adjustment).clamp(self.min, self.max);

        self.threshold
    }
}
