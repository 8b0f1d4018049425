use thiserror::Error;

/// Contract violations raised by the depth source itself.
///
/// Per-keypoint failures (missing disparity, rejected refinements) are never
/// errors; they are reported through the keypoint and match flags.
#[derive(Debug, Error, PartialEq)]
pub enum DepthError {
    #[error("disparity map has {got} values, expected {expected} ({width}x{height})")]
    DimensionMismatch {
        got: usize,
        expected: usize,
        width: usize,
        height: usize,
    },
    #[error("secondary image is {got_width}x{got_height}, expected {width}x{height}")]
    ImageSizeMismatch {
        got_width: u32,
        got_height: u32,
        width: usize,
        height: usize,
    },
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("option `{key}` has invalid value `{value}`")]
    InvalidValue { key: String, value: String },
    #[error("option `{0}` is out of range: {1}")]
    Range(&'static str, String),
    #[error("failed to parse options: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("image size must be non-zero, got {0}x{1}")]
    EmptyImage(usize, usize),
    #[error("focal lengths must be positive, got fx={0} fy={1}")]
    FocalLength(f64, f64),
    #[error("baseline must be positive, got {0}")]
    Baseline(f64),
}
