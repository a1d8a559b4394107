//! Error types for model construction and forward evaluation.

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, DetectError>;

/// Configuration and contract violations.
///
/// None of these are transient: the pipeline performs no I/O during a forward
/// call, so every error means the caller has to fix its configuration or its
/// inputs and retry the whole call.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Unknown model profile `{name}` (expected one of: {known})")]
    UnknownProfile { name: String, known: String },

    #[error("Wrong channel config at {site}: expected {expected} channels, got {actual}")]
    WrongChannelConfig {
        site: String,
        expected: usize,
        actual: usize,
    },

    #[error("Shape mismatch at {site}: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        site: String,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("Backbone output is missing feature level `{0}`")]
    MissingFeatureLevel(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl DetectError {
    pub(crate) fn channels(site: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::WrongChannelConfig {
            site: site.into(),
            expected,
            actual,
        }
    }

    pub(crate) fn shape(
        site: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<Vec<usize>>,
    ) -> Self {
        Self::ShapeMismatch {
            site: site.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_reports_expected_and_actual() {
        let err = DetectError::shape("head.stem[0]", "[N, 64, H, W]", vec![1, 32, 8, 8]);
        let msg = err.to_string();
        assert!(msg.contains("head.stem[0]"));
        assert!(msg.contains("[N, 64, H, W]"));
        assert!(msg.contains("[1, 32, 8, 8]"));
    }

    #[test]
    fn test_channel_error_message() {
        let err = DetectError::channels("concat -> mid_process", 1024, 768);
        assert_eq!(
            err.to_string(),
            "Wrong channel config at concat -> mid_process: expected 1024 channels, got 768"
        );
    }
}
