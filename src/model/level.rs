use std::fmt;

use serde::{Deserialize, Serialize};

/// Base channel counts (High, Mid, Low) before width scaling.
pub const BASE_CHANNELS: [usize; 3] = [256, 512, 1024];

/// The three detection scales, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleLevel {
    High,
    Mid,
    Low,
}

impl ScaleLevel {
    pub const ALL: [ScaleLevel; 3] = [ScaleLevel::High, ScaleLevel::Mid, ScaleLevel::Low];

    pub fn index(self) -> usize {
        match self {
            ScaleLevel::High => 0,
            ScaleLevel::Mid => 1,
            ScaleLevel::Low => 2,
        }
    }

    /// Stride relative to the model input.
    pub fn stride(self) -> usize {
        match self {
            ScaleLevel::High => 8,
            ScaleLevel::Mid => 16,
            ScaleLevel::Low => 32,
        }
    }

    /// Name under which the backbone publishes this level.
    pub fn feature_name(self) -> &'static str {
        match self {
            ScaleLevel::High => "dark3",
            ScaleLevel::Mid => "dark4",
            ScaleLevel::Low => "dark5",
        }
    }
}

impl fmt::Display for ScaleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScaleLevel::High => "high",
            ScaleLevel::Mid => "mid",
            ScaleLevel::Low => "low",
        };
        f.write_str(name)
    }
}

/// Scale a base channel count by the width multiplier, rounding to nearest.
///
/// Every channel count in the crate goes through this function so that
/// concatenation operands stay aligned at every width.
pub fn scaled(base: usize, width: f64) -> usize {
    (base as f64 * width).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strides_double_per_level() {
        assert_eq!(ScaleLevel::High.stride() * 2, ScaleLevel::Mid.stride());
        assert_eq!(ScaleLevel::Mid.stride() * 2, ScaleLevel::Low.stride());
    }

    #[test]
    fn test_scaled_rounds_to_nearest() {
        assert_eq!(scaled(256, 0.375), 96);
        assert_eq!(scaled(1024, 1.25), 1280);
        assert_eq!(scaled(10, 0.25), 3);
        assert_eq!(scaled(10, 0.36), 4);
    }

    #[test]
    fn test_feature_names_are_distinct() {
        let names: Vec<_> = ScaleLevel::ALL.iter().map(|l| l.feature_name()).collect();
        assert_eq!(names, vec!["dark3", "dark4", "dark5"]);
    }
}
