use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DetectError, Result};
use crate::model::blocks::{Activation, AttentionKind, DownsampleKind};
use crate::model::level::BASE_CHANNELS;
use crate::model::profile::Profile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    // Model size
    pub profile: String,
    pub num_classes: usize,

    // Operators
    pub activation: Activation,
    pub attention: AttentionKind,
    pub downsample: DownsampleKind,

    // Base (High, Mid, Low) channels before width scaling
    pub in_channels: [usize; 3],

    // Input
    pub img_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            profile: "s".to_string(),
            num_classes: 80,
            activation: Activation::Silu,
            attention: AttentionKind::Channel,
            downsample: DownsampleKind::Switchable,
            in_channels: BASE_CHANNELS,
            img_size: 640,
        }
    }
}

impl ModelConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ModelConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Resolve the profile and check the settings the model is built from.
    /// `img_size` is checked by [`crate::preprocess::ImagePreprocessor`].
    pub fn validate(&self) -> Result<Profile> {
        let profile = Profile::from_name(&self.profile)?;

        if self.num_classes == 0 {
            return Err(DetectError::InvalidConfig(
                "num_classes must be at least 1".to_string(),
            ));
        }
        if self.in_channels.contains(&0) {
            return Err(DetectError::InvalidConfig(format!(
                "in_channels must be non-zero, got {:?}",
                self.in_channels
            )));
        }

        Ok(profile)
    }
}
