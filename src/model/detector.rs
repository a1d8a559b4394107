use burn::module::Ignored;
use burn::prelude::*;
use serde::Serialize;

use super::backbone::{Backbone, CspDarknet};
use super::fusion::{FusedTriple, FusionConfig, FusionNetwork};
use super::head::{DecoupledHead, Prediction};
use super::level::ScaleLevel;
use super::profile::Profile;
use crate::config::ModelConfig;
use crate::error::{DetectError, Result};

/// Static shape summary of a built model. Two models built from the same
/// config compare equal regardless of their weights.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Architecture {
    pub profile: Profile,
    pub backbone_channels: [usize; 3],
    pub fused_channels: [usize; 3],
    pub head_hidden: usize,
    pub head_depthwise: bool,
    pub num_classes: usize,
    pub pred_channels: usize,
}

/// Backbone -> fusion -> decoupled head.
#[derive(Module, Debug)]
pub struct DetectionModel<B: Backend> {
    pub backbone: CspDarknet<B>,
    pub fusion: FusionNetwork<B>,
    pub head: DecoupledHead<B>,
    profile: Ignored<Profile>,
}

/// Image channels the stem is built for.
pub const INPUT_CHANNELS: usize = 3;

impl<B: Backend> DetectionModel<B> {
    /// Build with the default operators for `profile_name`.
    pub fn new(device: &B::Device, profile_name: &str, num_classes: usize) -> Result<Self> {
        let config = ModelConfig {
            profile: profile_name.to_string(),
            num_classes,
            ..ModelConfig::default()
        };
        Self::from_config(device, &config)
    }

    /// Profile lookup, class count, channel plan and backbone/fusion
    /// agreement are all checked before any parameter is allocated.
    pub fn from_config(device: &B::Device, config: &ModelConfig) -> Result<Self> {
        let profile = config.validate()?;

        let fusion_config = FusionConfig::new(profile.width)
            .with_in_channels(config.in_channels)
            .with_activation(config.activation)
            .with_attention(config.attention)
            .with_downsample(config.downsample);
        let plan = fusion_config.plan();
        plan.validate()?;

        let produced = CspDarknet::<B>::channels_for(profile.width);
        for level in ScaleLevel::ALL {
            let expected = plan.level_channels(level);
            if produced[level.index()] != expected {
                return Err(DetectError::channels(
                    format!("backbone output {level}"),
                    expected,
                    produced[level.index()],
                ));
            }
        }

        log::info!(
            "DetectionModel init: profile {profile}, num_classes={}",
            config.num_classes
        );

        let backbone = CspDarknet::new(
            device,
            profile.depth,
            profile.width,
            profile.depthwise,
            config.activation,
        );
        let fusion = FusionNetwork::new(device, &fusion_config)?;
        let head = DecoupledHead::new(
            device,
            config.num_classes,
            profile.width,
            fusion.out_channels(),
            profile.depthwise,
            config.activation,
        )?;

        Ok(Self {
            backbone,
            fusion,
            head,
            profile: Ignored(profile),
        })
    }

    pub fn profile(&self) -> Profile {
        *self.profile
    }

    /// Images must be `[N, 3, H, W]` with H and W multiples of the coarsest
    /// stride, so every level halves exactly.
    pub fn check_input(&self, dims: [usize; 4]) -> Result<()> {
        let stride = ScaleLevel::Low.stride();
        let [_, c, h, w] = dims;
        if c != INPUT_CHANNELS || h == 0 || w == 0 || h % stride != 0 || w % stride != 0 {
            return Err(DetectError::shape(
                "model input",
                format!("[N, {INPUT_CHANNELS}, H, W] with H and W positive multiples of {stride}"),
                dims,
            ));
        }
        Ok(())
    }

    pub fn architecture(&self) -> Architecture {
        Architecture {
            profile: self.profile(),
            backbone_channels: self.backbone.out_channels(),
            fused_channels: self.fusion.out_channels(),
            head_hidden: self.head.hidden(),
            head_depthwise: self.head.depthwise(),
            num_classes: self.head.num_classes(),
            pred_channels: self.head.pred_channels(),
        }
    }

    /// Backbone and fusion only. The image is checked before any operator
    /// runs.
    pub fn fuse(&self, images: Tensor<B, 4>) -> Result<FusedTriple<B>> {
        self.check_input(images.dims())?;
        let features = self.backbone.extract(images);
        self.fusion.fuse_features(features)
    }

    /// Raw predictions ordered (High, Mid, Low).
    pub fn forward(&self, images: Tensor<B, 4>) -> Result<[Prediction<B>; 3]> {
        let [b, c, h, w] = images.dims();
        log::debug!("DetectionModel forward: input shape=[{b}, {c}, {h}, {w}]");

        let fused = self.fuse(images)?;
        self.head.predict(fused)
    }
}
