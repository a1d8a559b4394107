use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::*;

use crate::error::{DetectError, Result};
use crate::model::blocks::{apply_checked, Activation, BaseConv, ConvBlock, FeatureOp};
use crate::model::fusion::FusedTriple;
use crate::model::level::{scaled, ScaleLevel};

/// Box regression channels per location.
pub const REG_CHANNELS: usize = 4;
/// Objectness channels per location.
pub const OBJ_CHANNELS: usize = 1;
/// Base width of every head branch before width scaling.
pub const HEAD_BASE_WIDTH: usize = 256;

/// Raw per-location predictions for one scale:
/// `[N, 4 + 1 + num_classes, H, W]`, channels ordered (reg, obj, cls).
#[derive(Debug, Clone)]
pub struct Prediction<B: Backend> {
    pub level: ScaleLevel,
    pub tensor: Tensor<B, 4>,
    num_classes: usize,
}

impl<B: Backend> Prediction<B> {
    pub fn dims(&self) -> [usize; 4] {
        self.tensor.dims()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Channels [0, 4).
    pub fn regression(&self) -> Tensor<B, 4> {
        self.tensor.clone().narrow(1, 0, REG_CHANNELS)
    }

    /// Channel 4.
    pub fn objectness(&self) -> Tensor<B, 4> {
        self.tensor.clone().narrow(1, REG_CHANNELS, OBJ_CHANNELS)
    }

    /// Channels [5, 5 + num_classes).
    pub fn classification(&self) -> Tensor<B, 4> {
        self.tensor
            .clone()
            .narrow(1, REG_CHANNELS + OBJ_CHANNELS, self.num_classes)
    }
}

/// Head parameters for a single scale.
#[derive(Module, Debug)]
pub struct ScaleHead<B: Backend> {
    stem: BaseConv<B>,
    cls_convs: Vec<ConvBlock<B>>,
    cls_pred: Conv2d<B>,
    reg_convs: Vec<ConvBlock<B>>,
    reg_pred: Conv2d<B>,
    obj_pred: Conv2d<B>,
    num_classes: usize,
}

impl<B: Backend> ScaleHead<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        hidden: usize,
        num_classes: usize,
        depthwise: bool,
        activation: Activation,
    ) -> Self {
        let branch = || {
            (0..2)
                .map(|_| ConvBlock::new(device, hidden, hidden, 3, 1, depthwise, activation))
                .collect::<Vec<_>>()
        };

        Self {
            stem: BaseConv::new(device, in_channels, hidden, 1, 1, activation),
            cls_convs: branch(),
            cls_pred: Conv2dConfig::new([hidden, num_classes], [1, 1]).init(device),
            reg_convs: branch(),
            reg_pred: Conv2dConfig::new([hidden, REG_CHANNELS], [1, 1]).init(device),
            obj_pred: Conv2dConfig::new([hidden, OBJ_CHANNELS], [1, 1]).init(device),
            num_classes,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.stem.forward(x);

        let cls_feat = self
            .cls_convs
            .iter()
            .fold(x.clone(), |feat, conv| conv.forward(feat));
        let cls_output = self.cls_pred.forward(cls_feat);

        let reg_feat = self.reg_convs.iter().fold(x, |feat, conv| conv.forward(feat));
        let reg_output = self.reg_pred.forward(reg_feat.clone());
        let obj_output = self.obj_pred.forward(reg_feat);

        Tensor::cat(vec![reg_output, obj_output, cls_output], 1)
    }
}

impl<B: Backend> FeatureOp<B> for ScaleHead<B> {
    fn apply(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x)
    }

    fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    fn out_channels(&self) -> usize {
        REG_CHANNELS + OBJ_CHANNELS + self.num_classes
    }
}

/// Decoupled detection head: per scale, a shared 1x1 stem feeding separate
/// classification and regression/objectness conv stacks.
#[derive(Module, Debug)]
pub struct DecoupledHead<B: Backend> {
    scales: Vec<ScaleHead<B>>,
    num_classes: usize,
    hidden: usize,
    depthwise: bool,
}

impl<B: Backend> DecoupledHead<B> {
    /// `in_channels` are the fused (High, Mid, Low) channel counts.
    pub fn new(
        device: &B::Device,
        num_classes: usize,
        width: f64,
        in_channels: [usize; 3],
        depthwise: bool,
        activation: Activation,
    ) -> Result<Self> {
        if num_classes == 0 {
            return Err(DetectError::InvalidConfig(
                "num_classes must be at least 1".to_string(),
            ));
        }
        let hidden = scaled(HEAD_BASE_WIDTH, width);
        if hidden == 0 {
            return Err(DetectError::InvalidConfig(format!(
                "head width is zero at width multiplier {width}"
            )));
        }

        log::info!("DecoupledHead init:");
        log::info!("  num_classes = {num_classes}");
        log::info!(
            "  pred_channels = {REG_CHANNELS} + {OBJ_CHANNELS} + {num_classes} = {}",
            REG_CHANNELS + OBJ_CHANNELS + num_classes
        );
        log::info!("  hidden = {hidden}, depthwise = {depthwise}, in_channels = {in_channels:?}");

        let scales = in_channels
            .iter()
            .map(|&c| ScaleHead::new(device, c, hidden, num_classes, depthwise, activation))
            .collect();

        Ok(Self {
            scales,
            num_classes,
            hidden,
            depthwise,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn hidden(&self) -> usize {
        self.hidden
    }

    pub fn depthwise(&self) -> bool {
        self.depthwise
    }

    pub fn in_channels(&self) -> [usize; 3] {
        ScaleLevel::ALL.map(|level| self.scales[level.index()].in_channels())
    }

    pub fn pred_channels(&self) -> usize {
        REG_CHANNELS + OBJ_CHANNELS + self.num_classes
    }

    /// One prediction per fused level, in (High, Mid, Low) order.
    ///
    /// All three inputs are checked before any of them is evaluated.
    pub fn predict(&self, fused: FusedTriple<B>) -> Result<[Prediction<B>; 3]> {
        for level in ScaleLevel::ALL {
            let dims = fused.get(level).dims();
            let expected = self.scales[level.index()].in_channels();
            if dims[1] != expected {
                return Err(DetectError::shape(
                    format!("head input {level}"),
                    format!("[N, {expected}, H, W]"),
                    dims,
                ));
            }
        }

        let [high, mid, low] = fused.into_array();
        Ok([
            self.predict_level(ScaleLevel::High, high)?,
            self.predict_level(ScaleLevel::Mid, mid)?,
            self.predict_level(ScaleLevel::Low, low)?,
        ])
    }

    pub fn predict_level(&self, level: ScaleLevel, x: Tensor<B, 4>) -> Result<Prediction<B>> {
        let scale = &self.scales[level.index()];
        let [b, c, h, w] = x.dims();
        log::debug!("DecoupledHead {level} input: shape=[{b}, {c}, {h}, {w}]");

        let tensor = apply_checked(scale, x, &format!("head input {level}"))?;

        let [b, c, h, w] = tensor.dims();
        log::debug!("DecoupledHead {level} output: shape=[{b}, {c}, {h}, {w}]");

        Ok(Prediction {
            level,
            tensor,
            num_classes: self.num_classes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    fn fused(
        device: &<TestBackend as Backend>::Device,
        channels: [usize; 3],
        size: usize,
    ) -> FusedTriple<TestBackend> {
        FusedTriple {
            high: Tensor::random([2, channels[0], size, size], Distribution::Default, device),
            mid: Tensor::random([2, channels[1], size / 2, size / 2], Distribution::Default, device),
            low: Tensor::random([2, channels[2], size / 4, size / 4], Distribution::Default, device),
        }
    }

    #[test]
    fn test_prediction_shapes_and_order() {
        let device = Default::default();
        let head = DecoupledHead::<TestBackend>::new(
            &device,
            3,
            0.125,
            [32, 64, 128],
            false,
            Activation::Silu,
        )
        .unwrap();
        assert_eq!(head.hidden(), 32);
        assert_eq!(head.in_channels(), [32, 64, 128]);

        let preds = head.predict(fused(&device, [32, 64, 128], 8)).unwrap();

        let levels: Vec<_> = preds.iter().map(|p| p.level).collect();
        assert_eq!(levels, ScaleLevel::ALL.to_vec());
        assert_eq!(preds[0].dims(), [2, 8, 8, 8]);
        assert_eq!(preds[1].dims(), [2, 8, 4, 4]);
        assert_eq!(preds[2].dims(), [2, 8, 2, 2]);
    }

    #[test]
    fn test_channel_split_has_no_bleed() {
        let device = Default::default();
        let head = DecoupledHead::<TestBackend>::new(
            &device,
            7,
            0.125,
            [32, 64, 128],
            true,
            Activation::Silu,
        )
        .unwrap();
        assert!(head.depthwise());

        let preds = head.predict(fused(&device, [32, 64, 128], 4)).unwrap();
        for pred in &preds {
            let [n, c, h, w] = pred.dims();
            assert_eq!(c, 4 + 1 + 7);
            assert_eq!(pred.regression().dims(), [n, 4, h, w]);
            assert_eq!(pred.objectness().dims(), [n, 1, h, w]);
            assert_eq!(pred.classification().dims(), [n, 7, h, w]);

            let joined = Tensor::cat(
                vec![pred.regression(), pred.objectness(), pred.classification()],
                1,
            );
            let expected: Vec<f32> = pred.tensor.clone().into_data().to_vec().unwrap();
            let actual: Vec<f32> = joined.into_data().to_vec().unwrap();
            assert_eq!(expected, actual);
        }
    }

    #[test]
    fn test_wrong_input_channels_rejected() {
        let device = Default::default();
        let head = DecoupledHead::<TestBackend>::new(
            &device,
            2,
            0.125,
            [32, 64, 128],
            false,
            Activation::Relu,
        )
        .unwrap();

        let err = head.predict(fused(&device, [32, 60, 128], 8)).unwrap_err();
        match err {
            DetectError::ShapeMismatch { site, expected, .. } => {
                assert_eq!(site, "head input mid");
                assert_eq!(expected, "[N, 64, H, W]");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_classes_rejected() {
        let device = Default::default();
        let result = DecoupledHead::<TestBackend>::new(
            &device,
            0,
            0.25,
            [64, 128, 256],
            false,
            Activation::Silu,
        );
        assert!(matches!(result, Err(DetectError::InvalidConfig(_))));
    }
}
