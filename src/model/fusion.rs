use std::collections::BTreeMap;

use burn::prelude::*;

use crate::error::{DetectError, Result};
use crate::model::blocks::{
    apply_checked, concat_channels, Activation, AttentionKind, ChannelResize, Downsample,
    DownsampleKind, FeatureOp, Gate, Upsample,
};
use crate::model::level::{ScaleLevel, BASE_CHANNELS};
use crate::model::plan::{site, FusionPlan, Node, OpKind, STEPS};

/// Named backbone outputs, keyed by [`ScaleLevel::feature_name`].
#[derive(Debug, Clone)]
pub struct BackboneFeatures<B: Backend> {
    features: BTreeMap<String, Tensor<B, 4>>,
}

impl<B: Backend> BackboneFeatures<B> {
    pub fn new() -> Self {
        Self { features: BTreeMap::new() }
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor<B, 4>) {
        self.features.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor<B, 4>> {
        self.features.get(name)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Pull out the three detection levels in (High, Mid, Low) order.
    pub fn into_levels(mut self) -> Result<[Tensor<B, 4>; 3]> {
        if let Some(level) = ScaleLevel::ALL
            .iter()
            .find(|l| !self.features.contains_key(l.feature_name()))
        {
            return Err(DetectError::MissingFeatureLevel(level.feature_name().to_string()));
        }

        let mut take = |level: ScaleLevel| {
            self.features
                .remove(level.feature_name())
                .ok_or_else(|| DetectError::MissingFeatureLevel(level.feature_name().to_string()))
        };
        Ok([take(ScaleLevel::High)?, take(ScaleLevel::Mid)?, take(ScaleLevel::Low)?])
    }
}

impl<B: Backend> Default for BackboneFeatures<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fusion output, ordered (High, Mid, Low).
#[derive(Debug, Clone)]
pub struct FusedTriple<B: Backend> {
    pub high: Tensor<B, 4>,
    pub mid: Tensor<B, 4>,
    pub low: Tensor<B, 4>,
}

impl<B: Backend> FusedTriple<B> {
    pub fn get(&self, level: ScaleLevel) -> &Tensor<B, 4> {
        match level {
            ScaleLevel::High => &self.high,
            ScaleLevel::Mid => &self.mid,
            ScaleLevel::Low => &self.low,
        }
    }

    pub fn dims(&self) -> [[usize; 4]; 3] {
        [self.high.dims(), self.mid.dims(), self.low.dims()]
    }

    pub fn into_array(self) -> [Tensor<B, 4>; 3] {
        [self.high, self.mid, self.low]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    pub in_channels: [usize; 3],
    pub width: f64,
    pub activation: Activation,
    pub attention: AttentionKind,
    pub downsample: DownsampleKind,
}

impl FusionConfig {
    pub fn new(width: f64) -> Self {
        Self {
            in_channels: BASE_CHANNELS,
            width,
            activation: Activation::default(),
            attention: AttentionKind::default(),
            downsample: DownsampleKind::default(),
        }
    }

    pub fn with_attention(mut self, attention: AttentionKind) -> Self {
        self.attention = attention;
        self
    }

    pub fn with_downsample(mut self, downsample: DownsampleKind) -> Self {
        self.downsample = downsample;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_in_channels(mut self, in_channels: [usize; 3]) -> Self {
        self.in_channels = in_channels;
        self
    }

    pub fn plan(&self) -> FusionPlan {
        FusionPlan::new(self.in_channels, self.width)
    }
}

/// Attention-gated bidirectional path aggregation over the three backbone
/// levels. The graph is [`STEPS`]; `fuse` walks it in order.
#[derive(Module, Debug)]
pub struct FusionNetwork<B: Backend> {
    gate_high: Gate<B>,
    gate_mid: Gate<B>,
    gate_low: Gate<B>,

    // top-down
    upsample_low_to_mid: Upsample<B>,
    upsample_mid_to_high: Upsample<B>,

    // bottom-up
    downsample_mid_to_low: Downsample<B>,
    downsample_high_to_mid: Downsample<B>,

    resize_high: ChannelResize<B>,
    resize_mid: ChannelResize<B>,
    resize_low: ChannelResize<B>,

    base_high: usize,
    base_mid: usize,
    base_low: usize,
    width: f64,
}

impl<B: Backend> FusionNetwork<B> {
    /// Build the operators from the channel plan. Fails before allocating any
    /// parameter if the plan's concatenations do not line up.
    pub fn new(device: &B::Device, config: &FusionConfig) -> Result<Self> {
        let plan = config.plan();
        plan.validate()?;

        let c = |node: Node| plan.channels(node);
        let act = config.activation;

        let network = Self {
            gate_high: Gate::new(device, config.attention, c(Node::InputHigh), act),
            gate_mid: Gate::new(device, config.attention, c(Node::InputMid), act),
            gate_low: Gate::new(device, config.attention, c(Node::InputLow), act),

            upsample_low_to_mid: Upsample::new(device, c(Node::GatedLow), c(Node::LowUp)),
            upsample_mid_to_high: Upsample::new(device, c(Node::MidProcess), c(Node::MidUp)),

            downsample_mid_to_low: Downsample::new(
                device,
                config.downsample,
                c(Node::MidProcess),
                c(Node::MidDown),
                act,
            ),
            downsample_high_to_mid: Downsample::new(
                device,
                config.downsample,
                c(Node::HighRaw),
                c(Node::HighDown),
                act,
            ),

            resize_high: ChannelResize::new(device, c(Node::HighRaw), c(Node::OutHigh), act),
            resize_mid: ChannelResize::new(device, c(Node::MidRaw), c(Node::OutMid), act),
            resize_low: ChannelResize::new(device, c(Node::LowRaw), c(Node::OutLow), act),

            base_high: config.in_channels[0],
            base_mid: config.in_channels[1],
            base_low: config.in_channels[2],
            width: config.width,
        };
        network.check_operators(&plan)?;

        log::info!(
            "FusionNetwork init: width={}, in_channels={:?}, attention={:?}, downsample={:?}",
            config.width,
            network.in_channels(),
            config.attention,
            config.downsample
        );
        for line in plan.describe() {
            log::debug!("  {line}");
        }

        Ok(network)
    }

    pub fn plan(&self) -> FusionPlan {
        FusionPlan::new([self.base_high, self.base_mid, self.base_low], self.width)
    }

    /// Channel counts expected on the (High, Mid, Low) inputs; the outputs
    /// carry the same counts.
    pub fn in_channels(&self) -> [usize; 3] {
        let plan = self.plan();
        ScaleLevel::ALL.map(|level| plan.channels(Node::input(level)))
    }

    pub fn out_channels(&self) -> [usize; 3] {
        let plan = self.plan();
        ScaleLevel::ALL.map(|level| plan.level_channels(level))
    }

    fn operator(&self, op: OpKind) -> Option<&dyn FeatureOp<B>> {
        let op: &dyn FeatureOp<B> = match op {
            OpKind::Gate(ScaleLevel::High) => &self.gate_high,
            OpKind::Gate(ScaleLevel::Mid) => &self.gate_mid,
            OpKind::Gate(ScaleLevel::Low) => &self.gate_low,
            OpKind::UpsampleLowToMid => &self.upsample_low_to_mid,
            OpKind::UpsampleMidToHigh => &self.upsample_mid_to_high,
            OpKind::DownsampleMidToLow => &self.downsample_mid_to_low,
            OpKind::DownsampleHighToMid => &self.downsample_high_to_mid,
            OpKind::Resize(ScaleLevel::High) => &self.resize_high,
            OpKind::Resize(ScaleLevel::Mid) => &self.resize_mid,
            OpKind::Resize(ScaleLevel::Low) => &self.resize_low,
            OpKind::Concat => return None,
        };
        Some(op)
    }

    /// Every operator's declared channels must agree with the plan.
    fn check_operators(&self, plan: &FusionPlan) -> Result<()> {
        for step in &STEPS {
            let Some(op) = self.operator(step.op) else {
                continue;
            };
            let expected_in = plan.step_in_channels(step);
            if op.in_channels() != expected_in {
                return Err(DetectError::channels(site(step), expected_in, op.in_channels()));
            }
            let expected_out = plan.channels(step.output);
            if op.out_channels() != expected_out {
                return Err(DetectError::channels(site(step), expected_out, op.out_channels()));
            }
            let expected_stride = step.op.spatial_factor().unsigned_abs() as usize;
            if op.stride() != expected_stride {
                return Err(DetectError::InvalidConfig(format!(
                    "{}: operator stride {} does not match resampling factor {expected_stride}",
                    site(step),
                    op.stride()
                )));
            }
        }
        Ok(())
    }

    /// Validate the three inputs before any operator runs: channel counts
    /// from the plan, a shared batch size, and exact factor-2 spatial ratios.
    fn check_inputs(&self, inputs: &[Tensor<B, 4>; 3]) -> Result<()> {
        let expected = self.in_channels();
        let [high, mid, low] = [inputs[0].dims(), inputs[1].dims(), inputs[2].dims()];
        let batch = high[0];

        for (level, dims) in ScaleLevel::ALL.iter().zip([high, mid, low]) {
            let channels = expected[level.index()];
            if dims[1] != channels || dims[0] != batch {
                return Err(DetectError::shape(
                    format!("fusion input {level}"),
                    format!("[{batch}, {channels}, H, W]"),
                    dims,
                ));
            }
        }

        let finer = [(high, mid, ScaleLevel::Mid), (mid, low, ScaleLevel::Low)];
        for (fine, coarse, level) in finer {
            if fine[2] != coarse[2] * 2 || fine[3] != coarse[3] * 2 {
                return Err(DetectError::shape(
                    format!("fusion input {level}"),
                    format!("[{batch}, {}, {}, {}]", coarse[1], fine[2] / 2, fine[3] / 2),
                    coarse,
                ));
            }
        }

        Ok(())
    }

    /// Fuse backbone outputs looked up by level name.
    pub fn fuse_features(&self, features: BackboneFeatures<B>) -> Result<FusedTriple<B>> {
        let [high, mid, low] = features.into_levels()?;
        self.fuse(high, mid, low)
    }

    pub fn fuse(
        &self,
        feat_high: Tensor<B, 4>,
        feat_mid: Tensor<B, 4>,
        feat_low: Tensor<B, 4>,
    ) -> Result<FusedTriple<B>> {
        let inputs = [feat_high, feat_mid, feat_low];
        self.check_inputs(&inputs)?;

        let mut slots: [Option<Tensor<B, 4>>; Node::COUNT] = Default::default();
        for (level, tensor) in ScaleLevel::ALL.into_iter().zip(inputs) {
            slots[Node::input(level).index()] = Some(tensor);
        }

        let plan = self.plan();
        for step in &STEPS {
            let mut operands = Vec::with_capacity(step.inputs.len());
            for node in step.inputs {
                let tensor = slots[node.index()].clone().ok_or_else(|| {
                    DetectError::InvalidConfig(format!("fusion node {node} read before it was produced"))
                })?;
                operands.push(tensor);
            }

            let site = site(step);
            let output = match self.operator(step.op) {
                Some(op) => {
                    let x = operands.remove(0);
                    apply_checked(op, x, &site)?
                }
                None => concat_channels(operands, plan.channels(step.output), &site)?,
            };
            log::debug!("fusion {}: {:?}", step.output, output.dims());

            slots[step.output.index()] = Some(output);
        }

        let mut take = |node: Node| {
            slots[node.index()].take().ok_or_else(|| {
                DetectError::InvalidConfig(format!("fusion node {node} was never produced"))
            })
        };

        Ok(FusedTriple {
            high: take(Node::OutHigh)?,
            mid: take(Node::OutMid)?,
            low: take(Node::OutLow)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    fn inputs(
        device: &<TestBackend as Backend>::Device,
        channels: [usize; 3],
        batch: usize,
        size: usize,
    ) -> [Tensor<TestBackend, 4>; 3] {
        [
            Tensor::random([batch, channels[0], size, size], Distribution::Default, device),
            Tensor::random([batch, channels[1], size / 2, size / 2], Distribution::Default, device),
            Tensor::random([batch, channels[2], size / 4, size / 4], Distribution::Default, device),
        ]
    }

    #[test]
    fn test_fused_shapes_match_inputs() {
        let device = Default::default();
        let config = FusionConfig::new(0.25);
        let fusion = FusionNetwork::<TestBackend>::new(&device, &config).unwrap();
        assert_eq!(fusion.in_channels(), [64, 128, 256]);

        let [high, mid, low] = inputs(&device, [64, 128, 256], 2, 16);
        let fused = fusion.fuse(high, mid, low).unwrap();

        assert_eq!(fused.dims(), [[2, 64, 16, 16], [2, 128, 8, 8], [2, 256, 4, 4]]);
    }

    #[test]
    fn test_plain_downsample_and_identity_gate() {
        let device = Default::default();
        let config = FusionConfig::new(0.125)
            .with_attention(AttentionKind::Identity)
            .with_downsample(DownsampleKind::Plain)
            .with_activation(Activation::Lrelu);
        let fusion = FusionNetwork::<TestBackend>::new(&device, &config).unwrap();

        let [high, mid, low] = inputs(&device, [32, 64, 128], 1, 8);
        let fused = fusion.fuse(high, mid, low).unwrap();

        assert_eq!(fused.dims(), [[1, 32, 8, 8], [1, 64, 4, 4], [1, 128, 2, 2]]);
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let device = Default::default();
        let fusion = FusionNetwork::<TestBackend>::new(&device, &FusionConfig::new(0.125)).unwrap();
        let [high, mid, low] = inputs(&device, [32, 64, 128], 1, 8);

        let a = fusion.fuse(high.clone(), mid.clone(), low.clone()).unwrap();
        let b = fusion.fuse(high, mid, low).unwrap();

        for (x, y) in a.into_array().into_iter().zip(b.into_array()) {
            let x: Vec<f32> = x.into_data().to_vec().unwrap();
            let y: Vec<f32> = y.into_data().to_vec().unwrap();
            assert_eq!(x, y);
        }
    }

    #[test]
    fn test_wrong_input_channels_rejected() {
        let device = Default::default();
        let fusion = FusionNetwork::<TestBackend>::new(&device, &FusionConfig::new(0.125)).unwrap();
        let [high, mid, low] = inputs(&device, [32, 48, 128], 1, 8);

        let err = fusion.fuse(high, mid, low).unwrap_err();
        match err {
            DetectError::ShapeMismatch { site, actual, .. } => {
                assert_eq!(site, "fusion input mid");
                assert_eq!(actual, vec![1, 48, 4, 4]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_spatial_ratio_rejected() {
        let device = Default::default();
        let fusion = FusionNetwork::<TestBackend>::new(&device, &FusionConfig::new(0.125)).unwrap();
        let high = Tensor::<TestBackend, 4>::zeros([1, 32, 8, 8], &device);
        let mid = Tensor::<TestBackend, 4>::zeros([1, 64, 4, 4], &device);
        let low = Tensor::<TestBackend, 4>::zeros([1, 128, 4, 4], &device);

        let err = fusion.fuse(high, mid, low).unwrap_err();
        assert!(matches!(err, DetectError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_missing_level_fails_before_fusion() {
        let device = Default::default();
        let fusion = FusionNetwork::<TestBackend>::new(&device, &FusionConfig::new(0.125)).unwrap();
        let [high, mid, _] = inputs(&device, [32, 64, 128], 1, 8);

        let mut features = BackboneFeatures::new();
        features.insert("dark3", high);
        features.insert("dark4", mid);

        let err = fusion.fuse_features(features).unwrap_err();
        assert!(matches!(err, DetectError::MissingFeatureLevel(name) if name == "dark5"));
    }

    #[test]
    fn test_feature_map_order_is_by_level() {
        let device = Default::default();
        let mut features = BackboneFeatures::<TestBackend>::new();
        // Inserted coarse-first; lookup is by name, not iteration order.
        features.insert("dark5", Tensor::zeros([1, 3, 1, 1], &device));
        features.insert("dark4", Tensor::zeros([1, 2, 2, 2], &device));
        features.insert("dark3", Tensor::zeros([1, 1, 4, 4], &device));
        features.insert("stem", Tensor::zeros([1, 9, 9, 9], &device));

        let [high, mid, low] = features.into_levels().unwrap();
        assert_eq!(high.dims(), [1, 1, 4, 4]);
        assert_eq!(mid.dims(), [1, 2, 2, 2]);
        assert_eq!(low.dims(), [1, 3, 1, 1]);
    }

    #[test]
    fn test_misaligned_base_channels_fail_construction() {
        let device = Default::default();
        let config = FusionConfig::new(1.0).with_in_channels([128, 512, 1024]);

        let err = FusionNetwork::<TestBackend>::new(&device, &config).unwrap_err();
        assert!(matches!(err, DetectError::WrongChannelConfig { .. }));
    }
}
