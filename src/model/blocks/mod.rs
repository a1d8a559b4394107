pub mod attention;
pub mod bottleneck;
pub mod concat;
pub mod conv;
pub mod csp_layer;
pub mod downsample;
pub mod focus;
pub mod resize;
pub mod spp;
pub mod upsample;

use burn::prelude::*;

use crate::error::{DetectError, Result};

pub use attention::{AttentionGate, AttentionKind, ChannelAttention, Gate, IdentityGate};
pub use bottleneck::Bottleneck;
pub use concat::concat_channels;
pub use conv::{Activation, BaseConv, ConvBlock, DwConv};
pub use csp_layer::CspLayer;
pub use downsample::{Downsample, DownsampleKind, SwitchableConv};
pub use focus::Focus;
pub use resize::ChannelResize;
pub use spp::SppBottleneck;
pub use upsample::Upsample;

/// Shape-transforming operator with a declared channel contract.
pub trait FeatureOp<B: Backend> {
    fn apply(&self, x: Tensor<B, 4>) -> Tensor<B, 4>;

    fn in_channels(&self) -> usize;

    fn out_channels(&self) -> usize;

    fn stride(&self) -> usize {
        1
    }
}

/// Run `op` after checking that `x` carries the channel count the operator
/// was built for.
pub fn apply_checked<B: Backend, O: FeatureOp<B> + ?Sized>(
    op: &O,
    x: Tensor<B, 4>,
    site: &str,
) -> Result<Tensor<B, 4>> {
    let dims = x.dims();
    if dims[1] != op.in_channels() {
        return Err(DetectError::shape(
            site,
            format!("[N, {}, H, W]", op.in_channels()),
            dims,
        ));
    }
    Ok(op.apply(x))
}

/// Pad both spatial axes by `pad` on every side with `value`.
///
/// Padded convolutions and pools in this crate are built unpadded and go
/// through this, so maps smaller than the kernel (down to 1x1) stay valid.
pub(crate) fn pad_spatial<B: Backend>(x: Tensor<B, 4>, pad: usize, value: f32) -> Tensor<B, 4> {
    if pad == 0 {
        return x;
    }
    let [n, c, h, w] = x.dims();
    let device = x.device();

    let rows = Tensor::full([n, c, pad, w], value, &device);
    let x = Tensor::cat(vec![rows.clone(), x, rows], 2);

    let cols = Tensor::full([n, c, h + 2 * pad, pad], value, &device);
    Tensor::cat(vec![cols.clone(), x, cols], 3)
}
