use burn::prelude::*;

use crate::error::{DetectError, Result};

/// Concatenate along the channel axis, checking that the operands agree on
/// batch and spatial size and that their channels add up to `expected`.
pub fn concat_channels<B: Backend>(
    tensors: Vec<Tensor<B, 4>>,
    expected: usize,
    site: &str,
) -> Result<Tensor<B, 4>> {
    let first = match tensors.first() {
        Some(t) => t.dims(),
        None => return Err(DetectError::channels(site, expected, 0)),
    };

    let mut total = 0;
    for t in &tensors {
        let dims = t.dims();
        if dims[0] != first[0] || dims[2] != first[2] || dims[3] != first[3] {
            return Err(DetectError::shape(
                site,
                format!("[{}, C, {}, {}]", first[0], first[2], first[3]),
                dims,
            ));
        }
        total += dims[1];
    }

    if total != expected {
        return Err(DetectError::channels(site, expected, total));
    }

    Ok(Tensor::cat(tensors, 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_concat_sums_channels() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);
        let b = Tensor::<TestBackend, 4>::ones([1, 5, 4, 4], &device);

        let out = concat_channels(vec![a, b], 8, "test").unwrap();
        assert_eq!(out.dims(), [1, 8, 4, 4]);
    }

    #[test]
    fn test_concat_rejects_spatial_mismatch() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);
        let b = Tensor::<TestBackend, 4>::zeros([1, 3, 2, 2], &device);

        let err = concat_channels(vec![a, b], 6, "test").unwrap_err();
        assert!(matches!(err, DetectError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_concat_rejects_channel_total() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);
        let b = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);

        let err = concat_channels(vec![a, b], 8, "test").unwrap_err();
        assert!(matches!(
            err,
            DetectError::WrongChannelConfig { expected: 8, actual: 6, .. }
        ));
    }
}
