//! Image -> input tensor conversion for the binaries.

use std::path::Path;

use burn::prelude::*;
use image::{io::Reader as ImageReader, RgbImage};

use crate::error::{DetectError, Result};
use crate::model::ScaleLevel;

/// Gray used for letterbox padding.
const PAD_VALUE: u8 = 114;

#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    target_size: u32,
}

impl ImagePreprocessor {
    /// `target_size` must be a positive multiple of the coarsest stride.
    pub fn new(target_size: u32) -> Result<Self> {
        let stride = ScaleLevel::Low.stride() as u32;
        if target_size == 0 || target_size % stride != 0 {
            return Err(DetectError::InvalidConfig(format!(
                "img_size must be a positive multiple of {stride}, got {target_size}"
            )));
        }
        Ok(Self { target_size })
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    pub fn load<B: Backend>(&self, path: &Path, device: &B::Device) -> Result<Tensor<B, 4>> {
        let img = ImageReader::open(path)?.decode()?;

        Ok(self.to_tensor(&img.to_rgb8(), device))
    }

    /// Letterbox to a square canvas and convert to `[1, 3, S, S]` in [0, 1].
    pub fn to_tensor<B: Backend>(&self, img: &RgbImage, device: &B::Device) -> Tensor<B, 4> {
        let size = self.target_size as usize;
        let canvas = self.resize_with_padding(img);

        Tensor::from_data(TensorData::new(image_to_chw(&canvas), [1, 3, size, size]), device)
    }

    /// Resize keeping the aspect ratio, then center on a padded canvas.
    fn resize_with_padding(&self, img: &RgbImage) -> RgbImage {
        let target = self.target_size;
        let (w, h) = img.dimensions();

        let scale = target as f32 / w.max(h) as f32;
        let new_w = ((w as f32 * scale).round() as u32).clamp(1, target);
        let new_h = ((h as f32 * scale).round() as u32).clamp(1, target);

        let resized = image::imageops::resize(
            img,
            new_w,
            new_h,
            image::imageops::FilterType::Triangle,
        );

        let mut canvas = RgbImage::from_pixel(target, target, image::Rgb([PAD_VALUE; 3]));
        let offset_x = (target - new_w) / 2;
        let offset_y = (target - new_h) / 2;
        image::imageops::overlay(&mut canvas, &resized, offset_x.into(), offset_y.into());

        canvas
    }
}

/// HWC u8 -> CHW f32 scaled to [0, 1].
fn image_to_chw(img: &RgbImage) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; plane * 3];

    for (idx, pixel) in img.pixels().enumerate() {
        for channel in 0..3 {
            data[channel * plane + idx] = pixel[channel] as f32 / 255.0;
        }
    }

    data
}
