//! Radiograph preprocessing: single channel, fixed square resolution,
//! intensities rescaled to the [-1024, 1024] range the classifier was
//! trained on.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Luma};
use ndarray::Array4;
use std::path::Path;

use crate::{Error, Result};

pub const INTENSITY_MIN: f32 = -1024.0;
pub const INTENSITY_MAX: f32 = 1024.0;

pub type GrayImage32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Decode an image file into a `[1, 1, resolution, resolution]` tensor
pub fn load_image(path: &Path, resolution: u32) -> Result<Array4<f32>> {
  let image = image::open(path).map_err(|e| Error::invalid_image(path, e))?;
  prepare(&image, resolution).map_err(|reason| Error::invalid_image(path, reason))
}

/// Preprocess an already decoded image
pub fn prepare(image: &DynamicImage, resolution: u32) -> std::result::Result<Array4<f32>, String> {
  if image.width() == 0 || image.height() == 0 {
    return Err("image has no pixels".to_string());
  }

  let gray = to_single_channel(image);
  let resized = imageops::resize(&gray, resolution, resolution, FilterType::Triangle);

  let mut pixels = resized.into_raw();
  if !rescale_intensity(&mut pixels) {
    return Err("image has no intensity range".to_string());
  }

  let side = resolution as usize;
  Array4::from_shape_vec((1, 1, side, side), pixels).map_err(|e| e.to_string())
}

/// Collapse colour images to one channel by averaging the colour channels
pub fn to_single_channel(image: &DynamicImage) -> GrayImage32 {
  if !image.color().has_color() {
    return image.to_luma32f();
  }

  let rgb = image.to_rgb32f();
  ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
    let [r, g, b] = rgb.get_pixel(x, y).0;
    Luma([(r + g + b) / 3.0])
  })
}

/// Min-max rescale in place to [INTENSITY_MIN, INTENSITY_MAX].
///
/// Returns false when every pixel has the same value.
pub fn rescale_intensity(pixels: &mut [f32]) -> bool {
  let (min, max) = pixels
    .iter()
    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

  let range = max - min;
  if !range.is_finite() || range <= f32::EPSILON {
    return false;
  }

  let span = INTENSITY_MAX - INTENSITY_MIN;
  for value in pixels.iter_mut() {
    *value = (*value - min) / range * span + INTENSITY_MIN;
  }
  true
}
