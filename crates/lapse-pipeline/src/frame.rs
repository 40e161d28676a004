//! The `Frame` pixel container shared by every pipeline stage.
//!
//! A frame is a single image of the sequence in one of the pixel layouts
//! the transform steps produce or consume. Steps narrow or widen the
//! layout as part of their documented purpose (grayscale conversion
//! drops color channels, subtraction widens to floating point,
//! thresholding produces a binary mask); every other step preserves the
//! layout it was given.

use image::{GrayImage, ImageBuffer, Luma, RgbImage};

use crate::types::Zone;

/// Single-channel floating-point image buffer.
///
/// Used for subtraction output, where pixel differences can be negative
/// or fractional.
pub type Gray32FImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Pixel layout of a [`Frame`], for diagnostics and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// 8-bit three-channel color.
    Rgb8,
    /// 8-bit single channel.
    Gray8,
    /// 32-bit floating-point single channel.
    GrayF32,
    /// Binary mask, stored as 0/1 bytes.
    Mask,
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Rgb8 => "rgb8",
            Self::Gray8 => "gray8",
            Self::GrayF32 => "gray-f32",
            Self::Mask => "mask",
        };
        f.write_str(name)
    }
}

/// A single image of the sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// 8-bit color frame.
    Rgb8(RgbImage),
    /// 8-bit grayscale frame.
    Gray8(GrayImage),
    /// Floating-point grayscale frame (e.g. after background
    /// subtraction).
    GrayF32(Gray32FImage),
    /// Binary frame (e.g. after thresholding); pixel values are 0 or 1.
    Mask(GrayImage),
}

impl Frame {
    /// Frame dimensions as `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Rgb8(img) => img.dimensions(),
            Self::Gray8(img) | Self::Mask(img) => img.dimensions(),
            Self::GrayF32(img) => img.dimensions(),
        }
    }

    /// The frame's pixel layout.
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        match self {
            Self::Rgb8(_) => FrameKind::Rgb8,
            Self::Gray8(_) => FrameKind::Gray8,
            Self::GrayF32(_) => FrameKind::GrayF32,
            Self::Mask(_) => FrameKind::Mask,
        }
    }

    /// The nominal pixel value range for this layout.
    ///
    /// Integer layouts report their full representable range; a mask is
    /// 0..=1. Floating-point frames report the min/max of their finite
    /// values, since floats carry no intrinsic scale.
    #[must_use]
    pub fn pixel_range(&self) -> (f64, f64) {
        match self {
            Self::Rgb8(_) | Self::Gray8(_) => (0.0, 255.0),
            Self::Mask(_) => (0.0, 1.0),
            Self::GrayF32(img) => {
                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                for value in img.as_raw() {
                    let v = f64::from(*value);
                    if v.is_finite() {
                        min = min.min(v);
                        max = max.max(v);
                    }
                }
                if min > max {
                    (0.0, 0.0)
                } else {
                    (min, max)
                }
            }
        }
    }

    /// Convert to a single-channel floating-point image.
    ///
    /// Color frames are converted through the standard luminance
    /// weighting of the `image` crate; integer values keep their native
    /// 0..=255 scale.
    #[must_use]
    pub fn to_gray_f32(&self) -> Gray32FImage {
        match self {
            Self::Rgb8(img) => {
                let gray = image::imageops::grayscale(img);
                gray_u8_to_f32(&gray)
            }
            Self::Gray8(img) | Self::Mask(img) => gray_u8_to_f32(img),
            Self::GrayF32(img) => img.clone(),
        }
    }

    /// Crop the frame to `zone`, which must lie within the frame bounds.
    #[must_use]
    pub fn crop(&self, zone: Zone) -> Self {
        match self {
            Self::Rgb8(img) => Self::Rgb8(
                image::imageops::crop_imm(img, zone.x, zone.y, zone.width, zone.height)
                    .to_image(),
            ),
            Self::Gray8(img) => Self::Gray8(
                image::imageops::crop_imm(img, zone.x, zone.y, zone.width, zone.height)
                    .to_image(),
            ),
            Self::GrayF32(img) => Self::GrayF32(
                image::imageops::crop_imm(img, zone.x, zone.y, zone.width, zone.height)
                    .to_image(),
            ),
            Self::Mask(img) => Self::Mask(
                image::imageops::crop_imm(img, zone.x, zone.y, zone.width, zone.height)
                    .to_image(),
            ),
        }
    }

    /// All pixel samples as `f64`, channel values flattened.
    ///
    /// This mirrors element-wise statistics over the raw array: for a
    /// color frame every channel contributes a sample.
    #[must_use]
    pub fn samples(&self) -> Vec<f64> {
        match self {
            Self::Rgb8(img) => img.as_raw().iter().map(|v| f64::from(*v)).collect(),
            Self::Gray8(img) | Self::Mask(img) => {
                img.as_raw().iter().map(|v| f64::from(*v)).collect()
            }
            Self::GrayF32(img) => img.as_raw().iter().map(|v| f64::from(*v)).collect(),
        }
    }

    /// Mean over all pixel samples. Returns 0.0 for an empty frame.
    #[must_use]
    pub fn mean(&self) -> f64 {
        let samples = self.samples();
        if samples.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = samples.len() as f64;
        samples.iter().sum::<f64>() / count
    }
}

fn gray_u8_to_f32(img: &GrayImage) -> Gray32FImage {
    Gray32FImage::from_fn(img.width(), img.height(), |x, y| {
        Luma([f32::from(img.get_pixel(x, y).0[0])])
    })
}
