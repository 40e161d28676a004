//! Double-threshold step.
//!
//! Produces a binary mask: pixels with `vmin <= value <= vmax` become
//! 1, everything else 0. A missing bound defaults to the corresponding
//! limit of the frame's pixel range, so configuring only `vmin` gives a
//! plain lower threshold.

use std::any::Any;

use image::{GrayImage, Luma};
use serde_json::Value;

use crate::frame::Frame;
use crate::step::{StepCore, Transform};
use crate::types::PipelineError;

/// Double threshold to a binary mask (`vmin`, `vmax`).
#[derive(Debug, Clone)]
pub struct Threshold {
    core: StepCore,
}

impl Threshold {
    /// Stable step name.
    pub const NAME: &'static str = "threshold";

    /// Create an unconfigured step.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: StepCore::new(Self::NAME),
        }
    }

    /// The configured lower bound, if any.
    #[must_use]
    pub fn vmin(&self) -> Option<f64> {
        self.core.f64_param("vmin")
    }

    /// The configured upper bound, if any.
    #[must_use]
    pub fn vmax(&self) -> Option<f64> {
        self.core.f64_param("vmax")
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Threshold {
    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn recognized_keys(&self) -> &'static [&'static str] {
        &["vmin", "vmax"]
    }

    fn validate(&self, key: &str, value: &Value) -> Result<(), PipelineError> {
        if (key == "vmin" || key == "vmax") && !value.is_number() {
            return Err(PipelineError::InvalidValue {
                step: Self::NAME.to_owned(),
                key: key.to_owned(),
                reason: "expected a number".to_owned(),
            });
        }
        Ok(())
    }

    fn apply(&self, frame: &Frame) -> Result<Frame, PipelineError> {
        if self.is_empty() {
            return Ok(frame.clone());
        }
        let (range_min, range_max) = frame.pixel_range();
        let vmin = self.vmin().unwrap_or(range_min);
        let vmax = self.vmax().unwrap_or(range_max);

        let gray = frame.to_gray_f32();
        let (width, height) = gray.dimensions();
        let mask = GrayImage::from_fn(width, height, |x, y| {
            let v = f64::from(gray.get_pixel(x, y).0[0]);
            Luma([u8::from(v >= vmin && v <= vmax)])
        });
        Ok(Frame::Mask(mask))
    }

    fn boxed_clone(&self) -> Box<dyn Transform> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::frame::FrameKind;

    fn ramp() -> Frame {
        // 1x5 frame with values 10, 20, 30, 40, 50.
        let img = GrayImage::from_fn(5, 1, |x, _| Luma([10 * (u8::try_from(x).unwrap() + 1)]));
        Frame::Gray8(img)
    }

    #[test]
    fn unconfigured_step_is_identity() {
        let step = Threshold::new();
        let frame = ramp();
        assert_eq!(step.apply(&frame).unwrap(), frame);
    }

    #[test]
    fn band_threshold_selects_interior() {
        let mut step = Threshold::new();
        step.set("vmin", serde_json::json!(20)).unwrap();
        step.set("vmax", serde_json::json!(40)).unwrap();

        let out = step.apply(&ramp()).unwrap();
        assert_eq!(out.kind(), FrameKind::Mask);
        let Frame::Mask(mask) = out else {
            unreachable!()
        };
        let values: Vec<u8> = mask.as_raw().clone();
        assert_eq!(values, vec![0, 1, 1, 1, 0]);
    }

    #[test]
    fn missing_vmax_defaults_to_range_limit() {
        let mut step = Threshold::new();
        step.set("vmin", serde_json::json!(30)).unwrap();

        let Frame::Mask(mask) = step.apply(&ramp()).unwrap() else {
            unreachable!()
        };
        assert_eq!(mask.as_raw().clone(), vec![0, 0, 1, 1, 1]);
    }

    #[test]
    fn rejects_non_numeric_bound() {
        let mut step = Threshold::new();
        assert!(matches!(
            step.set("vmin", serde_json::json!(true)),
            Err(PipelineError::InvalidValue { .. }),
        ));
    }
}
