//! Color-to-grayscale conversion step.
//!
//! First step of the standard order: every downstream step then sees a
//! single-channel frame. Controlled by a single `active` flag rather
//! than being keyed on payload presence, so a saved configuration can
//! record "explicitly off" distinctly from "never configured".

use std::any::Any;

use serde_json::Value;

use crate::frame::Frame;
use crate::step::{StepCore, Transform};
use crate::types::PipelineError;

/// RGB → grayscale conversion (`active: bool`).
#[derive(Debug, Clone)]
pub struct Grayscale {
    core: StepCore,
}

impl Grayscale {
    /// Stable step name.
    pub const NAME: &'static str = "grayscale";

    /// Create an unconfigured step.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: StepCore::new(Self::NAME),
        }
    }

    /// Whether conversion is switched on.
    #[must_use]
    pub fn active(&self) -> bool {
        self.core.bool_param("active").unwrap_or(false)
    }
}

impl Default for Grayscale {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Grayscale {
    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn recognized_keys(&self) -> &'static [&'static str] {
        &["active"]
    }

    fn validate(&self, key: &str, value: &Value) -> Result<(), PipelineError> {
        if key == "active" && !value.is_boolean() {
            return Err(PipelineError::InvalidValue {
                step: Self::NAME.to_owned(),
                key: key.to_owned(),
                reason: "expected a boolean".to_owned(),
            });
        }
        Ok(())
    }

    fn apply(&self, frame: &Frame) -> Result<Frame, PipelineError> {
        if !self.active() {
            return Ok(frame.clone());
        }
        match frame {
            Frame::Rgb8(img) => Ok(Frame::Gray8(image::imageops::grayscale(img))),
            // Already single-channel.
            other => Ok(other.clone()),
        }
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
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn inactive_step_is_identity() {
        let step = Grayscale::new();
        let frame = Frame::Rgb8(RgbImage::from_pixel(2, 2, Rgb([10, 20, 30])));
        let out = step.apply(&frame).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn active_step_narrows_color_frames() {
        let mut step = Grayscale::new();
        step.set("active", serde_json::json!(true)).unwrap();
        let frame = Frame::Rgb8(RgbImage::from_pixel(2, 2, Rgb([50, 50, 50])));
        let out = step.apply(&frame).unwrap();
        assert!(matches!(out, Frame::Gray8(_)));
        assert_eq!(out.dimensions(), (2, 2));
    }

    #[test]
    fn active_step_passes_gray_frames_through() {
        let mut step = Grayscale::new();
        step.set("active", serde_json::json!(true)).unwrap();
        let frame = Frame::Gray8(GrayImage::from_pixel(3, 3, Luma([77])));
        assert_eq!(step.apply(&frame).unwrap(), frame);
    }

    #[test]
    fn active_rejects_non_boolean() {
        let mut step = Grayscale::new();
        assert!(matches!(
            step.set("active", serde_json::json!(1)),
            Err(PipelineError::InvalidValue { .. }),
        ));
    }
}
