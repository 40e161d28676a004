//! Smoothing filter step.
//!
//! Currently a single filter family: gaussian smoothing with a
//! configurable standard deviation (`size`, in pixels). The `type` key
//! is recorded in the payload so saved configurations stay explicit
//! about the filter family they were produced with.

use std::any::Any;

use imageproc::filter::gaussian_blur_f32;
use serde_json::Value;

use crate::frame::Frame;
use crate::step::{StepCore, Transform};
use crate::types::PipelineError;

/// Gaussian smoothing (`type: "gaussian"`, `size: sigma`).
#[derive(Debug, Clone)]
pub struct Filter {
    core: StepCore,
}

impl Filter {
    /// Stable step name.
    pub const NAME: &'static str = "filter";

    /// Create an unconfigured step.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: StepCore::new(Self::NAME),
        }
    }

    /// The gaussian standard deviation, if configured.
    #[must_use]
    pub fn size(&self) -> Option<f64> {
        self.core.f64_param("size")
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Filter {
    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn recognized_keys(&self) -> &'static [&'static str] {
        &["type", "size"]
    }

    fn validate(&self, key: &str, value: &Value) -> Result<(), PipelineError> {
        match key {
            "type" if value.as_str() != Some("gaussian") => Err(PipelineError::InvalidValue {
                step: Self::NAME.to_owned(),
                key: key.to_owned(),
                reason: "the only supported filter type is \"gaussian\"".to_owned(),
            }),
            "size" if value.as_f64().is_none_or(|v| v < 0.0) => Err(PipelineError::InvalidValue {
                step: Self::NAME.to_owned(),
                key: key.to_owned(),
                reason: "expected a non-negative number (pixels)".to_owned(),
            }),
            _ => Ok(()),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn apply(&self, frame: &Frame) -> Result<Frame, PipelineError> {
        let Some(size) = self.size() else {
            return Ok(frame.clone());
        };
        if size <= 0.0 {
            return Ok(frame.clone());
        }
        let sigma = size as f32;
        let filtered = match frame {
            Frame::Rgb8(img) => Frame::Rgb8(gaussian_blur_f32(img, sigma)),
            Frame::Gray8(img) => Frame::Gray8(gaussian_blur_f32(img, sigma)),
            Frame::GrayF32(img) => Frame::GrayF32(gaussian_blur_f32(img, sigma)),
            // Smoothing a binary frame produces fractional values.
            Frame::Mask(_) => Frame::GrayF32(gaussian_blur_f32(&frame.to_gray_f32(), sigma)),
        };
        Ok(filtered)
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
