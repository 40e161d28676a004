//! Rotation step.
//!
//! Rotates every frame by a fixed angle about the image center.
//! Positive angles rotate counter-clockwise, the convention used by the
//! interactive line-drawing definer that produces them.

use std::any::Any;

use image::{Luma, Rgb};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use serde_json::Value;

use crate::frame::Frame;
use crate::step::{StepCore, Transform};
use crate::types::PipelineError;

/// Rotation about the frame center (`angle` in degrees).
#[derive(Debug, Clone)]
pub struct Rotation {
    core: StepCore,
}

impl Rotation {
    /// Stable step name.
    pub const NAME: &'static str = "rotation";

    /// Create an unconfigured step.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: StepCore::new(Self::NAME),
        }
    }

    /// The configured angle in degrees, if any.
    #[must_use]
    pub fn angle(&self) -> Option<f64> {
        self.core.f64_param("angle")
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Rotation {
    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn recognized_keys(&self) -> &'static [&'static str] {
        &["angle"]
    }

    fn validate(&self, key: &str, value: &Value) -> Result<(), PipelineError> {
        if key == "angle" && !value.is_number() {
            return Err(PipelineError::InvalidValue {
                step: Self::NAME.to_owned(),
                key: key.to_owned(),
                reason: "expected a number (degrees)".to_owned(),
            });
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn apply(&self, frame: &Frame) -> Result<Frame, PipelineError> {
        let Some(angle) = self.angle() else {
            return Ok(frame.clone());
        };
        if angle.abs() < f64::EPSILON {
            return Ok(frame.clone());
        }
        // rotate_about_center is clockwise for positive theta.
        let theta = (-angle.to_radians()) as f32;
        let rotated = match frame {
            Frame::Rgb8(img) => Frame::Rgb8(rotate_about_center(
                img,
                theta,
                Interpolation::Bilinear,
                Rgb([0, 0, 0]),
            )),
            Frame::Gray8(img) => Frame::Gray8(rotate_about_center(
                img,
                theta,
                Interpolation::Bilinear,
                Luma([0]),
            )),
            Frame::GrayF32(img) => Frame::GrayF32(rotate_about_center(
                img,
                theta,
                Interpolation::Bilinear,
                Luma([0.0]),
            )),
            // Binary frames must stay binary: nearest-neighbor only.
            Frame::Mask(img) => Frame::Mask(rotate_about_center(
                img,
                theta,
                Interpolation::Nearest,
                Luma([0]),
            )),
        };
        Ok(rotated)
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
