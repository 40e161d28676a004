//! Crop (region-of-interest) step.
//!
//! Crop zones are defined on the coordinates of the *rotated* image,
//! which is why this step sits after rotation in the standard order.
//! With no zone configured the step applies to the full image, i.e. it
//! is a no-op.

use std::any::Any;

use serde_json::Value;

use crate::frame::Frame;
use crate::step::{StepCore, Transform};
use crate::types::{PipelineError, Zone};

/// Rectangular crop (`zone: [x, y, width, height]`).
#[derive(Debug, Clone)]
pub struct Crop {
    core: StepCore,
}

impl Crop {
    /// Stable step name.
    pub const NAME: &'static str = "crop";

    /// Create an unconfigured step.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: StepCore::new(Self::NAME),
        }
    }

    /// The configured crop zone, if any.
    #[must_use]
    pub fn zone(&self) -> Option<Zone> {
        let value = self.core.value("zone")?;
        serde_json::from_value(value.clone()).ok()
    }
}

impl Default for Crop {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Crop {
    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn recognized_keys(&self) -> &'static [&'static str] {
        &["zone"]
    }

    fn validate(&self, key: &str, value: &Value) -> Result<(), PipelineError> {
        if key == "zone" && serde_json::from_value::<Zone>(value.clone()).is_err() {
            return Err(PipelineError::InvalidValue {
                step: Self::NAME.to_owned(),
                key: key.to_owned(),
                reason: "expected [x, y, width, height]".to_owned(),
            });
        }
        Ok(())
    }

    fn apply(&self, frame: &Frame) -> Result<Frame, PipelineError> {
        let Some(zone) = self.zone() else {
            return Ok(frame.clone());
        };
        let (width, height) = frame.dimensions();
        let Some(clamped) = zone.clamped(width, height) else {
            return Err(PipelineError::CropOutOfBounds {
                x: zone.x,
                y: zone.y,
                width: zone.width,
                height: zone.height,
                frame_width: width,
                frame_height: height,
            });
        };
        Ok(frame.crop(clamped))
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
    use image::{GrayImage, Luma};

    fn frame(width: u32, height: u32) -> Frame {
        Frame::Gray8(GrayImage::from_pixel(width, height, Luma([1])))
    }

    #[test]
    fn unconfigured_step_is_identity() {
        let step = Crop::new();
        let input = frame(6, 6);
        assert_eq!(step.apply(&input).unwrap(), input);
    }

    #[test]
    fn crop_reduces_dimensions() {
        let mut step = Crop::new();
        step.set("zone", serde_json::json!([1, 2, 3, 4])).unwrap();
        let out = step.apply(&frame(10, 10)).unwrap();
        assert_eq!(out.dimensions(), (3, 4));
    }

    #[test]
    fn overhanging_zone_is_clamped() {
        let mut step = Crop::new();
        step.set("zone", serde_json::json!([8, 8, 10, 10])).unwrap();
        let out = step.apply(&frame(10, 10)).unwrap();
        assert_eq!(out.dimensions(), (2, 2));
    }

    #[test]
    fn fully_outside_zone_errors() {
        let mut step = Crop::new();
        step.set("zone", serde_json::json!([20, 0, 5, 5])).unwrap();
        assert!(matches!(
            step.apply(&frame(10, 10)),
            Err(PipelineError::CropOutOfBounds { .. }),
        ));
    }

    #[test]
    fn zone_rejects_malformed_value() {
        let mut step = Crop::new();
        assert!(matches!(
            step.set("zone", serde_json::json!([1, 2, 3])),
            Err(PipelineError::InvalidValue { .. }),
        ));
    }
}
