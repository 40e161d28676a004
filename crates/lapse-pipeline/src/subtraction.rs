//! Background subtraction step.
//!
//! Subtracts a reference image from every frame. The reference is the
//! mean of one or more frames of the same series (`reference: [nums]`),
//! transformed by the pipeline steps *before* this one so that both
//! operands live in the same geometry. With `relative: true` the output
//! is `img / ref - 1` instead of `img - ref`.
//!
//! The reference image is derived state: the owning series materializes
//! it before a run (see `lapse-series`), tagging it with the fingerprint
//! of the pipeline prefix it was computed under. Any payload mutation
//! drops the materialized image so a stale reference can never be
//! applied.

use std::any::Any;

use image::Luma;
use serde_json::Value;

use crate::frame::{Frame, Gray32FImage};
use crate::step::{StepCore, Transform};
use crate::types::PipelineError;

/// A materialized subtraction reference.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    /// Fingerprint of the pipeline prefix (steps before subtraction)
    /// the reference was computed under.
    pub prefix_fingerprint: u64,
    /// The mean reference image.
    pub image: Gray32FImage,
}

/// Background subtraction (`reference: [nums…]`, `relative: bool`).
#[derive(Debug, Clone)]
pub struct Subtraction {
    core: StepCore,
    reference: Option<ReferenceImage>,
}

impl Subtraction {
    /// Stable step name.
    pub const NAME: &'static str = "subtraction";

    /// Create an unconfigured step.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: StepCore::new(Self::NAME),
            reference: None,
        }
    }

    /// The configured reference frame numbers.
    #[must_use]
    pub fn reference_frames(&self) -> Vec<i64> {
        self.core.int_list_param("reference").unwrap_or_default()
    }

    /// Whether the subtraction is relative (`img / ref - 1`).
    #[must_use]
    pub fn relative(&self) -> bool {
        self.core.bool_param("relative").unwrap_or(false)
    }

    /// Install the materialized reference image.
    pub fn set_reference_image(&mut self, prefix_fingerprint: u64, image: Gray32FImage) {
        self.reference = Some(ReferenceImage {
            prefix_fingerprint,
            image,
        });
    }

    /// Whether a reference computed under `prefix_fingerprint` is
    /// already materialized.
    #[must_use]
    pub fn has_reference_for(&self, prefix_fingerprint: u64) -> bool {
        self.reference
            .as_ref()
            .is_some_and(|r| r.prefix_fingerprint == prefix_fingerprint)
    }
}

impl Default for Subtraction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Subtraction {
    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn recognized_keys(&self) -> &'static [&'static str] {
        &["reference", "relative"]
    }

    fn validate(&self, key: &str, value: &Value) -> Result<(), PipelineError> {
        match key {
            "reference"
                if !value
                    .as_array()
                    .is_some_and(|list| list.iter().all(Value::is_i64)) =>
            {
                Err(PipelineError::InvalidValue {
                    step: Self::NAME.to_owned(),
                    key: key.to_owned(),
                    reason: "expected a list of frame numbers".to_owned(),
                })
            }
            "relative" if !value.is_boolean() => Err(PipelineError::InvalidValue {
                step: Self::NAME.to_owned(),
                key: key.to_owned(),
                reason: "expected a boolean".to_owned(),
            }),
            _ => Ok(()),
        }
    }

    fn on_data_changed(&mut self) {
        self.reference = None;
    }

    fn apply(&self, frame: &Frame) -> Result<Frame, PipelineError> {
        let frames = self.reference_frames();
        if frames.is_empty() {
            return Ok(frame.clone());
        }
        let Some(reference) = self.reference.as_ref() else {
            return Err(PipelineError::MissingReference { frames });
        };

        let input = frame.to_gray_f32();
        let (frame_width, frame_height) = input.dimensions();
        let (reference_width, reference_height) = reference.image.dimensions();
        if (frame_width, frame_height) != (reference_width, reference_height) {
            return Err(PipelineError::ReferenceSizeMismatch {
                reference_width,
                reference_height,
                frame_width,
                frame_height,
            });
        }

        let relative = self.relative();
        let out = Gray32FImage::from_fn(frame_width, frame_height, |x, y| {
            let v = input.get_pixel(x, y).0[0];
            let r = reference.image.get_pixel(x, y).0[0];
            if relative { Luma([v / r - 1.0]) } else { Luma([v - r]) }
        });
        Ok(Frame::GrayF32(out))
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
