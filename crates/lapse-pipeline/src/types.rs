//! Shared types for the lapse transform pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Parameter payload of a transform step.
///
/// Keys are parameter names, values are JSON scalars or short numeric
/// sequences. A `BTreeMap` keeps iteration order deterministic, which
/// the pipeline [fingerprint](crate::TransformPipeline::fingerprint)
/// relies on.
pub type ParamMap = BTreeMap<String, serde_json::Value>;

/// A rectangular zone in image coordinates.
///
/// Serialized as a `[x, y, width, height]` sequence so saved
/// configurations stay compact and readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    /// Horizontal offset of the left edge, in pixels.
    pub x: u32,
    /// Vertical offset of the top edge, in pixels.
    pub y: u32,
    /// Zone width in pixels.
    pub width: u32,
    /// Zone height in pixels.
    pub height: u32,
}

impl Zone {
    /// Create a new zone.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The zone covering a whole `width` x `height` image.
    #[must_use]
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Intersect the zone with the bounds of a `width` x `height` image.
    ///
    /// Returns `None` when the intersection is empty.
    #[must_use]
    pub fn clamped(self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self {
            x: self.x,
            y: self.y,
            width: w,
            height: h,
        })
    }
}

impl Serialize for Zone {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.x, self.y, self.width, self.height).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Zone {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (x, y, width, height) = <(u32, u32, u32, u32)>::deserialize(deserializer)?;
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }
}

/// Errors raised by transform steps, the registry, and the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A parameter key is not among a step's recognized names.
    #[error("step '{step}' does not recognize parameter '{key}'")]
    InvalidParameter {
        /// Name of the step that rejected the key.
        step: String,
        /// The unrecognized key.
        key: String,
    },

    /// A parameter value is outside its recognized domain.
    #[error("invalid value for parameter '{key}' of step '{step}': {reason}")]
    InvalidValue {
        /// Name of the step that rejected the value.
        step: String,
        /// The parameter key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A saved configuration references a step type that is not in the
    /// registry. Never silently skipped.
    #[error("saved pipeline references unknown step type '{name}'")]
    UnknownStepType {
        /// The unregistered step name.
        name: String,
    },

    /// A step type with the same name is already registered.
    #[error("step type '{name}' is already registered")]
    DuplicateStepType {
        /// The conflicting step name.
        name: String,
    },

    /// A crop zone lies entirely outside the frame.
    #[error("crop zone ({x}, {y}, {width}, {height}) lies outside the {frame_width}x{frame_height} frame")]
    CropOutOfBounds {
        /// Zone left edge.
        x: u32,
        /// Zone top edge.
        y: u32,
        /// Zone width.
        width: u32,
        /// Zone height.
        height: u32,
        /// Frame width.
        frame_width: u32,
        /// Frame height.
        frame_height: u32,
    },

    /// Subtraction was applied before its reference image was
    /// materialized by the owning series.
    #[error("subtraction reference image for frames {frames:?} has not been materialized")]
    MissingReference {
        /// The configured reference frame numbers.
        frames: Vec<i64>,
    },

    /// Subtraction reference and input frame have different sizes.
    #[error(
        "subtraction reference is {reference_width}x{reference_height} \
         but the frame is {frame_width}x{frame_height}"
    )]
    ReferenceSizeMismatch {
        /// Reference image width.
        reference_width: u32,
        /// Reference image height.
        reference_height: u32,
        /// Input frame width.
        frame_width: u32,
        /// Input frame height.
        frame_height: u32,
    },

    /// Failed to read or write a configuration file.
    #[error("pipeline configuration I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file is not valid JSON.
    #[error("pipeline configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
