//! Average grey level per zone over an image sequence.
//!
//! The workhorse analysis: for every frame, reduce the pixel values of
//! each named zone to one number (mean by default). Per-frame results
//! are independent, so the analysis is parallelizable.

use std::sync::Arc;

use lapse_pipeline::{Frame, Zone};
use lapse_series::ImageSeries;
use serde::{Deserialize, Serialize};

use crate::analysis::{Analysis, FrameJob};
use crate::error::AnalysisError;
use crate::store::Metadata;
use crate::table::Cell;
use crate::zones::Zones;

/// How zone pixels are reduced to a single value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// Arithmetic mean (the default).
    #[default]
    Mean,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Median (mean of the two middle samples for even counts).
    Median,
}

impl Reduction {
    /// Reduce a sample set. Empty input reduces to NaN.
    #[must_use]
    pub fn apply(self, samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return f64::NAN;
        }
        #[allow(clippy::cast_precision_loss)]
        match self {
            Self::Mean => samples.iter().sum::<f64>() / samples.len() as f64,
            Self::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Median => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 1 {
                    sorted[mid]
                } else {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                }
            }
        }
    }

    /// Stable name used in metadata.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
        }
    }
}

/// Reduce each zone of `frame` to one cell.
pub(crate) fn measure_zones(
    zones: &Zones,
    reduction: Reduction,
    frame: &Frame,
) -> Result<Vec<Cell>, AnalysisError> {
    let (width, height) = frame.dimensions();
    let mut cells = Vec::with_capacity(zones.len());
    for (name, zone) in zones.iter() {
        let Some(clamped) = zone.clamped(width, height) else {
            return Err(AnalysisError::InvalidParameter {
                key: format!("zones.{name}"),
                reason: format!("zone lies outside the {width}x{height} frame"),
            });
        };
        let samples = frame.crop(clamped).samples();
        cells.push(Cell::Float(reduction.apply(&samples)));
    }
    Ok(cells)
}

/// Mean grey level per named zone.
pub struct GreyLevel {
    zones: Zones,
    reduction: Reduction,
}

impl GreyLevel {
    /// Create with no zones and mean reduction.
    ///
    /// Without explicit zones, [`initialize`](Analysis::initialize)
    /// falls back to a single zone covering the whole image.
    #[must_use]
    pub fn new() -> Self {
        Self {
            zones: Zones::new(),
            reduction: Reduction::Mean,
        }
    }

    /// Create with an explicit reduction function.
    #[must_use]
    pub fn with_reduction(reduction: Reduction) -> Self {
        Self {
            zones: Zones::new(),
            reduction,
        }
    }

    /// The configured zones.
    #[must_use]
    pub const fn zones(&self) -> &Zones {
        &self.zones
    }

    /// The configured zones, mutably.
    pub const fn zones_mut(&mut self) -> &mut Zones {
        &mut self.zones
    }

    /// The reduction in use.
    #[must_use]
    pub const fn reduction(&self) -> Reduction {
        self.reduction
    }

    pub(crate) fn snapshot(&self) -> GreyLevelJob {
        GreyLevelJob {
            zones: self.zones.clone(),
            reduction: self.reduction,
        }
    }
}

impl Default for GreyLevel {
    fn default() -> Self {
        Self::new()
    }
}

impl Analysis for GreyLevel {
    fn kind(&self) -> &'static str {
        "glevel"
    }

    fn default_basename(&self) -> &'static str {
        "Img_GreyLevel"
    }

    fn initialize(&mut self, series: &ImageSeries) -> Result<(), AnalysisError> {
        if self.zones.is_empty() {
            let (width, height) = series.read(0)?.dimensions();
            tracing::warn!("no zones defined; taking full image as default");
            self.zones.insert("zone 1", Zone::full(width, height));
        }
        Ok(())
    }

    fn columns(&self) -> Vec<String> {
        self.zones.names()
    }

    fn analyze(&mut self, _num: i64, frame: &Frame) -> Result<Vec<Cell>, AnalysisError> {
        measure_zones(&self.zones, self.reduction, frame)
    }

    fn parallel_worker(&self) -> Option<Arc<dyn FrameJob>> {
        Some(Arc::new(self.snapshot()))
    }

    fn parameters_to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("zones".to_owned(), self.zones.to_value());
        metadata.insert(
            "function".to_owned(),
            serde_json::Value::String(self.reduction.name().to_owned()),
        );
        metadata
    }

    fn parameters_from_metadata(&mut self, metadata: &Metadata) -> Result<(), AnalysisError> {
        let zones = metadata
            .get("zones")
            .ok_or_else(|| AnalysisError::MissingMetadata {
                what: "key 'zones'".to_owned(),
            })?;
        self.zones = Zones::from_value(zones)?;
        if let Some(function) = metadata.get("function") {
            self.reduction = serde_json::from_value(function.clone()).map_err(|_| {
                AnalysisError::InvalidParameter {
                    key: "function".to_owned(),
                    reason: format!("unknown reduction {function}"),
                }
            })?;
        }
        Ok(())
    }
}

/// Immutable snapshot of a [`GreyLevel`] configuration.
pub(crate) struct GreyLevelJob {
    zones: Zones,
    reduction: Reduction,
}

impl FrameJob for GreyLevelJob {
    fn analyze(&self, _num: i64, frame: &Frame) -> Result<Vec<Cell>, AnalysisError> {
        measure_zones(&self.zones, self.reduction, frame)
    }
}
