//! Flicker estimation over an image sequence.
//!
//! Built on the grey-level measurement by composition: every zone value
//! is divided by the same zone's value on a fixed reference frame, and
//! a derived `ratio` column averages the per-zone ratios. The ratio
//! table is what a flicker-correction step would consume.

use std::sync::Arc;

use lapse_pipeline::Frame;
use lapse_series::ImageSeries;

use crate::analysis::{Analysis, FrameJob};
use crate::error::AnalysisError;
use crate::grey_level::{GreyLevel, Reduction, measure_zones};
use crate::store::Metadata;
use crate::table::Cell;
use crate::zones::Zones;

/// Name of the derived average-ratio column.
const RATIO_COLUMN: &str = "ratio";

/// Per-zone intensity ratios against a reference frame.
pub struct Flicker {
    levels: GreyLevel,
    reference: i64,
    reference_values: Option<Vec<f64>>,
}

impl Flicker {
    /// Create with `reference` as the normalizing frame number.
    #[must_use]
    pub fn new(reference: i64) -> Self {
        Self {
            levels: GreyLevel::new(),
            reference,
            reference_values: None,
        }
    }

    /// The configured zones.
    #[must_use]
    pub const fn zones(&self) -> &Zones {
        self.levels.zones()
    }

    /// The configured zones, mutably.
    pub const fn zones_mut(&mut self) -> &mut Zones {
        self.levels.zones_mut()
    }

    /// The reference frame number.
    #[must_use]
    pub const fn reference(&self) -> i64 {
        self.reference
    }

    fn ratios(&self, frame: &Frame) -> Result<Vec<f64>, AnalysisError> {
        let Some(reference_values) = self.reference_values.as_ref() else {
            return Err(AnalysisError::NotConfigured {
                kind: "flicker",
                what: "reference values not initialized".to_owned(),
            });
        };
        ratio_row(
            self.levels.zones(),
            self.levels.reduction(),
            reference_values,
            frame,
        )
    }
}

fn ratio_row(
    zones: &Zones,
    reduction: Reduction,
    reference_values: &[f64],
    frame: &Frame,
) -> Result<Vec<f64>, AnalysisError> {
    let cells = measure_zones(zones, reduction, frame)?;
    let mut ratios = Vec::with_capacity(cells.len());
    for (cell, reference) in cells.iter().zip(reference_values) {
        let value = cell.as_f64().unwrap_or(f64::NAN);
        ratios.push(value / reference);
    }
    Ok(ratios)
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl Analysis for Flicker {
    fn kind(&self) -> &'static str {
        "flicker"
    }

    fn default_basename(&self) -> &'static str {
        "Img_Flicker"
    }

    fn initialize(&mut self, series: &ImageSeries) -> Result<(), AnalysisError> {
        self.levels.initialize(series)?;

        // Measure the reference frame once; every analyzed frame is
        // normalized against these values.
        let frame = series.read(self.reference)?;
        let cells = measure_zones(self.levels.zones(), self.levels.reduction(), &frame)?;
        self.reference_values = Some(
            cells
                .iter()
                .map(|cell| cell.as_f64().unwrap_or(f64::NAN))
                .collect(),
        );
        Ok(())
    }

    fn columns(&self) -> Vec<String> {
        let mut columns = self.levels.columns();
        columns.push(RATIO_COLUMN.to_owned());
        columns
    }

    fn analyze(&mut self, _num: i64, frame: &Frame) -> Result<Vec<Cell>, AnalysisError> {
        let ratios = self.ratios(frame)?;
        let mut cells: Vec<Cell> = ratios.iter().map(|&r| Cell::Float(r)).collect();
        cells.push(Cell::Float(mean(&ratios)));
        Ok(cells)
    }

    fn parallel_worker(&self) -> Option<Arc<dyn FrameJob>> {
        let reference_values = self.reference_values.clone()?;
        Some(Arc::new(FlickerJob {
            zones: self.levels.zones().clone(),
            reduction: self.levels.reduction(),
            reference_values,
        }))
    }

    fn parameters_to_metadata(&self) -> Metadata {
        let mut metadata = self.levels.parameters_to_metadata();
        metadata.insert(
            "reference".to_owned(),
            serde_json::Value::Number(self.reference.into()),
        );
        metadata
    }

    fn parameters_from_metadata(&mut self, metadata: &Metadata) -> Result<(), AnalysisError> {
        self.levels.parameters_from_metadata(metadata)?;
        self.reference = metadata
            .get("reference")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| AnalysisError::MissingMetadata {
                what: "key 'reference'".to_owned(),
            })?;
        // Reference values are derived state, recomputed at initialize.
        self.reference_values = None;
        Ok(())
    }
}

struct FlickerJob {
    zones: Zones,
    reduction: Reduction,
    reference_values: Vec<f64>,
}

impl FrameJob for FlickerJob {
    fn analyze(&self, _num: i64, frame: &Frame) -> Result<Vec<Cell>, AnalysisError> {
        let ratios = ratio_row(&self.zones, self.reduction, &self.reference_values, frame)?;
        let mut cells: Vec<Cell> = ratios.iter().map(|&r| Cell::Float(r)).collect();
        cells.push(Cell::Float(mean(&ratios)));
        Ok(cells)
    }
}
