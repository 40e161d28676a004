//! Contour tracking across an image sequence.
//!
//! Follows a fixed set of reference contours from frame to frame: on
//! every frame, contours are extracted at a grey level and each tracked
//! slot picks the contour whose centroid is closest to the slot's
//! current position, then adopts that centroid as the position to look
//! for next. Output columns are `x/y/p/a` (centroid, perimeter, area)
//! per slot; a frame where no contour is found yields NaN for that
//! slot and leaves its position unchanged.
//!
//! The rolling positions make per-frame results order-dependent, so
//! this analysis reports itself as not parallelizable.

use indexmap::IndexMap;
use lapse_pipeline::Frame;
use lapse_series::ImageSeries;
use serde::{Deserialize, Serialize};

use crate::analysis::Analysis;
use crate::contour::{closest_contour, measured_contours};
use crate::error::AnalysisError;
use crate::store::Metadata;
use crate::table::Cell;

/// Saved properties of one reference contour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContourProperties {
    /// Centroid `(x, y)` at definition time.
    pub centroid: (f64, f64),
    /// Perimeter at definition time.
    pub perimeter: f64,
    /// Enclosed area at definition time.
    pub area: f64,
}

/// Contour tracking at a fixed grey level.
pub struct ContourTracking {
    level: Option<f64>,
    references: IndexMap<String, ContourProperties>,
    positions: Vec<(f64, f64)>,
}

impl ContourTracking {
    /// Create an unconfigured tracker.
    ///
    /// Configure with [`set_level`](Self::set_level) plus
    /// [`add_reference`](Self::add_reference) /
    /// [`define_from_frame`](Self::define_from_frame), or load saved
    /// metadata via
    /// [`parameters_from_metadata`](Analysis::parameters_from_metadata).
    #[must_use]
    pub fn new() -> Self {
        Self {
            level: None,
            references: IndexMap::new(),
            positions: Vec::new(),
        }
    }

    /// The contour-detection grey level.
    #[must_use]
    pub const fn level(&self) -> Option<f64> {
        self.level
    }

    /// Set the contour-detection grey level.
    pub fn set_level(&mut self, level: f64) {
        self.level = Some(level);
    }

    /// Add a reference contour by its saved properties.
    ///
    /// Saved properties are authoritative; they are never re-derived
    /// from pixel geometry.
    pub fn add_reference(&mut self, name: impl Into<String>, properties: ContourProperties) {
        self.references.insert(name.into(), properties);
    }

    /// Seed references from a frame: the `count` largest contours at
    /// the configured level, named `contour 1..`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::NotConfigured`] when no level is set
    /// or the frame has fewer than `count` contours.
    pub fn define_from_frame(
        &mut self,
        series: &ImageSeries,
        num: i64,
        count: usize,
    ) -> Result<(), AnalysisError> {
        let level = self.level.ok_or_else(|| AnalysisError::NotConfigured {
            kind: "ctrack",
            what: "grey level not set".to_owned(),
        })?;
        let frame = series.read(num)?;
        let mut contours = measured_contours(&frame, level);
        contours.sort_by(|a, b| b.area.total_cmp(&a.area));
        if contours.len() < count {
            return Err(AnalysisError::NotConfigured {
                kind: "ctrack",
                what: format!(
                    "frame {num} has {} contours at level {level}, {count} requested",
                    contours.len(),
                ),
            });
        }
        self.references.clear();
        for (index, contour) in contours.iter().take(count).enumerate() {
            self.references.insert(
                format!("contour {}", index + 1),
                ContourProperties {
                    centroid: contour.centroid,
                    perimeter: contour.perimeter,
                    area: contour.area,
                },
            );
        }
        Ok(())
    }

    /// Number of tracked contours.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.references.len()
    }
}

impl Default for ContourTracking {
    fn default() -> Self {
        Self::new()
    }
}

impl Analysis for ContourTracking {
    fn kind(&self) -> &'static str {
        "ctrack"
    }

    fn default_basename(&self) -> &'static str {
        "Img_ContourTracking"
    }

    fn initialize(&mut self, _series: &ImageSeries) -> Result<(), AnalysisError> {
        if self.level.is_none() {
            return Err(AnalysisError::NotConfigured {
                kind: "ctrack",
                what: "grey level not set".to_owned(),
            });
        }
        if self.references.is_empty() {
            return Err(AnalysisError::NotConfigured {
                kind: "ctrack",
                what: "no reference contours defined".to_owned(),
            });
        }
        // Tracking restarts from the reference centroids.
        self.positions = self
            .references
            .values()
            .map(|properties| properties.centroid)
            .collect();
        Ok(())
    }

    fn columns(&self) -> Vec<String> {
        let mut columns = Vec::with_capacity(self.references.len() * 4);
        for index in 1..=self.references.len() {
            for prefix in ["x", "y", "p", "a"] {
                columns.push(format!("{prefix}{index}"));
            }
        }
        columns
    }

    fn analyze(&mut self, num: i64, frame: &Frame) -> Result<Vec<Cell>, AnalysisError> {
        let level = self.level.ok_or_else(|| AnalysisError::NotConfigured {
            kind: "ctrack",
            what: "grey level not set".to_owned(),
        })?;
        let contours = measured_contours(frame, level);
        let mut cells = Vec::with_capacity(self.positions.len() * 4);
        for position in &mut self.positions {
            match closest_contour(&contours, *position) {
                Some(contour) => {
                    // Next frame looks near where this contour is now.
                    *position = contour.centroid;
                    cells.push(Cell::Float(contour.centroid.0));
                    cells.push(Cell::Float(contour.centroid.1));
                    cells.push(Cell::Float(contour.perimeter));
                    cells.push(Cell::Float(contour.area));
                }
                None => {
                    tracing::warn!(num, "no contour detected; recording NaN");
                    for _ in 0..4 {
                        cells.push(Cell::Float(f64::NAN));
                    }
                }
            }
        }
        Ok(cells)
    }

    fn parameters_to_metadata(&self) -> Metadata {
        let mut contours = serde_json::Map::new();
        if let Some(level) = self.level {
            contours.insert("level".to_owned(), serde_json::json!(level));
        }
        let mut properties = serde_json::Map::new();
        for (name, reference) in &self.references {
            // ContourProperties serialization cannot fail.
            if let Ok(value) = serde_json::to_value(reference) {
                properties.insert(name.clone(), value);
            }
        }
        contours.insert("properties".to_owned(), serde_json::Value::Object(properties));

        let mut metadata = Metadata::new();
        metadata.insert("contours".to_owned(), serde_json::Value::Object(contours));
        metadata
    }

    fn parameters_from_metadata(&mut self, metadata: &Metadata) -> Result<(), AnalysisError> {
        let contours = metadata
            .get("contours")
            .ok_or_else(|| AnalysisError::MissingMetadata {
                what: "key 'contours'".to_owned(),
            })?;
        let level = contours
            .get("level")
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| AnalysisError::MissingMetadata {
                what: "key 'contours.level'".to_owned(),
            })?;
        let Some(serde_json::Value::Object(properties)) = contours.get("properties") else {
            return Err(AnalysisError::MissingMetadata {
                what: "key 'contours.properties'".to_owned(),
            });
        };

        let mut references = IndexMap::new();
        for (name, value) in properties {
            let reference: ContourProperties = serde_json::from_value(value.clone())
                .map_err(|_| AnalysisError::InvalidParameter {
                    key: format!("contours.properties.{name}"),
                    reason: "expected {centroid, perimeter, area}".to_owned(),
                })?;
            references.insert(name.clone(), reference);
        }
        self.level = Some(level);
        self.references = references;
        self.positions.clear();
        Ok(())
    }
}
