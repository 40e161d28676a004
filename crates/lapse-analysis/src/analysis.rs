//! The analysis contract.
//!
//! An [`Analysis`] measures one transformed frame at a time and emits a
//! row of named outputs. Analyses whose per-frame results are
//! independent also expose a [`FrameJob`]: an immutable snapshot of the
//! analysis parameters that worker threads can run concurrently.
//! Analyses that carry rolling state across frames (contour tracking)
//! return no job, and the engine fails fast when parallel execution is
//! requested for them.

use std::sync::Arc;

use lapse_pipeline::Frame;
use lapse_series::ImageSeries;

use crate::error::AnalysisError;
use crate::store::Metadata;
use crate::table::Cell;

/// A per-frame measurement producing one table row.
pub trait Analysis {
    /// Stable identifier of the analysis kind (e.g. `"glevel"`).
    fn kind(&self) -> &'static str;

    /// Default basename of the persisted result files.
    fn default_basename(&self) -> &'static str;

    /// Validate configuration and derive run state before a batch or
    /// live analysis.
    ///
    /// Called with the series the analysis will read from; may read
    /// frames (e.g. to size a default zone or measure a reference
    /// frame).
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::NotConfigured`] when required
    /// parameters are missing and cannot be defaulted.
    fn initialize(&mut self, series: &ImageSeries) -> Result<(), AnalysisError>;

    /// Output column names, in declared order.
    ///
    /// Only meaningful after [`initialize`](Self::initialize).
    fn columns(&self) -> Vec<String>;

    /// Measure one transformed frame.
    ///
    /// The returned cells must match [`columns`](Self::columns) in
    /// length and order.
    ///
    /// # Errors
    ///
    /// Propagates measurement failures with frame context.
    fn analyze(&mut self, num: i64, frame: &Frame) -> Result<Vec<Cell>, AnalysisError>;

    /// An immutable parallel snapshot, or `None` when per-frame
    /// results depend on earlier frames.
    fn parallel_worker(&self) -> Option<Arc<dyn FrameJob>> {
        None
    }

    /// Serialize the analysis parameters for result metadata.
    fn parameters_to_metadata(&self) -> Metadata;

    /// Restore the analysis parameters from saved metadata.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::MissingMetadata`] when a required key
    /// is absent and [`AnalysisError::InvalidParameter`] when a value
    /// does not parse.
    fn parameters_from_metadata(&mut self, metadata: &Metadata) -> Result<(), AnalysisError>;
}

/// Immutable, thread-safe per-frame measurement.
pub trait FrameJob: Send + Sync {
    /// Measure one transformed frame.
    ///
    /// Must produce exactly the same row as the owning analysis'
    /// `analyze` for the same input.
    ///
    /// # Errors
    ///
    /// Propagates measurement failures with frame context.
    fn analyze(&self, num: i64, frame: &Frame) -> Result<Vec<Cell>, AnalysisError>;
}
