//! The analysis engine: batch runs, live preview, persistence, and
//! regeneration.
//!
//! An [`Engine`] owns an [`ImageSeries`], one [`Analysis`], and a
//! [`ResultStore`]. Its lifecycle:
//!
//! ```text
//! Unconfigured -> Configured -> Run -> (re-Run, Save, Load)
//!        \
//!         -> Regenerated        (from saved metadata only)
//! ```
//!
//! `run` fills the result table; `analyze_live` previews one frame
//! without touching it; `regenerate` rebuilds the *ability to
//! recompute* — pipeline configuration plus analysis parameters — from
//! saved metadata, leaving the table empty until an explicit `load` or
//! `run`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use lapse_pipeline::PipelineRecord;
use lapse_series::{FrameSource, ImageSeries};

use crate::analysis::{Analysis, FrameJob};
use crate::error::AnalysisError;
use crate::store::{Metadata, PROVENANCE_KEY, ResultStore, TRANSFORMS_KEY};
use crate::table::{Cell, DataTable};

/// Reserved column holding the frame acquisition time (Unix seconds).
pub const TIME_COLUMN: &str = "time (unix)";

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No parameters defined or loaded yet.
    Unconfigured,
    /// Parameters defined or loaded; nothing computed.
    Configured,
    /// The result table has been populated by `run` or `load`.
    Run,
    /// Recompute capability restored from saved metadata; the result
    /// table is empty.
    Regenerated,
}

/// Frame range and execution mode of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSpec {
    /// First frame number (inclusive).
    pub start: i64,
    /// End frame number (exclusive); `None` runs to the end.
    pub end: Option<i64>,
    /// Step between frames; must be positive.
    pub skip: i64,
    /// Fan frame computations out across worker threads.
    pub parallel: bool,
}

impl Default for RunSpec {
    fn default() -> Self {
        Self {
            start: 0,
            end: None,
            skip: 1,
            parallel: false,
        }
    }
}

impl RunSpec {
    /// A serial run over every frame.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A parallel run over every frame.
    #[must_use]
    pub fn all_parallel() -> Self {
        Self {
            parallel: true,
            ..Self::default()
        }
    }
}

/// Orchestrates per-frame analysis over a series.
pub struct Engine<A: Analysis> {
    series: ImageSeries,
    analysis: A,
    results: ResultStore,
    state: EngineState,
    initialized: bool,
}

impl<A: Analysis> Engine<A> {
    /// Create an engine over `series` running `analysis`.
    #[must_use]
    pub fn new(series: ImageSeries, analysis: A) -> Self {
        Self {
            series,
            analysis,
            results: ResultStore::new(),
            state: EngineState::Unconfigured,
            initialized: false,
        }
    }

    /// The owned series.
    #[must_use]
    pub const fn series(&self) -> &ImageSeries {
        &self.series
    }

    /// The owned series, mutably (pipeline configuration lives here).
    pub const fn series_mut(&mut self) -> &mut ImageSeries {
        &mut self.series
    }

    /// The analysis.
    #[must_use]
    pub const fn analysis(&self) -> &A {
        &self.analysis
    }

    /// The analysis, mutably (parameters live here).
    pub const fn analysis_mut(&mut self) -> &mut A {
        &mut self.analysis
    }

    /// The results accumulated so far.
    #[must_use]
    pub const fn results(&self) -> &ResultStore {
        &self.results
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Run the analysis over the frames selected by `spec`.
    ///
    /// Serial runs commit one row per frame as it is computed, in
    /// increasing frame order; an error aborts the remainder but keeps
    /// the rows committed so far. Parallel runs dispatch one task per
    /// frame to worker threads holding immutable snapshots and merge
    /// all-or-nothing, sorted by frame number.
    ///
    /// Re-running overwrites rows only for the frames in `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidParameter`] for a non-positive
    /// skip, [`AnalysisError::UnsupportedMode`] when `parallel` is
    /// requested for a non-parallelizable analysis, and propagates the
    /// first per-frame failure.
    pub fn run(&mut self, spec: &RunSpec) -> Result<(), AnalysisError> {
        let frames = self.frames_for(spec)?;
        self.series.prepare()?;
        // Re-derive run state every batch: a changed reference frame or
        // a newly defaulted zone must be picked up here, not stale.
        self.analysis.initialize(&self.series)?;
        self.initialized = true;
        if self.state == EngineState::Unconfigured {
            self.state = EngineState::Configured;
        }

        let columns = self.full_columns();
        if self.results.data.columns() != columns {
            if !self.results.data.is_empty() {
                tracing::warn!("output columns changed; discarding previous rows");
            }
            self.results.data = DataTable::new(columns);
        }

        tracing::info!(
            kind = self.analysis.kind(),
            frames = frames.len(),
            parallel = spec.parallel,
            "starting analysis run"
        );
        if spec.parallel {
            self.run_parallel(&frames)?;
        } else {
            for &num in &frames {
                let frame = self.series.read(num)?;
                let row = self.analysis.analyze(num, &frame)?;
                let mut cells = vec![Cell::from(self.series.approximate_time(num))];
                cells.extend(row);
                self.results.data.insert_row(num, cells)?;
                tracing::debug!(num, "frame analyzed");
            }
        }

        self.refresh_metadata();
        self.state = EngineState::Run;
        Ok(())
    }

    /// Compute one frame's outputs without touching the result table.
    ///
    /// Used for interactive preview and for single-frame recomputation
    /// after [`regenerate`](Self::regenerate). Transfer previewed rows
    /// into the results explicitly with
    /// [`commit_rows`](Self::commit_rows).
    ///
    /// # Errors
    ///
    /// Propagates read, transform, and measurement failures.
    pub fn analyze_live(&mut self, num: i64) -> Result<Vec<Cell>, AnalysisError> {
        self.prepare()?;
        let frame = self.series.read(num)?;
        self.analysis.analyze(num, &frame)
    }

    /// Transfer previously previewed rows into the result table.
    ///
    /// Each row is the output of [`analyze_live`](Self::analyze_live)
    /// for its frame number; the reserved time column is filled here.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::RowShape`] for rows that do not match
    /// the declared columns.
    pub fn commit_rows(
        &mut self,
        rows: impl IntoIterator<Item = (i64, Vec<Cell>)>,
    ) -> Result<(), AnalysisError> {
        let columns = self.full_columns();
        if self.results.data.columns() != columns {
            self.results.data = DataTable::new(columns);
        }
        for (num, row) in rows {
            let mut cells = vec![Cell::from(self.series.approximate_time(num))];
            cells.extend(row);
            self.results.data.insert_row(num, cells)?;
        }
        Ok(())
    }

    /// Persist the result table and its metadata under `folder`.
    ///
    /// `name` defaults to the analysis' default basename. Metadata is
    /// refreshed first: it embeds the current transform configuration,
    /// the analysis parameters, and a provenance tag.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures, including
    /// [`AnalysisError::ShapeMismatch`] when a different-shaped table
    /// already exists at the target path.
    pub fn save(&mut self, folder: &Path, name: Option<&str>) -> Result<(), AnalysisError> {
        self.refresh_metadata();
        let name = name.unwrap_or_else(|| self.analysis.default_basename());
        self.results.save(folder, name)
    }

    /// Restore a result table and metadata saved by
    /// [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Propagates [`AnalysisError::MissingResults`] /
    /// [`AnalysisError::CorruptMetadata`] and friends.
    pub fn load(&mut self, folder: &Path, name: Option<&str>) -> Result<(), AnalysisError> {
        let name = name.unwrap_or_else(|| self.analysis.default_basename());
        self.results.load(folder, name)?;
        self.state = EngineState::Run;
        Ok(())
    }

    /// Rebuild recompute capability from a saved metadata file,
    /// without reading the tabular data.
    ///
    /// # Errors
    ///
    /// Propagates [`AnalysisError::MissingMetadata`],
    /// [`AnalysisError::CorruptMetadata`], and
    /// [`lapse_pipeline::PipelineError::UnknownStepType`] (wrapped) for
    /// unregistered step types.
    pub fn regenerate(&mut self, folder: &Path, name: Option<&str>) -> Result<(), AnalysisError> {
        let name = name.unwrap_or_else(|| self.analysis.default_basename());
        let metadata = ResultStore::load_metadata(folder, name)?;
        self.regenerate_from(metadata)
    }

    /// [`regenerate`](Self::regenerate) from an in-memory metadata
    /// record.
    ///
    /// # Errors
    ///
    /// As for [`regenerate`](Self::regenerate).
    pub fn regenerate_from(&mut self, metadata: Metadata) -> Result<(), AnalysisError> {
        let transforms =
            metadata
                .get(TRANSFORMS_KEY)
                .ok_or_else(|| AnalysisError::MissingMetadata {
                    what: format!("key '{TRANSFORMS_KEY}'"),
                })?;
        let record: PipelineRecord = serde_json::from_value(transforms.clone()).map_err(|e| {
            AnalysisError::InvalidParameter {
                key: TRANSFORMS_KEY.to_owned(),
                reason: e.to_string(),
            }
        })?;
        self.series.apply_transform_record(&record)?;
        self.analysis.parameters_from_metadata(&metadata)?;

        self.results.metadata = metadata;
        self.results.data = DataTable::default();
        self.initialized = false;
        self.state = EngineState::Regenerated;
        tracing::info!(kind = self.analysis.kind(), "regenerated from metadata");
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), AnalysisError> {
        self.series.prepare()?;
        if !self.initialized {
            self.analysis.initialize(&self.series)?;
            self.initialized = true;
            if self.state == EngineState::Unconfigured {
                self.state = EngineState::Configured;
            }
        }
        Ok(())
    }

    fn full_columns(&self) -> Vec<String> {
        let mut columns = vec![TIME_COLUMN.to_owned()];
        columns.extend(self.analysis.columns());
        columns
    }

    fn frames_for(&self, spec: &RunSpec) -> Result<Vec<i64>, AnalysisError> {
        if spec.skip <= 0 {
            return Err(AnalysisError::InvalidParameter {
                key: "skip".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        let count = i64::try_from(self.series.count()).unwrap_or(i64::MAX);
        let end = spec.end.map_or(count, |end| end.min(count));
        let mut frames = Vec::new();
        let mut num = spec.start.max(0);
        while num < end {
            frames.push(num);
            num += spec.skip;
        }
        Ok(frames)
    }

    /// Parallel batch: one task per frame, immutable snapshots, merge
    /// all-or-nothing in frame order.
    fn run_parallel(&mut self, frames: &[i64]) -> Result<(), AnalysisError> {
        let Some(job) = self.analysis.parallel_worker() else {
            return Err(AnalysisError::UnsupportedMode {
                kind: self.analysis.kind(),
            });
        };
        if frames.is_empty() {
            return Ok(());
        }

        let source = Arc::clone(self.series.source());
        let pipeline = self.series.pipeline().clone();
        let workers = num_cpus::get().clamp(1, frames.len());

        let (task_tx, task_rx) = crossbeam_channel::unbounded::<i64>();
        let (result_tx, result_rx) =
            crossbeam_channel::unbounded::<(i64, Result<Vec<Cell>, AnalysisError>)>();
        for &num in frames {
            let _ = task_tx.send(num);
        }
        drop(task_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let source = Arc::clone(&source);
                let pipeline = pipeline.clone();
                let job = Arc::clone(&job);
                scope.spawn(move || {
                    for num in task_rx {
                        let outcome = source
                            .read_raw(num)
                            .and_then(|raw| Ok(pipeline.apply_all(&raw)?))
                            .map_err(AnalysisError::from)
                            .and_then(|frame| job.analyze(num, &frame));
                        if result_tx.send((num, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut rows: BTreeMap<i64, Vec<Cell>> = BTreeMap::new();
        for (num, outcome) in result_rx {
            // First failure aborts the whole batch: nothing is merged.
            rows.insert(num, outcome?);
        }
        if rows.len() != frames.len() {
            return Err(AnalysisError::WorkerFailed);
        }

        for (num, row) in rows {
            let mut cells = vec![Cell::from(self.series.approximate_time(num))];
            cells.extend(row);
            self.results.data.insert_row(num, cells)?;
        }
        Ok(())
    }

    fn refresh_metadata(&mut self) {
        let mut metadata = Metadata::new();
        for (key, value) in self.analysis.parameters_to_metadata() {
            metadata.insert(key, value);
        }
        if let Ok(transforms) = serde_json::to_value(self.series.pipeline().to_record()) {
            metadata.insert(TRANSFORMS_KEY.to_owned(), transforms);
        }
        metadata.insert(
            PROVENANCE_KEY.to_owned(),
            serde_json::json!({
                "tool": "lapse",
                "version": env!("CARGO_PKG_VERSION"),
            }),
        );
        self.results.metadata = metadata;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma};
    use lapse_pipeline::{Frame, Zone};
    use lapse_series::MemoryStack;

    use super::*;
    use crate::contour_tracking::ContourTracking;
    use crate::grey_level::GreyLevel;

    fn uniform_frames(values: &[u8]) -> Vec<Frame> {
        values
            .iter()
            .map(|&v| Frame::Gray8(GrayImage::from_pixel(6, 6, Luma([v]))))
            .collect()
    }

    fn engine_over(values: &[u8]) -> Engine<GreyLevel> {
        let stack = MemoryStack::new(uniform_frames(values));
        Engine::new(ImageSeries::new(Arc::new(stack)), GreyLevel::new())
    }

    fn column_values(engine: &Engine<GreyLevel>, column: &str) -> Vec<f64> {
        engine
            .results()
            .data
            .nums()
            .into_iter()
            .map(|num| {
                engine
                    .results()
                    .data
                    .get(num, column)
                    .and_then(Cell::as_f64)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn serial_run_populates_rows_in_order() {
        let mut engine = engine_over(&[10, 20, 30, 40, 50]);
        assert_eq!(engine.state(), EngineState::Unconfigured);
        engine.run(&RunSpec::all()).unwrap();

        assert_eq!(engine.state(), EngineState::Run);
        assert_eq!(engine.results().data.nums(), vec![0, 1, 2, 3, 4]);
        assert_eq!(
            column_values(&engine, "zone 1"),
            vec![10.0, 20.0, 30.0, 40.0, 50.0],
        );
    }

    #[test]
    fn run_range_with_skip() {
        let mut engine = engine_over(&[10, 20, 30, 40, 50]);
        engine
            .run(&RunSpec {
                start: 1,
                end: Some(5),
                skip: 2,
                parallel: false,
            })
            .unwrap();
        assert_eq!(engine.results().data.nums(), vec![1, 3]);
    }

    #[test]
    fn zero_skip_is_rejected() {
        let mut engine = engine_over(&[10]);
        assert!(matches!(
            engine.run(&RunSpec {
                skip: 0,
                ..RunSpec::default()
            }),
            Err(AnalysisError::InvalidParameter { .. }),
        ));
    }

    #[test]
    fn rerun_overwrites_only_requested_range() {
        let mut engine = engine_over(&[10, 20, 30, 40, 50]);
        engine.run(&RunSpec::all()).unwrap();

        // A second run over frames [1, 3) must leave rows 0, 3, 4
        // untouched.
        engine
            .run(&RunSpec {
                start: 1,
                end: Some(3),
                skip: 1,
                parallel: false,
            })
            .unwrap();
        assert_eq!(engine.results().data.nums(), vec![0, 1, 2, 3, 4]);
        assert_eq!(
            column_values(&engine, "zone 1"),
            vec![10.0, 20.0, 30.0, 40.0, 50.0],
        );
    }

    #[test]
    fn parallel_run_matches_serial() {
        let mut serial = engine_over(&[10, 20, 30, 40, 50]);
        serial.run(&RunSpec::all()).unwrap();

        let mut parallel = engine_over(&[10, 20, 30, 40, 50]);
        parallel.run(&RunSpec::all_parallel()).unwrap();

        assert_eq!(serial.results().data, parallel.results().data);
    }

    #[test]
    fn parallel_rejected_for_stateful_analysis() {
        let stack = MemoryStack::new(uniform_frames(&[200, 200]));
        let mut tracking = ContourTracking::new();
        tracking.set_level(100.0);
        tracking.add_reference(
            "contour 1",
            crate::contour_tracking::ContourProperties {
                centroid: (3.0, 3.0),
                perimeter: 10.0,
                area: 6.0,
            },
        );
        let mut engine = Engine::new(ImageSeries::new(Arc::new(stack)), tracking);
        assert!(matches!(
            engine.run(&RunSpec::all_parallel()),
            Err(AnalysisError::UnsupportedMode { kind: "ctrack" }),
        ));
    }

    #[test]
    fn serial_failure_keeps_committed_rows() {
        // The zone's origin lies outside frame 2 (2x2), so the third
        // row fails after two commits.
        let frames = vec![
            Frame::Gray8(GrayImage::from_pixel(6, 6, Luma([10]))),
            Frame::Gray8(GrayImage::from_pixel(6, 6, Luma([20]))),
            Frame::Gray8(GrayImage::from_pixel(2, 2, Luma([30]))),
        ];
        let mut engine = Engine::new(
            ImageSeries::new(Arc::new(MemoryStack::new(frames))),
            GreyLevel::new(),
        );
        engine
            .analysis_mut()
            .zones_mut()
            .insert("zone 1", Zone::new(4, 0, 2, 2));

        assert!(engine.run(&RunSpec::all()).is_err());
        assert_eq!(engine.results().data.nums(), vec![0, 1]);
    }

    #[test]
    fn parallel_failure_discards_whole_batch() {
        let frames = vec![
            Frame::Gray8(GrayImage::from_pixel(6, 6, Luma([10]))),
            Frame::Gray8(GrayImage::from_pixel(2, 2, Luma([20]))),
            Frame::Gray8(GrayImage::from_pixel(6, 6, Luma([30]))),
        ];
        let mut engine = Engine::new(
            ImageSeries::new(Arc::new(MemoryStack::new(frames))),
            GreyLevel::new(),
        );
        engine
            .analysis_mut()
            .zones_mut()
            .insert("zone 1", Zone::new(4, 0, 2, 2));

        assert!(engine.run(&RunSpec::all_parallel()).is_err());
        assert!(engine.results().data.is_empty());
    }

    #[test]
    fn analyze_live_does_not_touch_results() {
        let mut engine = engine_over(&[10, 20, 30]);
        let row = engine.analyze_live(1).unwrap();
        assert_eq!(row, vec![Cell::Float(20.0)]);
        assert!(engine.results().data.is_empty());
        assert_eq!(engine.state(), EngineState::Configured);
    }

    #[test]
    fn commit_rows_transfers_previewed_rows() {
        let mut engine = engine_over(&[10, 20, 30]);
        let row1 = engine.analyze_live(1).unwrap();
        let row2 = engine.analyze_live(2).unwrap();
        engine.commit_rows(vec![(1, row1), (2, row2)]).unwrap();
        assert_eq!(engine.results().data.nums(), vec![1, 2]);
        assert_eq!(column_values(&engine, "zone 1"), vec![20.0, 30.0]);
    }

    #[test]
    fn time_column_is_filled_from_source() {
        let stack = MemoryStack::with_times(uniform_frames(&[10, 20]), vec![100.0, 101.0]);
        let mut engine = Engine::new(ImageSeries::new(Arc::new(stack)), GreyLevel::new());
        engine.run(&RunSpec::all()).unwrap();
        assert_eq!(
            engine.results().data.get(0, TIME_COLUMN),
            Some(&Cell::Float(100.0)),
        );
        assert_eq!(
            engine.results().data.get(1, TIME_COLUMN),
            Some(&Cell::Float(101.0)),
        );
    }

    #[test]
    fn metadata_embeds_transforms_and_provenance() {
        let mut engine = engine_over(&[10, 20]);
        engine.run(&RunSpec::all()).unwrap();

        let metadata = &engine.results().metadata;
        assert!(metadata.contains_key("zones"));
        assert!(metadata.contains_key(TRANSFORMS_KEY));
        let provenance = metadata.get(PROVENANCE_KEY).unwrap();
        assert_eq!(
            provenance.get("tool").and_then(serde_json::Value::as_str),
            Some("lapse"),
        );
    }
}
