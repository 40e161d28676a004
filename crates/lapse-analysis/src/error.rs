//! Errors raised by analyses, the engine, and result persistence.

use std::path::PathBuf;

use lapse_series::SeriesError;

/// Errors raised by the analysis layer.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// `parallel = true` was requested for an analysis whose per-frame
    /// results depend on earlier frames.
    #[error("analysis '{kind}' is not safely parallelizable")]
    UnsupportedMode {
        /// The analysis kind.
        kind: &'static str,
    },

    /// The analysis is missing required configuration.
    #[error("analysis '{kind}' is not configured: {what}")]
    NotConfigured {
        /// The analysis kind.
        kind: &'static str,
        /// What is missing.
        what: String,
    },

    /// An analysis parameter or run option is outside its domain.
    #[error("invalid parameter '{key}': {reason}")]
    InvalidParameter {
        /// The offending key or option.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A required metadata entry is absent.
    #[error("missing metadata: {what}")]
    MissingMetadata {
        /// What was expected.
        what: String,
    },

    /// A metadata file exists but does not parse into the expected
    /// schema.
    #[error("corrupt metadata in {path}: {reason}")]
    CorruptMetadata {
        /// The metadata file.
        path: PathBuf,
        /// Parse failure detail.
        reason: String,
    },

    /// The tabular data file is absent.
    #[error("missing results data file {path}")]
    MissingResults {
        /// The expected data file.
        path: PathBuf,
    },

    /// The tabular data file exists but cannot be parsed.
    #[error("corrupt results in {path}: {reason}")]
    CorruptResults {
        /// The data file.
        path: PathBuf,
        /// Parse failure detail.
        reason: String,
    },

    /// Saving would overwrite an existing table with different columns.
    #[error(
        "refusing to overwrite {path}: existing columns {existing:?} \
         differ from new columns {new:?}"
    )]
    ShapeMismatch {
        /// The existing data file.
        path: PathBuf,
        /// Columns found on disk.
        existing: Vec<String>,
        /// Columns about to be written.
        new: Vec<String>,
    },

    /// A computed row does not match the declared columns.
    #[error("row for frame {num} has {actual} cells, table has {expected} columns")]
    RowShape {
        /// The frame number of the offending row.
        num: i64,
        /// Declared column count.
        expected: usize,
        /// Cells supplied.
        actual: usize,
    },

    /// A parallel worker terminated abnormally.
    #[error("parallel worker terminated abnormally")]
    WorkerFailed,

    /// A frame read or transform failed.
    #[error(transparent)]
    Series(#[from] SeriesError),

    /// Persistence I/O failure.
    #[error("results I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata encoding failure.
    #[error("metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),
}
