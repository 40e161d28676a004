//! Errors raised while reading and transforming sequence frames.

use std::path::PathBuf;

use lapse_pipeline::PipelineError;

/// Errors raised by frame sources and the cached reader.
#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    /// A frame number outside the series was requested.
    #[error("frame {num} is out of range (series has {count} frames)")]
    FrameOutOfRange {
        /// The requested frame number.
        num: i64,
        /// Number of frames in the series.
        count: usize,
    },

    /// An image file could not be read or decoded.
    #[error("failed to decode image file {path}: {source}")]
    Decode {
        /// The offending file.
        path: PathBuf,
        /// The underlying decoder error.
        source: image::ImageError,
    },

    /// A directory scan found no matching image files.
    #[error("no '{extension}' images found under {path}")]
    EmptySequence {
        /// The scanned directory.
        path: PathBuf,
        /// The extension filter in effect.
        extension: String,
    },

    /// A transform step failed while reading.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Internal: the transform cache returned an entry computed under a
    /// different configuration than requested.
    ///
    /// This cannot happen while cache keys embed the pipeline
    /// fingerprint; if it surfaces it indicates a fingerprinting bug
    /// and must be treated as fatal, not retried.
    #[error(
        "transform cache returned an entry fingerprinted {found:#018x} \
         for requested fingerprint {expected:#018x} (frame {num})"
    )]
    CacheInvalidation {
        /// The frame whose cached entry was inconsistent.
        num: i64,
        /// The fingerprint used for the lookup.
        expected: u64,
        /// The fingerprint recorded in the entry.
        found: u64,
    },
}
