//! lapse-series: frame sources and cached transformed reads.
//!
//! An image sequence lives either as discrete files on disk
//! ([`ImageSequence`]) or as an in-memory stacked volume
//! ([`MemoryStack`]); both present the same [`FrameSource`] interface.
//! [`ImageSeries`] composes a source with an exclusive
//! [`TransformPipeline`](lapse_pipeline::TransformPipeline) and two
//! bounded LRU caches (raw reads, transformed reads), keyed so that
//! pipeline reconfiguration can never serve stale frames.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use lapse_pipeline::Frame;
//! use lapse_series::{ImageSeries, MemoryStack};
//!
//! # fn run() -> Result<(), lapse_series::SeriesError> {
//! let frames: Vec<Frame> = (1..=3)
//!     .map(|i| Frame::Gray8(image::GrayImage::from_pixel(8, 8, image::Luma([i * 10]))))
//!     .collect();
//! let series = ImageSeries::new(Arc::new(MemoryStack::new(frames)));
//!
//! let transformed = series.read(1)?;
//! assert_eq!(transformed.dimensions(), (8, 8));
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod error;
pub mod sequence;
pub mod series;
pub mod source;

pub use cache::{BoundedCache, CacheStats};
pub use error::SeriesError;
pub use sequence::ImageSequence;
pub use series::{ImageSeries, READ_CACHE_SIZE, TRANSFORM_CACHE_SIZE};
pub use source::{FrameSource, MemoryStack};
