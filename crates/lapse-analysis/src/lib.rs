//! lapse-analysis: run pluggable analyses over image sequences and
//! persist their tabular results.
//!
//! The [`Engine`] drives the control flow: pull frame numbers, fetch
//! transformed frames through the series' caches, feed them to an
//! [`Analysis`], and accumulate one row per frame in a [`ResultStore`].
//! Stores round-trip to a `.tsv` + `.json` file pair whose metadata
//! embeds everything needed to rebuild the computation —
//! [`Engine::regenerate`] turns a saved metadata record back into a
//! working pipeline and parameter set without re-running the batch.
//!
//! Built-in analyses:
//!
//! - [`GreyLevel`] — mean intensity per named zone
//! - [`Flicker`] — per-zone intensity ratios against a reference frame
//! - [`Front1d`] — per-column intensity profile (1-D front detection)
//! - [`ContourTracking`] — contour positions/perimeters/areas over time
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use lapse_analysis::{Engine, GreyLevel, RunSpec};
//! use lapse_pipeline::Frame;
//! use lapse_series::{ImageSeries, MemoryStack};
//!
//! # fn run() -> Result<(), lapse_analysis::AnalysisError> {
//! let frames: Vec<Frame> = (1..=5)
//!     .map(|i| Frame::Gray8(image::GrayImage::from_pixel(16, 16, image::Luma([i * 10]))))
//!     .collect();
//! let series = ImageSeries::new(Arc::new(MemoryStack::new(frames)));
//!
//! let mut engine = Engine::new(series, GreyLevel::new());
//! engine.run(&RunSpec::all())?;
//! assert_eq!(engine.results().data.len(), 5);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod contour;
pub mod contour_tracking;
pub mod engine;
mod error;
pub mod flicker;
pub mod front_1d;
pub mod grey_level;
pub mod store;
pub mod table;
pub mod zones;

pub use analysis::{Analysis, FrameJob};
pub use contour_tracking::{ContourProperties, ContourTracking};
pub use engine::{Engine, EngineState, RunSpec, TIME_COLUMN};
pub use error::AnalysisError;
pub use flicker::Flicker;
pub use front_1d::Front1d;
pub use grey_level::{GreyLevel, Reduction};
pub use store::{Metadata, PROVENANCE_KEY, ResultStore, TRANSFORMS_KEY};
pub use table::{Cell, DataTable, TableParseError};
pub use zones::Zones;
