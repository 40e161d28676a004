//! lapse-pipeline: configurable per-frame transform pipeline (sans-IO).
//!
//! Represents the ordered, configurable chain of image transforms that
//! an image-sequence analysis applies to every frame before measuring
//! it: grayscale conversion -> rotation -> crop -> smoothing filter ->
//! background subtraction -> threshold.
//!
//! This crate has **no I/O dependencies** beyond reading/writing its
//! own JSON configuration records — it operates on in-memory
//! [`Frame`]s. Frame storage, caching, and analysis orchestration live
//! in `lapse-series` and `lapse-analysis`.
//!
//! # Building a pipeline
//!
//! ```rust
//! use lapse_pipeline::{Registry, Transform, TransformPipeline};
//!
//! # fn run() -> Result<(), lapse_pipeline::PipelineError> {
//! let registry = Registry::standard();
//! let mut pipeline = TransformPipeline::from_registry(&registry);
//!
//! pipeline
//!     .step_mut("crop")
//!     .ok_or_else(|| lapse_pipeline::PipelineError::UnknownStepType {
//!         name: "crop".into(),
//!     })?
//!     .set("zone", serde_json::json!([10, 10, 200, 150]))?;
//! # Ok(())
//! # }
//! ```
//!
//! Steps are configured through their mapping interface (`set`,
//! `from_mapping`), never positionally: the application order is owned
//! by the [`Registry`] the pipeline was built from.
//!
//! # Fingerprints
//!
//! [`TransformPipeline::fingerprint`] condenses the ordered
//! `(name, enabled, payload)` triples into a stable hash. Caches key
//! transformed frames on `(frame number, fingerprint)`, so any
//! configuration change makes prior entries unreachable without
//! explicit bookkeeping.

pub mod crop;
pub mod filter;
pub mod frame;
pub mod grayscale;
pub mod pipeline;
pub mod registry;
pub mod rotation;
pub mod step;
pub mod subtraction;
pub mod threshold;
mod types;

pub use crop::Crop;
pub use filter::Filter;
pub use frame::{Frame, FrameKind, Gray32FImage};
pub use grayscale::Grayscale;
pub use pipeline::{PipelineRecord, StepRecord, TransformPipeline};
pub use registry::{Registry, StepFactory};
pub use rotation::Rotation;
pub use step::{StepCore, Transform};
pub use subtraction::Subtraction;
pub use threshold::Threshold;
pub use types::{ParamMap, PipelineError, Zone};
