//! The ordered transform pipeline.
//!
//! A pipeline owns one instance of every step type registered at its
//! construction, in registry order. Applying the pipeline threads a
//! frame through each *active* step (enabled, non-empty payload); the
//! declared order is fixed regardless of which subset is active.
//!
//! The pipeline's [`fingerprint`](TransformPipeline::fingerprint) is a
//! stable hash of the ordered `(name, enabled, payload)` triples. It is
//! the cache-key component representing "pipeline configuration": two
//! pipelines with equal fingerprints produce bit-identical output for
//! the same input frame.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::frame::Frame;
use crate::registry::Registry;
use crate::step::Transform;
use crate::types::{ParamMap, PipelineError};

// Fixed keys so fingerprints are comparable across processes.
const FINGERPRINT_KEY: (u64, u64) = (0x6c61_7073_652d_7070, 0x7472_616e_7366_6f72);

/// Serialized configuration of a single step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    /// The step's enable flag.
    pub enabled: bool,
    /// The step's parameter payload.
    pub data: ParamMap,
}

/// Serialized configuration of a whole pipeline.
///
/// `order` is the full application order at save time; `steps` holds
/// the per-step payloads. This record is embedded verbatim in analysis
/// result metadata so a pipeline can be reconstructed from a saved
/// analysis alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRecord {
    /// Step names in application order.
    pub order: Vec<String>,
    /// Per-step configuration, keyed by step name.
    pub steps: BTreeMap<String, StepRecord>,
}

/// Ordered, configurable chain of transform steps.
#[derive(Clone)]
pub struct TransformPipeline {
    steps: Vec<Box<dyn Transform>>,
}

impl TransformPipeline {
    /// Build a pipeline holding one instance of every step type in
    /// `registry`, in registry order.
    #[must_use]
    pub fn from_registry(registry: &Registry) -> Self {
        Self {
            steps: registry.instantiate_all(),
        }
    }

    /// Step names in application order.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Iterate over all steps in application order.
    pub fn steps(&self) -> impl Iterator<Item = &dyn Transform> {
        self.steps.iter().map(|step| &**step)
    }

    /// Look up a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&dyn Transform> {
        self.steps
            .iter()
            .find(|step| step.name() == name)
            .map(|step| &**step)
    }

    /// Look up a step by name, mutably.
    pub fn step_mut(&mut self, name: &str) -> Option<&mut (dyn Transform + 'static)> {
        self.steps
            .iter_mut()
            .find(|step| step.name() == name)
            .map(|step| &mut **step)
    }

    /// Names of the active steps (enabled with a non-empty payload),
    /// in application order.
    #[must_use]
    pub fn active_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| is_active(s.as_ref()))
            .map(|s| s.name())
            .collect()
    }

    /// Clear every step's payload.
    pub fn reset_all(&mut self) {
        for step in &mut self.steps {
            step.reset();
        }
    }

    /// Apply every active step in order.
    ///
    /// With zero active steps the input is returned unchanged.
    ///
    /// # Errors
    ///
    /// Propagates the first step failure, tagged with the step that
    /// raised it.
    pub fn apply_all(&self, frame: &Frame) -> Result<Frame, PipelineError> {
        let mut current = frame.clone();
        for step in &self.steps {
            if is_active(step.as_ref()) {
                current = step.apply(&current)?;
            }
        }
        Ok(current)
    }

    /// Apply the active steps strictly before `before` (exclusive).
    ///
    /// Used to materialize the subtraction reference: reference frames
    /// must be transformed by the same prefix as the frames they are
    /// subtracted from.
    ///
    /// # Errors
    ///
    /// Propagates the first step failure.
    pub fn apply_prefix(&self, frame: &Frame, before: &str) -> Result<Frame, PipelineError> {
        let mut current = frame.clone();
        for step in &self.steps {
            if step.name() == before {
                break;
            }
            if is_active(step.as_ref()) {
                current = step.apply(&current)?;
            }
        }
        Ok(current)
    }

    /// Stable hash of the full configuration.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = SipHasher13::new_with_keys(FINGERPRINT_KEY.0, FINGERPRINT_KEY.1);
        for step in &self.steps {
            hash_step(&**step, &mut hasher);
        }
        hasher.finish()
    }

    /// Stable hash of the configuration of the steps strictly before
    /// `before`.
    #[must_use]
    pub fn prefix_fingerprint(&self, before: &str) -> u64 {
        let mut hasher = SipHasher13::new_with_keys(FINGERPRINT_KEY.0, FINGERPRINT_KEY.1);
        for step in &self.steps {
            if step.name() == before {
                break;
            }
            hash_step(&**step, &mut hasher);
        }
        hasher.finish()
    }

    /// Serialize the full configuration.
    #[must_use]
    pub fn to_record(&self) -> PipelineRecord {
        let order = self.steps.iter().map(|s| s.name().to_owned()).collect();
        let steps = self
            .steps
            .iter()
            .map(|s| {
                (
                    s.name().to_owned(),
                    StepRecord {
                        enabled: s.enabled(),
                        data: s.to_mapping(),
                    },
                )
            })
            .collect();
        PipelineRecord { order, steps }
    }

    /// Reconstruct a pipeline from a saved record.
    ///
    /// The record's order is authoritative; registered step types
    /// missing from the record are appended (unconfigured) in registry
    /// order, so loading an older record into a richer registry keeps
    /// the newer steps available.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownStepType`] when the record
    /// names a step type absent from `registry` — never silently
    /// skipped — and propagates payload validation failures.
    pub fn from_record(
        registry: &Registry,
        record: &PipelineRecord,
    ) -> Result<Self, PipelineError> {
        for name in record.steps.keys() {
            if !record.order.contains(name) && !registry.contains(name) {
                return Err(PipelineError::UnknownStepType { name: name.clone() });
            }
        }

        let mut steps: Vec<Box<dyn Transform>> = Vec::with_capacity(registry.len());
        for name in &record.order {
            let mut step =
                registry
                    .instantiate(name)
                    .ok_or_else(|| PipelineError::UnknownStepType {
                        name: name.clone(),
                    })?;
            if let Some(step_record) = record.steps.get(name) {
                step.from_mapping(step_record.data.clone())?;
                step.set_enabled(step_record.enabled);
            }
            steps.push(step);
        }
        for name in registry.names() {
            if !record.order.iter().any(|n| n == name) {
                if let Some(mut step) = registry.instantiate(name) {
                    if let Some(step_record) = record.steps.get(name) {
                        step.from_mapping(step_record.data.clone())?;
                        step.set_enabled(step_record.enabled);
                    }
                    steps.push(step);
                }
            }
        }
        Ok(Self { steps })
    }

    /// Save the configuration as a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] / [`PipelineError::Json`] on
    /// write or encoding failure.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let record = self.to_record();
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "saved pipeline configuration");
        Ok(())
    }

    /// Load a configuration saved by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] when the file cannot be read,
    /// [`PipelineError::Json`] when it is not a valid record, and
    /// [`PipelineError::UnknownStepType`] when it references a step
    /// type absent from `registry`.
    pub fn load(path: &Path, registry: &Registry) -> Result<Self, PipelineError> {
        let json = std::fs::read_to_string(path)?;
        let record: PipelineRecord = serde_json::from_str(&json)?;
        let pipeline = Self::from_record(registry, &record)?;
        tracing::debug!(path = %path.display(), "loaded pipeline configuration");
        Ok(pipeline)
    }
}

impl std::fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformPipeline")
            .field("order", &self.order())
            .field("active", &self.active_names())
            .finish()
    }
}

fn is_active(step: &dyn Transform) -> bool {
    step.enabled() && !step.is_empty()
}

fn hash_step(step: &dyn Transform, hasher: &mut SipHasher13) {
    step.name().hash(hasher);
    step.enabled().hash(hasher);
    for (key, value) in step.data() {
        key.hash(hasher);
        // Payload keys come from a BTreeMap, so the compact JSON form
        // is canonical per key.
        value.to_string().hash(hasher);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn gray(value: u8) -> Frame {
        Frame::Gray8(GrayImage::from_pixel(6, 6, Luma([value])))
    }

    fn configured_pipeline() -> TransformPipeline {
        let mut pipeline = TransformPipeline::from_registry(&Registry::standard());
        pipeline
            .step_mut("crop")
            .unwrap()
            .set("zone", serde_json::json!([1, 1, 4, 4]))
            .unwrap();
        pipeline
            .step_mut("threshold")
            .unwrap()
            .set("vmin", serde_json::json!(100))
            .unwrap();
        pipeline
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let pipeline = TransformPipeline::from_registry(&Registry::standard());
        let frame = gray(42);
        assert_eq!(pipeline.apply_all(&frame).unwrap(), frame);
        assert!(pipeline.active_names().is_empty());
    }

    #[test]
    fn steps_apply_in_declared_order() {
        let pipeline = configured_pipeline();
        // Crop first (4x4), then threshold (mask).
        let out = pipeline.apply_all(&gray(150)).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.kind(), crate::frame::FrameKind::Mask);
        assert!((out.mean() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disabling_a_step_skips_it_without_reordering() {
        let mut pipeline = configured_pipeline();
        pipeline.step_mut("crop").unwrap().set_enabled(false);
        let out = pipeline.apply_all(&gray(150)).unwrap();
        // Threshold still runs, crop does not.
        assert_eq!(out.dimensions(), (6, 6));
        assert_eq!(out.kind(), crate::frame::FrameKind::Mask);
    }

    #[test]
    fn reenabling_restores_identical_output() {
        let mut pipeline = configured_pipeline();
        let before = pipeline.apply_all(&gray(150)).unwrap();
        pipeline.step_mut("crop").unwrap().set_enabled(false);
        pipeline.step_mut("crop").unwrap().set_enabled(true);
        let after = pipeline.apply_all(&gray(150)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn fingerprints_match_for_identical_configurations() {
        let p1 = configured_pipeline();
        let p2 = configured_pipeline();
        assert_eq!(p1.fingerprint(), p2.fingerprint());
        assert_eq!(
            p1.apply_all(&gray(120)).unwrap(),
            p2.apply_all(&gray(120)).unwrap(),
        );
    }

    #[test]
    fn fingerprint_changes_on_parameter_mutation() {
        let mut pipeline = configured_pipeline();
        let before = pipeline.fingerprint();
        pipeline
            .step_mut("threshold")
            .unwrap()
            .set("vmin", serde_json::json!(101))
            .unwrap();
        assert_ne!(before, pipeline.fingerprint());
    }

    #[test]
    fn fingerprint_changes_on_enable_flag_mutation() {
        let mut pipeline = configured_pipeline();
        let before = pipeline.fingerprint();
        pipeline.step_mut("crop").unwrap().set_enabled(false);
        assert_ne!(before, pipeline.fingerprint());
    }

    #[test]
    fn prefix_fingerprint_ignores_later_steps() {
        let mut pipeline = configured_pipeline();
        let before = pipeline.prefix_fingerprint("subtraction");
        pipeline
            .step_mut("threshold")
            .unwrap()
            .set("vmin", serde_json::json!(7))
            .unwrap();
        assert_eq!(before, pipeline.prefix_fingerprint("subtraction"));

        pipeline
            .step_mut("crop")
            .unwrap()
            .set("zone", serde_json::json!([0, 0, 2, 2]))
            .unwrap();
        assert_ne!(before, pipeline.prefix_fingerprint("subtraction"));
    }

    #[test]
    fn record_round_trip() {
        let registry = Registry::standard();
        let pipeline = configured_pipeline();
        let record = pipeline.to_record();
        let restored = TransformPipeline::from_record(&registry, &record).unwrap();
        assert_eq!(restored.fingerprint(), pipeline.fingerprint());
        assert_eq!(restored.to_record(), record);
    }

    #[test]
    fn from_record_rejects_unknown_step() {
        let registry = Registry::standard();
        let mut record = configured_pipeline().to_record();
        record.order.push("sharpen".to_owned());
        assert!(matches!(
            TransformPipeline::from_record(&registry, &record),
            Err(PipelineError::UnknownStepType { name }) if name == "sharpen",
        ));
    }

    #[test]
    fn from_record_restores_custom_order() {
        let registry = Registry::standard();
        let mut record = configured_pipeline().to_record();
        record.order.reverse();
        let restored = TransformPipeline::from_record(&registry, &record).unwrap();
        assert_eq!(
            restored.order(),
            vec![
                "threshold",
                "subtraction",
                "filter",
                "crop",
                "rotation",
                "grayscale",
            ],
        );
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transforms.json");
        let registry = Registry::standard();

        let pipeline = configured_pipeline();
        pipeline.save(&path).unwrap();

        let loaded = TransformPipeline::load(&path, &registry).unwrap();
        assert_eq!(loaded.fingerprint(), pipeline.fingerprint());
    }

    #[test]
    fn registry_mutation_does_not_affect_existing_pipelines() {
        let mut registry = Registry::standard();
        let pipeline = TransformPipeline::from_registry(&registry);
        registry.remove_step_type("crop").unwrap();
        // Already-constructed pipeline still has its crop step.
        assert!(pipeline.step("crop").is_some());
        // Newly constructed pipelines reflect the mutation.
        let fresh = TransformPipeline::from_registry(&registry);
        assert!(fresh.step("crop").is_none());
    }
}
