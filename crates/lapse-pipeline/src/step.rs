//! The `Transform` capability trait and shared step state.
//!
//! Every transform step is a named, stateful, composable image
//! operation: an enable flag, a serializable parameter payload, and a
//! pure `apply` function. Callers configure steps by name through the
//! mapping interface (`set`, `to_mapping`, `from_mapping`) rather than
//! through concrete types, so pipelines can hold any mix of built-in
//! and user-registered steps.

use std::any::Any;

use serde_json::Value;

use crate::frame::Frame;
use crate::types::{ParamMap, PipelineError};

/// Shared state embedded in every transform step.
///
/// Holds the step's stable name, its enable flag, and the parameter
/// payload. Concrete steps expose it through [`Transform::core`] /
/// [`Transform::core_mut`] so the trait can provide the common
/// mapping operations once.
#[derive(Debug, Clone)]
pub struct StepCore {
    name: String,
    enabled: bool,
    data: ParamMap,
}

impl StepCore {
    /// Create a core with an empty payload. Steps start enabled; an
    /// empty payload makes them a no-op regardless.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            data: ParamMap::new(),
        }
    }

    /// The step's stable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read a raw parameter value, if present.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Read a parameter as `f64`, if present and numeric.
    #[must_use]
    pub fn f64_param(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    /// Read a parameter as `bool`, if present and boolean.
    #[must_use]
    pub fn bool_param(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(Value::as_bool)
    }

    /// Read a parameter as a list of integers, if present.
    #[must_use]
    pub fn int_list_param(&self, key: &str) -> Option<Vec<i64>> {
        let list = self.data.get(key)?.as_array()?;
        list.iter().map(Value::as_i64).collect()
    }
}

/// A single named, composable image operation.
///
/// # Purity
///
/// `apply` must be a pure function of the input frame and the step's
/// payload: no I/O, no global mutation, no dependence on external
/// mutable state. The pipeline fingerprint assumes this — two steps
/// with equal name, enable flag, and payload must transform any frame
/// identically.
pub trait Transform: Send + Sync {
    /// Shared state (name, enable flag, payload).
    fn core(&self) -> &StepCore;

    /// Mutable shared state.
    fn core_mut(&mut self) -> &mut StepCore;

    /// The parameter names this step recognizes.
    fn recognized_keys(&self) -> &'static [&'static str];

    /// Transform one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] when the payload cannot be applied
    /// to this frame (out-of-bounds crop, missing subtraction
    /// reference, size mismatch).
    fn apply(&self, frame: &Frame) -> Result<Frame, PipelineError>;

    /// Clone into a boxed trait object.
    fn boxed_clone(&self) -> Box<dyn Transform>;

    /// Downcasting support for typed access to concrete steps.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcasting support.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Validate a value for a recognized key before storing it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidValue`] when the value is
    /// outside the key's domain.
    fn validate(&self, _key: &str, _value: &Value) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Hook invoked after any payload mutation.
    ///
    /// Steps that hold state derived from the payload (e.g. the
    /// subtraction reference image) drop it here.
    fn on_data_changed(&mut self) {}

    /// The step's stable name.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Whether the step participates in `apply_all`.
    fn enabled(&self) -> bool {
        self.core().enabled
    }

    /// Enable or disable the step without touching its payload.
    fn set_enabled(&mut self, enabled: bool) {
        self.core_mut().enabled = enabled;
    }

    /// The current parameter payload.
    fn data(&self) -> &ParamMap {
        &self.core().data
    }

    /// Whether the payload is empty (the step is an identity no-op).
    fn is_empty(&self) -> bool {
        self.core().data.is_empty()
    }

    /// Store a parameter value.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] when `key` is not
    /// among [`recognized_keys`](Self::recognized_keys), and
    /// [`PipelineError::InvalidValue`] when the value fails
    /// [`validate`](Self::validate).
    fn set(&mut self, key: &str, value: Value) -> Result<(), PipelineError> {
        if !self.recognized_keys().contains(&key) {
            return Err(PipelineError::InvalidParameter {
                step: self.name().to_owned(),
                key: key.to_owned(),
            });
        }
        self.validate(key, &value)?;
        self.core_mut().data.insert(key.to_owned(), value);
        self.on_data_changed();
        Ok(())
    }

    /// Clear the payload, returning the step to its identity state.
    fn reset(&mut self) {
        self.core_mut().data.clear();
        self.on_data_changed();
    }

    /// Serialize the payload.
    fn to_mapping(&self) -> ParamMap {
        self.core().data.clone()
    }

    /// Replace the payload from a serialized mapping.
    ///
    /// Every key is validated exactly as in [`set`](Self::set), so
    /// `from_mapping(to_mapping())` round-trips and bad records are
    /// rejected at load time rather than at apply time.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] or
    /// [`PipelineError::InvalidValue`] for unrecognized keys or
    /// out-of-domain values.
    fn from_mapping(&mut self, mapping: ParamMap) -> Result<(), PipelineError> {
        for (key, value) in &mapping {
            if !self.recognized_keys().contains(&key.as_str()) {
                return Err(PipelineError::InvalidParameter {
                    step: self.name().to_owned(),
                    key: key.clone(),
                });
            }
            self.validate(key, value)?;
        }
        self.core_mut().data = mapping;
        self.on_data_changed();
        Ok(())
    }
}

impl Clone for Box<dyn Transform> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::rotation::Rotation;

    #[test]
    fn set_rejects_unrecognized_key() {
        let mut step = Rotation::new();
        let err = step.set("zone", serde_json::json!([0, 0, 1, 1]));
        assert!(matches!(
            err,
            Err(PipelineError::InvalidParameter { ref step, ref key })
                if step == "rotation" && key == "zone"
        ));
    }

    #[test]
    fn set_then_reset_round_trip() {
        let mut step = Rotation::new();
        step.set("angle", serde_json::json!(12.5)).unwrap();
        assert!(!step.is_empty());
        step.reset();
        assert!(step.is_empty());
    }

    #[test]
    fn mapping_round_trip_is_exact() {
        let mut step = Rotation::new();
        step.set("angle", serde_json::json!(-3.25)).unwrap();
        let mapping = step.to_mapping();

        let mut other = Rotation::new();
        other.from_mapping(mapping.clone()).unwrap();
        assert_eq!(other.to_mapping(), mapping);
    }

    #[test]
    fn from_mapping_rejects_unknown_keys() {
        let mut step = Rotation::new();
        let mut mapping = ParamMap::new();
        mapping.insert("nonsense".to_owned(), serde_json::json!(1));
        assert!(matches!(
            step.from_mapping(mapping),
            Err(PipelineError::InvalidParameter { .. }),
        ));
    }

    #[test]
    fn empty_mapping_round_trips() {
        let mut step = Rotation::new();
        step.from_mapping(ParamMap::new()).unwrap();
        assert!(step.is_empty());
        assert!(step.to_mapping().is_empty());
    }
}
