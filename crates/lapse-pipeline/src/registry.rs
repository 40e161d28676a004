//! Ordered registry of transform step types.
//!
//! The registry decides which step types exist and in which order they
//! apply. It is an explicit value passed to pipeline constructors, not
//! a process-wide singleton: a pipeline snapshots the registry at
//! construction time, so later registry mutation never changes the
//! steps of an already-built pipeline.
//!
//! A registry may contain several instances of the same implementation
//! under distinct names (e.g. two differently-named smoothing passes):
//! entries map a *name* to a factory, and the factory decides the
//! concrete type.

use std::sync::Arc;

use crate::step::Transform;
use crate::types::PipelineError;
use crate::{crop, filter, grayscale, rotation, subtraction, threshold};

/// Factory producing a fresh, unconfigured step instance.
pub type StepFactory = Arc<dyn Fn() -> Box<dyn Transform> + Send + Sync>;

#[derive(Clone)]
struct RegistryEntry {
    name: String,
    factory: StepFactory,
}

/// Ordered collection of registered step types.
#[derive(Clone)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    /// A registry with no step types.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// The standard registry: grayscale, rotation, crop, filter,
    /// subtraction, threshold — in application order.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        // Push order is application order; these names are all distinct
        // so the inserts cannot fail.
        let _ = registry.push(|| Box::new(grayscale::Grayscale::new()));
        let _ = registry.push(|| Box::new(rotation::Rotation::new()));
        let _ = registry.push(|| Box::new(crop::Crop::new()));
        let _ = registry.push(|| Box::new(filter::Filter::new()));
        let _ = registry.push(|| Box::new(subtraction::Subtraction::new()));
        let _ = registry.push(|| Box::new(threshold::Threshold::new()));
        registry
    }

    /// Register a step type at the end of the order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateStepType`] when a step with
    /// the same name is already registered.
    pub fn push<F>(&mut self, factory: F) -> Result<(), PipelineError>
    where
        F: Fn() -> Box<dyn Transform> + Send + Sync + 'static,
    {
        self.add_step_type(factory, None)
    }

    /// Register a step type, optionally at a given position in the
    /// application order.
    ///
    /// The name is taken from a probe instance produced by the factory.
    /// `order = None` appends at the end.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateStepType`] when a step with
    /// the same name is already registered.
    pub fn add_step_type<F>(
        &mut self,
        factory: F,
        order: Option<usize>,
    ) -> Result<(), PipelineError>
    where
        F: Fn() -> Box<dyn Transform> + Send + Sync + 'static,
    {
        let probe = factory();
        let name = probe.name().to_owned();
        if self.contains(&name) {
            return Err(PipelineError::DuplicateStepType { name });
        }
        let entry = RegistryEntry {
            name,
            factory: Arc::new(factory),
        };
        let index = order.unwrap_or(self.entries.len()).min(self.entries.len());
        self.entries.insert(index, entry);
        Ok(())
    }

    /// Remove a registered step type by name.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownStepType`] when no step with
    /// that name is registered.
    pub fn remove_step_type(&mut self, name: &str) -> Result<(), PipelineError> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| PipelineError::UnknownStepType {
                name: name.to_owned(),
            })?;
        self.entries.remove(index);
        Ok(())
    }

    /// Whether a step type with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    /// Registered step names in application order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Number of registered step types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instantiate a fresh step of the named type.
    #[must_use]
    pub fn instantiate(&self, name: &str) -> Option<Box<dyn Transform>> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| (entry.factory)())
    }

    /// Instantiate every registered step type in order.
    #[must_use]
    pub fn instantiate_all(&self) -> Vec<Box<dyn Transform>> {
        self.entries.iter().map(|entry| (entry.factory)()).collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish()
    }
}
