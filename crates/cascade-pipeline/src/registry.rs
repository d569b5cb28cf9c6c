//! Transform trait, closure wrapper, and the pattern registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use cascade_types::{CascadeError, Result};

use crate::definition::StepConfig;

// ---------------------------------------------------------------------------
// Transform trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Transform: Send + Sync {
    /// The pattern name this transform is registered under.
    fn name(&self) -> &str;

    /// Map the step input to its output under the effective step config.
    async fn apply(
        &self,
        input: &serde_json::Value,
        config: &StepConfig,
    ) -> Result<serde_json::Value>;
}

// ---------------------------------------------------------------------------
// FnTransform: closure-backed transform
// ---------------------------------------------------------------------------

type TransformFn =
    dyn Fn(&serde_json::Value, &StepConfig) -> Result<serde_json::Value> + Send + Sync;

/// Wraps a synchronous closure as a [`Transform`].
pub struct FnTransform {
    name: String,
    f: Box<TransformFn>,
}

impl FnTransform {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&serde_json::Value, &StepConfig) -> Result<serde_json::Value>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl Transform for FnTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        input: &serde_json::Value,
        config: &StepConfig,
    ) -> Result<serde_json::Value> {
        (self.f)(input, config)
    }
}

// ---------------------------------------------------------------------------
// PatternRegistry
// ---------------------------------------------------------------------------

/// Transforms keyed by pattern name, plus the primary-to-fallback table.
#[derive(Default)]
pub struct PatternRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
    fallbacks: HashMap<String, String>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform under its own name, replacing any previous one.
    pub fn register(&mut self, transform: impl Transform + 'static) {
        let name = transform.name().to_string();
        self.transforms.insert(name, Arc::new(transform));
    }

    /// Designate `fallback` as the alternate for `primary`.
    ///
    /// The fallback does not need to be registered yet; an unregistered
    /// fallback surfaces as [`CascadeError::PatternNotFound`] when used.
    pub fn register_fallback(&mut self, primary: impl Into<String>, fallback: impl Into<String>) {
        self.fallbacks.insert(primary.into(), fallback.into());
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Transform>> {
        self.transforms
            .get(name)
            .cloned()
            .ok_or_else(|| CascadeError::PatternNotFound {
                pattern: name.to_string(),
            })
    }

    /// The designated fallback for `name`, if any.
    pub fn fallback_for(&self, name: &str) -> Option<&str> {
        self.fallbacks.get(name).map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Registered pattern names, sorted.
    pub fn patterns(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
