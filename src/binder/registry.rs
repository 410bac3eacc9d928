//! Binder registry: resolves a backend selector to a configured binder.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::binder::Binder;
use crate::error::ResolutionError;

/// Configured binders keyed by backend identifier.
///
/// Populated once at startup; lookups are pure.
#[derive(Default, Clone)]
pub struct BinderRegistry {
    binders: HashMap<String, Arc<dyn Binder>>,
    default_binder: Option<String>,
}

impl BinderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binder. Returns the binder previously registered under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        binder: Arc<dyn Binder>,
    ) -> Option<Arc<dyn Binder>> {
        let name = name.into();
        debug!(binder = %name, "Registered binder");
        self.binders.insert(name, binder)
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_binder(mut self, name: impl Into<String>, binder: Arc<dyn Binder>) -> Self {
        self.register(name, binder);
        self
    }

    /// Binder used for unprefixed channel names when several are configured.
    pub fn set_default_binder(&mut self, name: Option<String>) {
        self.default_binder = name.filter(|n| !n.is_empty());
    }

    pub fn with_default_binder(mut self, name: impl Into<String>) -> Self {
        self.set_default_binder(Some(name.into()));
        self
    }

    pub fn default_binder(&self) -> Option<&str> {
        self.default_binder.as_deref()
    }

    /// Resolve a binder.
    ///
    /// With a selector, returns the binder registered under it. Without one
    /// (or with an empty one): the only configured binder, else the default
    /// binder, else `AmbiguousBinderSelection`.
    pub fn get_binder(&self, selector: Option<&str>) -> Result<Arc<dyn Binder>, ResolutionError> {
        if let Some(selector) = selector.filter(|s| !s.is_empty()) {
            return self
                .binders
                .get(selector)
                .cloned()
                .ok_or_else(|| ResolutionError::UnknownBinder {
                    selector: selector.to_string(),
                });
        }

        match self.binders.len() {
            0 => Err(ResolutionError::NoBinderAvailable),
            1 => self
                .binders
                .values()
                .next()
                .cloned()
                .ok_or(ResolutionError::NoBinderAvailable),
            _ => match &self.default_binder {
                Some(default) => {
                    self.binders
                        .get(default)
                        .cloned()
                        .ok_or_else(|| ResolutionError::UnknownBinder {
                            selector: default.clone(),
                        })
                }
                None => Err(ResolutionError::AmbiguousBinderSelection {
                    available: self.names(),
                }),
            },
        }
    }

    /// Registered binder names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.binders.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.binders.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.binders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binders.is_empty()
    }
}
