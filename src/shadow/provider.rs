//! Substitute providers.
//!
//! A provider contributes an ordered list of target → substitute mappings to
//! the process-wide base table. Providers are registered once at startup,
//! before the base table is first computed; the list is read exactly once.

use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;

use crate::types::TypeName;

pub trait ShadowProvider: Send + Sync {
    /// Human readable name used in diagnostics.
    fn name(&self) -> &str;

    /// Target → substitute pairs, in declaration order.
    fn shadows(&self) -> Vec<(TypeName, TypeName)>;
}

/// A provider backed by a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticShadowProvider {
    name: String,
    entries: Vec<(TypeName, TypeName)>,
}

impl StaticShadowProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn shadow(mut self, target: impl Into<TypeName>, substitute: impl Into<TypeName>) -> Self {
        self.entries.push((target.into(), substitute.into()));
        self
    }
}

impl ShadowProvider for StaticShadowProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn shadows(&self) -> Vec<(TypeName, TypeName)> {
        self.entries.clone()
    }
}

static PROVIDERS: Lazy<Mutex<Vec<Arc<dyn ShadowProvider>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Adds a provider to the process-wide list consulted by
/// [`SubstitutionTable::base`](crate::shadow::SubstitutionTable::base).
pub fn register_provider(provider: Arc<dyn ShadowProvider>) {
    log::debug!("registering substitute provider {}", provider.name());
    PROVIDERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(provider);
}

/// Snapshot of the registered providers, in registration order.
pub fn registered_providers() -> Vec<Arc<dyn ShadowProvider>> {
    PROVIDERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}
