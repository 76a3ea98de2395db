//! Class lifecycle tracking across sandboxes.
//!
//! Every method gets its own sandbox, but class-level setup must still run
//! once per class per run. The tracker remembers the first boundary-local
//! binding of each class (and the domain it lives in) so class-level
//! teardown can run against it when the whole run is over.

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::{Domain, Resolved};
use crate::types::TypeName;

/// A class whose class-level setup has been started.
#[derive(Debug, Clone)]
pub struct TrackedClass {
    pub class: Resolved,
    pub domain: Arc<Domain>,
    pub teardown_hooks: Vec<String>,
}

impl TrackedClass {
    pub fn name(&self) -> &TypeName {
        self.class.name()
    }
}

#[derive(Debug, Default)]
pub struct LifecycleTracker {
    seen: HashSet<TypeName>,
    order: Vec<TrackedClass>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `entry` unless its class is already tracked. Returns true for
    /// the first encounter, which is when class-level setup must run.
    pub fn record(&mut self, entry: TrackedClass) -> bool {
        if !self.seen.insert(entry.name().clone()) {
            return false;
        }
        log::debug!("class {} entered the run", entry.name());
        self.order.push(entry);
        true
    }

    pub fn contains(&self, class: &TypeName) -> bool {
        self.seen.contains(class)
    }

    /// Tracked class names in first-encounter order.
    pub fn classes(&self) -> Vec<TypeName> {
        self.order.iter().map(|e| e.name().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Takes every tracked class, in first-encounter order, and clears the
    /// tracker for the next run.
    pub fn drain(&mut self) -> Vec<TrackedClass> {
        self.seen.clear();
        std::mem::take(&mut self.order)
    }
}
