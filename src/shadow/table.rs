//! # Substitution Table
//!
//! An immutable map from target type to substitute type. Tables are never
//! edited in place: [`SubstitutionTable::with_extras`] and the builder always
//! produce a new table, sharing structure with the one they started from.
//!
//! ## Base table
//! The process-wide base is built from the registered
//! [`ShadowProvider`](super::ShadowProvider)s the first time
//! [`SubstitutionTable::base`] is called, and then shared read-only by every
//! sandbox. Two providers mapping the same target is a configuration error
//! reported at that point. [`SubstitutionTable::reset_base`] discards the
//! cached base so engine tests can rebuild it.
//!
//! ## Extras
//! Extra substitutes are host types that declare their own target. They are
//! layered over the base in order, so a method-scope extra replaces a
//! class-scope or base mapping for the same target.

use std::sync::{Arc, PoisonError, RwLock};

use im::HashMap;
use once_cell::sync::Lazy;

use super::provider::{registered_providers, ShadowProvider};
use crate::errors::{Result, SandboxError};
use crate::types::{TypeName, TypeRegistry};

static BASE_TABLE: Lazy<RwLock<Option<Arc<SubstitutionTable>>>> = Lazy::new(|| RwLock::new(None));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionTable {
    entries: HashMap<TypeName, TypeName>,
}

impl SubstitutionTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merges provider mappings, rejecting any target claimed twice.
    pub fn from_providers(providers: &[Arc<dyn ShadowProvider>]) -> Result<Self> {
        let mut entries = HashMap::new();
        for provider in providers {
            for (target, substitute) in provider.shadows() {
                if let Some(first) = entries.get(&target) {
                    if *first != substitute {
                        return Err(SandboxError::ProviderCollision {
                            target,
                            first: TypeName::clone(first),
                            second: substitute,
                        });
                    }
                    continue;
                }
                entries.insert(target, substitute);
            }
        }
        Ok(Self { entries })
    }

    /// The process-wide base table, computed from the registered providers
    /// on first use.
    pub fn base() -> Result<Arc<Self>> {
        if let Some(table) = BASE_TABLE
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(table.clone());
        }
        let mut slot = BASE_TABLE.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = slot.as_ref() {
            return Ok(table.clone());
        }
        let providers = registered_providers();
        let table = Arc::new(Self::from_providers(&providers)?);
        log::debug!(
            "base substitution table built from {} provider(s) with {} entries",
            providers.len(),
            table.len()
        );
        *slot = Some(table.clone());
        Ok(table)
    }

    /// Drops the cached base table. The next [`base`](Self::base) call
    /// rebuilds it from whatever providers are registered then.
    pub fn reset_base() {
        *BASE_TABLE.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Reads the target an extra substitute declares for itself.
    pub fn declared_target(host: &TypeRegistry, substitute: &TypeName) -> Result<TypeName> {
        let def = host.require(substitute)?;
        match def.substitutes() {
            Some(target) if !target.as_str().is_empty() && target != substitute => {
                Ok(target.clone())
            }
            _ => Err(SandboxError::InvalidSubstitute {
                substitute: substitute.clone(),
            }),
        }
    }

    /// A new table: this one plus the mappings declared by `extras`.
    pub fn with_extras(&self, host: &TypeRegistry, extras: &[TypeName]) -> Result<Self> {
        let mut builder = self.builder();
        for extra in extras {
            builder = builder.add_substitute(host, extra)?;
        }
        Ok(builder.build())
    }

    pub fn builder(&self) -> SubstitutionTableBuilder {
        SubstitutionTableBuilder {
            entries: self.entries.clone(),
        }
    }

    pub fn substitute_for(&self, target: &TypeName) -> Option<&TypeName> {
        self.entries.get(target)
    }

    pub fn contains_target(&self, target: &TypeName) -> bool {
        self.entries.contains_key(target)
    }

    /// Entries sorted by target name.
    pub fn entries(&self) -> Vec<(TypeName, TypeName)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(t, s)| (t.clone(), s.clone()))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Layers extra mappings over an existing table.
#[derive(Debug, Clone)]
pub struct SubstitutionTableBuilder {
    entries: HashMap<TypeName, TypeName>,
}

impl SubstitutionTableBuilder {
    /// Adds a self-declaring substitute from the host registry.
    pub fn add_substitute(mut self, host: &TypeRegistry, substitute: &TypeName) -> Result<Self> {
        let target = SubstitutionTable::declared_target(host, substitute)?;
        self.entries.insert(target, substitute.clone());
        Ok(self)
    }

    /// Adds an explicit mapping.
    pub fn map(mut self, target: impl Into<TypeName>, substitute: impl Into<TypeName>) -> Self {
        self.entries.insert(target.into(), substitute.into());
        self
    }

    pub fn build(self) -> SubstitutionTable {
        SubstitutionTable {
            entries: self.entries,
        }
    }
}
