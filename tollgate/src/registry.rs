//! In-memory rule registry.
//!
//! Holds the rules this process serves, keyed by name. The registry is the
//! read path for every token operation; writes come from the store watch and
//! from administrative reloads.
//!
//! # Pre-conditions
//! - Only fully built `Rule`s are inserted.
//!
//! # Post-conditions
//! - Lookups return a shared handle that stays valid after the entry is
//!   replaced or removed.
//!
//! # Invariants
//! - Entries are swapped as whole `Arc`s, so readers never observe a
//!   partially built rule.
//! - No lock is held across an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::rule::{Rule, RuleDefinition};

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A rule with this name is already registered.
    AlreadyExists(String),
    /// The registry lock was poisoned by a panicking writer.
    LockPoisoned,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists(name) => write!(f, "rule already exists: {name}"),
            Self::LockPoisoned => write!(f, "rule registry lock poisoned"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Concurrency-safe map from rule name to rule.
///
/// # Thread Safety
///
/// Backed by an `RwLock`; many concurrent readers, exclusive writers.
pub struct RuleRegistry {
    rules: RwLock<HashMap<String, Arc<Rule>>>,
}

impl RuleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a rule by name.
    ///
    /// # Errors
    /// Returns `RegistryError::LockPoisoned` if the lock is poisoned.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn get(&self, name: &str) -> Result<Option<Arc<Rule>>, RegistryError> {
        let rules = self.rules.read().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(rules.get(name).map(Arc::clone))
    }

    /// Insert or replace a rule. Returns the previous entry, if any.
    ///
    /// # Errors
    /// Returns `RegistryError::LockPoisoned` if the lock is poisoned.
    pub fn put(&self, rule: Rule) -> Result<Option<Arc<Rule>>, RegistryError> {
        let mut rules = self.rules.write().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(rules.insert(rule.name().to_string(), Arc::new(rule)))
    }

    /// Insert a rule only if the name is free.
    ///
    /// # Errors
    /// Returns `RegistryError::AlreadyExists` if the name is taken.
    pub fn insert_new(&self, rule: Rule) -> Result<(), RegistryError> {
        let mut rules = self.rules.write().map_err(|_| RegistryError::LockPoisoned)?;
        if rules.contains_key(rule.name()) {
            return Err(RegistryError::AlreadyExists(rule.name().to_string()));
        }
        rules.insert(rule.name().to_string(), Arc::new(rule));
        Ok(())
    }

    /// Remove a rule. Removing an absent name is not an error.
    ///
    /// Returns whether an entry was removed.
    ///
    /// # Errors
    /// Returns `RegistryError::LockPoisoned` if the lock is poisoned.
    pub fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        let mut rules = self.rules.write().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(rules.remove(name).is_some())
    }

    /// # Errors
    /// Returns `RegistryError::LockPoisoned` if the lock is poisoned.
    pub fn contains(&self, name: &str) -> Result<bool, RegistryError> {
        let rules = self.rules.read().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(rules.contains_key(name))
    }

    /// # Errors
    /// Returns `RegistryError::LockPoisoned` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, RegistryError> {
        let rules = self.rules.read().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(rules.len())
    }

    /// # Errors
    /// Returns `RegistryError::LockPoisoned` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        self.len().map(|len| len == 0)
    }

    /// Snapshot of every persisted definition, ordered by name.
    ///
    /// # Errors
    /// Returns `RegistryError::LockPoisoned` if the lock is poisoned.
    pub fn export_all(&self) -> Result<BTreeMap<String, RuleDefinition>, RegistryError> {
        let rules = self.rules.read().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(rules
            .iter()
            .map(|(name, rule)| (name.clone(), rule.definition().clone()))
            .collect())
    }

    /// Replace the whole contents with `rules`.
    ///
    /// # Post-conditions
    /// - Exactly the given rules are registered; later duplicates win.
    ///
    /// # Errors
    /// Returns `RegistryError::LockPoisoned` if the lock is poisoned.
    pub fn replace_all(&self, rules: Vec<Rule>) -> Result<(), RegistryError> {
        let fresh: HashMap<String, Arc<Rule>> = rules
            .into_iter()
            .map(|rule| (rule.name().to_string(), Arc::new(rule)))
            .collect();
        let mut current = self.rules.write().map_err(|_| RegistryError::LockPoisoned)?;
        *current = fresh;
        Ok(())
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
