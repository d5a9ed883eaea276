//! System registry — tracks registered systems in registration order.
//!
//! A system's index in the registry is its registration order, which the
//! scheduler uses to break ties and to order systems within a batch.

use std::collections::HashMap;

use engine_system::SystemRunner;

use crate::error::ConfigError;

/// Registry of every system known to the runtime.
#[derive(Debug, Default)]
pub struct SystemRegistry {
    /// Runners in registration order.
    runners: Vec<SystemRunner>,
    /// Registration index keyed by system name.
    index: HashMap<String, usize>,
}

impl SystemRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system. Returns its registration index.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateSystem`] if the name is taken.
    pub fn register(&mut self, runner: SystemRunner) -> Result<usize, ConfigError> {
        let name = runner.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ConfigError::DuplicateSystem(name));
        }
        let position = self.runners.len();
        self.index.insert(name, position);
        self.runners.push(runner);
        Ok(position)
    }

    /// Registration index of a system.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns a system by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SystemRunner> {
        self.index_of(name).map(|i| &self.runners[i])
    }

    /// Returns an iterator over all systems in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SystemRunner> {
        self.runners.iter()
    }

    /// Mutable access to the systems at `indices`, in registration order.
    /// Indices that do not exist are skipped.
    pub fn batch_mut(&mut self, indices: &[usize]) -> Vec<&mut SystemRunner> {
        self.runners
            .iter_mut()
            .enumerate()
            .filter(|(i, _)| indices.contains(i))
            .map(|(_, runner)| runner)
            .collect()
    }

    /// Returns the number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    /// Returns `true` if no system is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}
