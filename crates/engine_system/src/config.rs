//! System configuration.

use serde::{Deserialize, Serialize};

use crate::access::AccessSignature;

/// Stage a system lands in when none is given.
pub const DEFAULT_STAGE: &str = "update";

/// Everything the runtime needs to know about a system besides its code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Human-readable system name (e.g. `"physics"`). Unique per runtime.
    pub name: String,
    /// The data access requirements of this system.
    pub access: AccessSignature,
    /// Stage the system runs in.
    pub stage: String,
    /// Systems in the same stage this one must run before.
    pub before: Vec<String>,
    /// Systems in the same stage this one must run after.
    pub after: Vec<String>,
}

impl SystemConfig {
    /// Create a new system config with the given name and access signature,
    /// placed in [`DEFAULT_STAGE`].
    #[must_use]
    pub fn new(name: impl Into<String>, access: AccessSignature) -> Self {
        Self {
            name: name.into(),
            access,
            stage: DEFAULT_STAGE.to_string(),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Run the system in `stage`.
    #[must_use]
    pub fn in_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    /// Order this system before `system`.
    #[must_use]
    pub fn before(mut self, system: impl Into<String>) -> Self {
        self.before.push(system.into());
        self
    }

    /// Order this system after `system`.
    #[must_use]
    pub fn after(mut self, system: impl Into<String>) -> Self {
        self.after.push(system.into());
        self
    }
}
