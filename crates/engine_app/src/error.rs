//! Runtime error types.

use engine_component::RegistryError;

/// A fatal configuration problem, detected before any system runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Explicit `before`/`after` constraints form a cycle.
    #[error("ordering constraints in stage '{stage}' form a cycle: {}", .systems.join(" -> "))]
    OrderingCycle {
        /// Stage holding the cycle.
        stage: String,
        /// The systems on the cycle, in constraint order, first repeated last.
        systems: Vec<String>,
    },

    /// A stage with this name already exists.
    #[error("stage '{0}' is already defined")]
    DuplicateStage(String),

    /// A stage with this name does not exist.
    #[error("stage '{0}' is not defined")]
    UnknownStage(String),

    /// A system with this name is already registered.
    #[error("system '{0}' is already registered")]
    DuplicateSystem(String),

    /// A constraint names a system that is not registered.
    #[error("system '{system}' is ordered against unknown system '{other}'")]
    UnknownSystem {
        /// The constrained system.
        system: String,
        /// The missing system.
        other: String,
    },

    /// A system is ordered against itself.
    #[error("system '{0}' is ordered against itself")]
    SelfConstraint(String),

    /// A constraint across stages contradicts the stage order.
    #[error(
        "system '{system}' in stage '{stage}' cannot run {relation} '{other}' in stage '{other_stage}'"
    )]
    CrossStageConstraint {
        /// The constrained system.
        system: String,
        /// Its stage.
        stage: String,
        /// `"before"` or `"after"`.
        relation: &'static str,
        /// The other system.
        other: String,
        /// The other system's stage.
        other_stage: String,
    },

    /// A runtime setting could not be parsed.
    #[error("invalid value '{value}' for setting '{key}'")]
    InvalidSetting {
        /// Setting or environment variable name.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// A JSON runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Json(String),

    /// A type was registered twice.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors returned by [`Runtime`](crate::Runtime) operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The worker pool could not be built.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
