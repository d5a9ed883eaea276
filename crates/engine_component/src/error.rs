//! Storage-layer error types.

use crate::component::ComponentTypeId;
use crate::entity::Entity;
use crate::resource::ResourceTypeId;

/// Errors raised when registering component, resource or event types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The type key is already registered.
    #[error("{kind} type '{name}' is already registered")]
    Duplicate {
        /// `"component"` or `"event"`.
        kind: &'static str,
        /// Name of the type already holding the key.
        name: &'static str,
    },
}

/// Errors raised by entity store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// The entity is dead, stale or was never allocated.
    #[error("{0} not found")]
    NotFound(Entity),

    /// The component type was never registered.
    #[error("component {0} is not registered")]
    UnregisteredComponent(ComponentTypeId),

    /// The entity does not hold the component.
    #[error("{entity} has no component '{component}'")]
    MissingComponent {
        /// The entity looked up.
        entity: Entity,
        /// Name of the missing component.
        component: &'static str,
    },

    /// Every entity index is in use.
    #[error("entity index space exhausted")]
    EntitiesExhausted,

    /// A value did not match the Rust type registered for its key.
    #[error("value does not match the registered type of component '{component}'")]
    TypeMismatch {
        /// Name of the component.
        component: &'static str,
    },
}

/// Errors raised while iterating a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// A column the query needs is already borrowed incompatibly, which
    /// only happens when one system nests conflicting queries.
    #[error("component '{component}' is already borrowed")]
    Borrowed {
        /// Name of the contended component.
        component: &'static str,
    },
}

/// Errors raised by resource store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// No resource of this type is present.
    #[error("resource {0} not found")]
    NotFound(ResourceTypeId),

    /// The stored value did not match the requested Rust type.
    #[error("resource '{0}' has a different type than requested")]
    TypeMismatch(&'static str),
}

/// Errors raised by the event bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// The event type was never registered.
    #[error("event type '{0}' is not registered")]
    Unregistered(&'static str),
}

/// Why one recorded command could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandFailure {
    /// Entity store rejected the command.
    #[error(transparent)]
    World(#[from] WorldError),

    /// Resource store rejected the command.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// A single command that failed during the apply phase. The command was
/// skipped; the commands after it were still applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("command #{index} ({kind}) skipped: {source}")]
pub struct CommandError {
    /// Position of the command in its buffer.
    pub index: usize,
    /// Short name of the command kind, e.g. `"insert"`.
    pub kind: &'static str,
    /// The underlying failure.
    pub source: CommandFailure,
}
