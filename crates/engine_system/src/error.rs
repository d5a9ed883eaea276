//! System-level error types.

use engine_component::EventError;

use crate::access::AccessMode;

/// A system tried to touch data its signature does not declare.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// Undeclared component access.
    #[error("system '{system}' did not declare {mode} access to component '{component}'")]
    Component {
        /// The offending system.
        system: String,
        /// Name of the component.
        component: &'static str,
        /// The access attempted.
        mode: AccessMode,
    },

    /// Undeclared resource access.
    #[error("system '{system}' did not declare {mode} access to resource '{resource}'")]
    Resource {
        /// The offending system.
        system: String,
        /// Name of the resource.
        resource: &'static str,
        /// The access attempted.
        mode: AccessMode,
    },

    /// Undeclared event access.
    #[error("system '{system}' did not declare {mode} access to event '{event}'")]
    Event {
        /// The offending system.
        system: String,
        /// Name of the event type.
        event: &'static str,
        /// The access attempted.
        mode: AccessMode,
    },

    /// The event bus rejected the access.
    #[error(transparent)]
    Bus(#[from] EventError),
}

/// A system run that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("system '{system}' failed in stage '{stage}': {message}")]
pub struct SystemFailure {
    /// Name of the failed system.
    pub system: String,
    /// Stage the system ran in.
    pub stage: String,
    /// The error or panic message.
    pub message: String,
}
