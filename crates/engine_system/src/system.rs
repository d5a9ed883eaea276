//! The callable half of a system.

use crate::context::SystemContext;

/// A unit of logic run once per cycle in its stage.
///
/// Implemented for every `FnMut(&mut SystemContext) -> anyhow::Result<()>`
/// closure, and by hand for systems that keep private state across runs.
pub trait System: Send + 'static {
    /// Run once.
    ///
    /// # Errors
    ///
    /// Any error aborts this run only; the runtime records it as a failure
    /// of this system.
    fn run(&mut self, ctx: &mut SystemContext<'_>) -> anyhow::Result<()>;
}

impl<F> System for F
where
    F: FnMut(&mut SystemContext<'_>) -> anyhow::Result<()> + Send + 'static,
{
    fn run(&mut self, ctx: &mut SystemContext<'_>) -> anyhow::Result<()> {
        self(ctx)
    }
}
