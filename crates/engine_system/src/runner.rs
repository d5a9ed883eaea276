//! System runner: one registered system and the state it keeps between runs.
//!
//! The runner owns the system's callable, its configuration, its event
//! reader and the change tick of its last successful run. Each call to
//! [`SystemRunner::run`] performs exactly one invocation and hands back the
//! result together with the commands the system recorded.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::trace;

use engine_component::{CommandBuffer, EventBus, ReaderId, ResourceStore, World};

use crate::config::SystemConfig;
use crate::context::{ContextStores, RunInfo, SystemContext};
use crate::error::SystemFailure;
use crate::system::System;

/// The result of one system invocation.
#[derive(Debug)]
pub struct SystemOutcome {
    /// `Err` if the system returned an error or panicked.
    pub result: Result<(), SystemFailure>,
    /// Commands the system recorded, in recording order.
    pub commands: CommandBuffer,
    /// Wall time spent inside the system.
    pub elapsed: Duration,
}

/// A registered system, ready to run.
pub struct SystemRunner {
    config: SystemConfig,
    system: Box<dyn System>,
    reader: ReaderId,
    last_run: u64,
    runs: u64,
}

impl SystemRunner {
    /// Create a new system runner.
    #[must_use]
    pub fn new(config: SystemConfig, system: Box<dyn System>) -> Self {
        Self {
            config,
            system,
            reader: ReaderId::new(),
            last_run: 0,
            runs: 0,
        }
    }

    /// Returns the system name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the system configuration.
    #[must_use]
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// The reader id the system's event reads go through.
    #[must_use]
    pub fn reader(&self) -> ReaderId {
        self.reader
    }

    /// Change tick of the last successful run, 0 before the first.
    #[must_use]
    pub fn last_run(&self) -> u64 {
        self.last_run
    }

    /// Number of completed invocations, failed ones included.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Invoke the system once.
    ///
    /// Errors and panics are caught and reported in the outcome; they never
    /// propagate. A failed run does not advance the system's last-run tick,
    /// so changes it missed are offered again on the next run.
    pub fn run(
        &mut self,
        world: &World,
        resources: &ResourceStore,
        events: &EventBus,
        cycle: u64,
    ) -> SystemOutcome {
        let this_run = world.increment_change_tick();
        let start = Instant::now();

        let mut ctx = SystemContext::new(
            ContextStores {
                world,
                resources,
                events,
            },
            RunInfo {
                name: &self.config.name,
                stage: &self.config.stage,
                access: &self.config.access,
                reader: self.reader,
                cycle,
                last_run: self.last_run,
                this_run,
            },
        );
        let system = &mut self.system;
        let result = match panic::catch_unwind(AssertUnwindSafe(|| system.run(&mut ctx))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(format!("{err:#}")),
            Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
        };
        let commands = ctx.into_commands();
        let elapsed = start.elapsed();

        self.runs += 1;
        let result = result.map_err(|message| SystemFailure {
            system: self.config.name.clone(),
            stage: self.config.stage.clone(),
            message,
        });
        if result.is_ok() {
            self.last_run = this_run;
        }

        trace!(
            system = self.config.name,
            cycle,
            tick = this_run,
            ok = result.is_ok(),
            commands = commands.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "system ran"
        );

        SystemOutcome {
            result,
            commands,
            elapsed,
        }
    }
}

impl std::fmt::Debug for SystemRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemRunner")
            .field("config", &self.config)
            .field("reader", &self.reader)
            .field("last_run", &self.last_run)
            .field("runs", &self.runs)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use engine_component::{Component, ComponentValue, QueryDescriptor};

    use super::*;
    use crate::access::AccessSignature;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Counter(u32);

    impl Component for Counter {
        fn type_name() -> &'static str {
            "Counter"
        }
    }

    fn stores() -> (World, ResourceStore, EventBus) {
        let mut world = World::new();
        world.register_component::<Counter>().unwrap();
        world.spawn([ComponentValue::new(Counter(0))]).unwrap();
        (world, ResourceStore::new(), EventBus::new())
    }

    fn counting_runner() -> SystemRunner {
        let config = SystemConfig::new("count", AccessSignature::new().writes::<Counter>());
        SystemRunner::new(
            config,
            Box::new(|ctx: &mut SystemContext<'_>| -> anyhow::Result<()> {
                ctx.query(QueryDescriptor::new().write(Counter::component_type_id()))?
                    .for_each(|mut row| {
                        if let Some(counter) = row.get_mut::<Counter>() {
                            counter.0 += 1;
                        }
                    })?;
                Ok(())
            }),
        )
    }

    #[test]
    fn test_runner_runs_system() {
        let (world, resources, events) = stores();
        let mut runner = counting_runner();
        assert_eq!(runner.name(), "count");

        let outcome = runner.run(&world, &resources, &events, 1);
        assert!(outcome.result.is_ok());
        assert!(outcome.commands.is_empty());
        assert_eq!(runner.runs(), 1);
        assert!(runner.last_run() > 0);

        let counter = world.query(QueryDescriptor::new().read(Counter::component_type_id()));
        counter
            .for_each(|row| assert_eq!(row.get::<Counter>(), Some(&Counter(1))))
            .unwrap();
    }

    #[test]
    fn test_error_becomes_failure() {
        let (world, resources, events) = stores();
        let config = SystemConfig::new("broken", AccessSignature::new());
        let mut runner = SystemRunner::new(
            config,
            Box::new(|_: &mut SystemContext<'_>| -> anyhow::Result<()> {
                anyhow::bail!("out of fuel")
            }),
        );
        let outcome = runner.run(&world, &resources, &events, 3);
        let failure = outcome.result.unwrap_err();
        assert_eq!(failure.system, "broken");
        assert_eq!(failure.stage, "update");
        assert_eq!(failure.message, "out of fuel");
        assert_eq!(runner.last_run(), 0);
    }

    #[test]
    fn test_panic_is_caught() {
        let (world, resources, events) = stores();
        let config = SystemConfig::new("panicky", AccessSignature::new());
        let mut runner = SystemRunner::new(
            config,
            Box::new(|_: &mut SystemContext<'_>| -> anyhow::Result<()> {
                panic!("boom");
            }),
        );
        let outcome = runner.run(&world, &resources, &events, 1);
        let failure = outcome.result.unwrap_err();
        assert!(failure.message.contains("boom"));
        assert_eq!(runner.runs(), 1);
    }

    #[test]
    fn test_undeclared_access_fails_the_run() {
        let (world, resources, events) = stores();
        let config = SystemConfig::new("sneaky", AccessSignature::new());
        let mut runner = SystemRunner::new(
            config,
            Box::new(|ctx: &mut SystemContext<'_>| -> anyhow::Result<()> {
                ctx.query(QueryDescriptor::new().write(Counter::component_type_id()))?;
                Ok(())
            }),
        );
        let failure = runner
            .run(&world, &resources, &events, 1)
            .result
            .unwrap_err();
        assert!(failure.message.contains("Counter"));
    }

    #[test]
    fn test_commands_are_returned() {
        let (world, resources, events) = stores();
        let config = SystemConfig::new("spawner", AccessSignature::new());
        let mut runner = SystemRunner::new(
            config,
            Box::new(|ctx: &mut SystemContext<'_>| -> anyhow::Result<()> {
                ctx.commands().spawn([ComponentValue::new(Counter(9))]);
                Ok(())
            }),
        );
        let outcome = runner.run(&world, &resources, &events, 1);
        assert_eq!(outcome.commands.len(), 1);
        assert_eq!(world.entity_count(), 1);
    }
}
