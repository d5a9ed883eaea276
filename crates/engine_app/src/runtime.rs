//! The runtime: stores, stage graph, systems and the cycle loop.
//!
//! One call to [`Runtime::run_cycle`] executes every stage once:
//!
//! 1. Rebuild the schedule if a system or stage was added.
//! 2. For each stage, run its batches one after another. Systems of a batch
//!    run concurrently on the worker pool.
//! 3. At the stage boundary, apply the stage's command buffers in
//!    batch-then-registration order.
//! 4. Rotate the event buffers and advance the cycle counter.
//!
//! If any system of a stage fails, the rest of that stage is skipped, its
//! commands are discarded and later stages do not run. Step 4 still happens.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use engine_component::{
    CommandBuffer, CommandError, Component, ComponentInfo, ComponentTypeId, Event, EventBus,
    EventTypeId, Resource, ResourceStore, World,
};
use engine_system::{System, SystemConfig, SystemContext, SystemFailure, SystemRunner};

use crate::config::RuntimeConfig;
use crate::error::{ConfigError, RuntimeError};
use crate::registry::SystemRegistry;
use crate::scheduler::{self, Schedule};
use crate::stage::{StageGraph, StagePosition};
use crate::worker::WorkerPool;

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The cycle number, starting at 1.
    pub cycle: u64,
    /// Every system failure of the cycle.
    pub failures: Vec<SystemFailure>,
    /// Commands that could not be applied.
    pub command_errors: Vec<CommandError>,
    /// Stages that ran to completion, in order.
    pub completed_stages: Vec<String>,
    /// The stage that was cut short by a failure, if any.
    pub aborted_stage: Option<String>,
    /// Commands dropped because their stage was aborted.
    pub discarded_commands: usize,
    /// Wall time of the cycle.
    pub elapsed: Duration,
}

impl CycleReport {
    /// Returns `true` if no system failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The ECS runtime.
pub struct Runtime {
    config: RuntimeConfig,
    world: World,
    resources: ResourceStore,
    events: EventBus,
    stages: StageGraph,
    registry: SystemRegistry,
    pool: WorkerPool,
    /// Cached schedule; `None` when a system or stage was added since the
    /// last build.
    schedule: Option<Schedule>,
    cycle: u64,
}

impl Runtime {
    /// Create a runtime with the default stages.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::WorkerPool`] if the worker threads could not
    /// be started.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::with_stages(config, StageGraph::with_defaults())
    }

    /// Create a runtime with no stages.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::WorkerPool`] if the worker threads could not
    /// be started.
    pub fn empty(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::with_stages(config, StageGraph::new())
    }

    fn with_stages(config: RuntimeConfig, stages: StageGraph) -> Result<Self, RuntimeError> {
        let pool = WorkerPool::new(config.worker_threads)?;
        info!(
            worker_threads = pool.threads(),
            stages = stages.len(),
            "runtime created"
        );
        Ok(Self {
            config,
            world: World::new(),
            resources: ResourceStore::new(),
            events: EventBus::new(),
            stages,
            registry: SystemRegistry::new(),
            pool,
            schedule: None,
            cycle: 0,
        })
    }

    // ── Registration ──────────────────────────────────────────────

    /// Register a component type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Registry`] if the type is already registered.
    pub fn register_component<T: Component>(&mut self) -> Result<ComponentTypeId, ConfigError> {
        Ok(self.world.register_component::<T>()?)
    }

    /// Register a component type from an explicit descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Registry`] if the type is already registered.
    pub fn register_component_info(
        &mut self,
        info: ComponentInfo,
    ) -> Result<ComponentTypeId, ConfigError> {
        Ok(self.world.register_component_info(info)?)
    }

    /// Register an event type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Registry`] if the type is already registered.
    pub fn register_event<T: Event>(&mut self) -> Result<EventTypeId, ConfigError> {
        Ok(self.events.register::<T>()?)
    }

    /// Insert a resource, replacing any existing instance. Returns `true` if
    /// one was replaced.
    pub fn insert_resource<T: Resource>(&mut self, value: T) -> bool {
        self.resources.insert(value)
    }

    /// Insert a stage into the stage graph.
    ///
    /// # Errors
    ///
    /// See [`StageGraph::define`].
    pub fn define_stage(
        &mut self,
        name: impl Into<String>,
        position: StagePosition,
    ) -> Result<(), ConfigError> {
        self.stages.define(name, position)?;
        self.schedule = None;
        Ok(())
    }

    /// Add a closure system. Returns its registration index.
    ///
    /// Stage and constraints are validated when the schedule is next built.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateSystem`] if the name is taken.
    pub fn add_system<F>(&mut self, config: SystemConfig, system: F) -> Result<usize, ConfigError>
    where
        F: FnMut(&mut SystemContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.add_boxed_system(config, Box::new(system))
    }

    /// Add a system of any [`System`] type. Returns its registration index.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateSystem`] if the name is taken.
    pub fn add_boxed_system(
        &mut self,
        config: SystemConfig,
        system: Box<dyn System>,
    ) -> Result<usize, ConfigError> {
        let name = config.name.clone();
        let stage = config.stage.clone();
        let index = self.registry.register(SystemRunner::new(config, system))?;
        self.schedule = None;
        debug!(system = name, stage, index, "system added");
        Ok(index)
    }

    // ── Accessors ─────────────────────────────────────────────────

    /// Returns the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns a reference to the world.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Returns a mutable reference to the world.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Returns a reference to the resource store.
    #[must_use]
    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    /// Returns a mutable reference to the resource store.
    pub fn resources_mut(&mut self) -> &mut ResourceStore {
        &mut self.resources
    }

    /// Returns a reference to the event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns the stage graph.
    #[must_use]
    pub fn stages(&self) -> &StageGraph {
        &self.stages
    }

    /// Returns the system registry.
    #[must_use]
    pub fn registry(&self) -> &SystemRegistry {
        &self.registry
    }

    /// Number of cycles run so far.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Returns the current schedule, rebuilding it if necessary.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] found while building.
    pub fn schedule(&mut self) -> Result<&Schedule, ConfigError> {
        let schedule = self.take_schedule()?;
        Ok(self.schedule.insert(schedule))
    }

    fn take_schedule(&mut self) -> Result<Schedule, ConfigError> {
        match self.schedule.take() {
            Some(schedule) => Ok(schedule),
            None => scheduler::build_schedule(&self.stages, &self.registry),
        }
    }

    // ── Cycle ─────────────────────────────────────────────────────

    /// Run every stage once.
    ///
    /// System failures do not make this return `Err`; they are listed in the
    /// report.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Config`] if the schedule cannot be built. No
    /// system runs in that case.
    pub fn run_cycle(&mut self) -> Result<CycleReport, RuntimeError> {
        let schedule = self.take_schedule()?;
        let start = Instant::now();
        self.cycle += 1;
        let cycle = self.cycle;

        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };

        let Self {
            world,
            resources,
            events,
            registry,
            pool,
            ..
        } = &mut *self;

        for stage in &schedule.stages {
            debug!(
                cycle,
                stage = stage.name,
                batches = stage.batches.len(),
                "stage start"
            );

            let mut buffers: Vec<CommandBuffer> = Vec::new();
            let mut failed = false;
            for (batch_index, batch) in stage.batches.iter().enumerate() {
                debug!(
                    cycle,
                    stage = stage.name,
                    batch = batch_index,
                    systems = batch.system_indices.len(),
                    "dispatching batch"
                );

                let runners = registry.batch_mut(&batch.system_indices);
                let outcomes = pool.run_batch(runners, world, resources, events, cycle);
                for outcome in outcomes {
                    if let Err(failure) = outcome.result {
                        warn!(
                            cycle,
                            stage = failure.stage,
                            system = failure.system,
                            error = failure.message,
                            "system failed"
                        );
                        report.failures.push(failure);
                        failed = true;
                    }
                    buffers.push(outcome.commands);
                }
                if failed {
                    break;
                }
            }

            if failed {
                report.discarded_commands = buffers.iter().map(CommandBuffer::len).sum();
                warn!(
                    cycle,
                    stage = stage.name,
                    discarded_commands = report.discarded_commands,
                    "stage aborted, skipping remaining stages"
                );
                report.aborted_stage = Some(stage.name.clone());
                break;
            }

            for mut buffer in buffers {
                if buffer.is_empty() {
                    continue;
                }
                let commands = buffer.len();
                let errors = buffer.apply(world, resources);
                debug!(
                    cycle,
                    stage = stage.name,
                    commands,
                    errors = errors.len(),
                    "applied command buffer"
                );
                report.command_errors.extend(errors);
            }
            report.completed_stages.push(stage.name.clone());
        }

        events.update();
        self.schedule = Some(schedule);
        report.elapsed = start.elapsed();

        debug!(
            cycle,
            failures = report.failures.len(),
            command_errors = report.command_errors.len(),
            elapsed_us = report.elapsed.as_micros() as u64,
            "cycle complete"
        );
        Ok(report)
    }

    /// Run cycles at the configured rate until `max_cycles` is reached, or
    /// forever if it is 0. Returns the number of cycles run.
    ///
    /// System failures are logged and the loop continues.
    ///
    /// # Errors
    ///
    /// Returns the first [`RuntimeError`] from [`run_cycle`](Self::run_cycle).
    pub fn run(&mut self) -> Result<u64, RuntimeError> {
        let cycle_duration = self.config.cycle_duration();
        let max_cycles = self.config.max_cycles;
        let mut cycle_count = 0u64;

        info!(
            cycle_rate = self.config.cycle_rate,
            max_cycles, "starting cycle loop"
        );

        loop {
            let start = Instant::now();

            let report = self.run_cycle()?;
            if !report.is_success() {
                warn!(
                    cycle = report.cycle,
                    failures = report.failures.len(),
                    aborted_stage = report.aborted_stage.as_deref().unwrap_or(""),
                    "cycle finished with failures"
                );
            }

            cycle_count += 1;
            if max_cycles > 0 && cycle_count >= max_cycles {
                info!(cycles = cycle_count, "cycle loop complete");
                return Ok(cycle_count);
            }

            let Some(budget) = cycle_duration else {
                continue;
            };
            let elapsed = start.elapsed();
            if elapsed < budget {
                std::thread::sleep(budget - elapsed);
            } else {
                warn!(
                    cycle = report.cycle,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = budget.as_millis() as u64,
                    "cycle exceeded time budget"
                );
            }
        }
    }
}
