//! Per-invocation execution context provided to system functions.

use engine_component::{
    Command, CommandBuffer, Component, ComponentMut, ComponentRef, Entity, Event, EventBus, Query,
    QueryDescriptor, ReaderId, Res, ResMut, Resource, ResourceStore, World,
};

use crate::access::{AccessMode, AccessSignature};
use crate::error::AccessError;

/// Context provided to a system on each run.
///
/// The context is the only way a system reaches the stores, and it only
/// hands out what the system's [`AccessSignature`] declares. Structural
/// changes are recorded into the context's private [`CommandBuffer`] and
/// applied at the end of the stage.
pub struct SystemContext<'w> {
    name: &'w str,
    stage: &'w str,
    access: &'w AccessSignature,
    world: &'w World,
    resources: &'w ResourceStore,
    events: &'w EventBus,
    reader: ReaderId,
    commands: CommandBuffer,
    cycle: u64,
    last_run: u64,
    this_run: u64,
}

/// Where a context points into the stores.
#[derive(Debug, Clone, Copy)]
pub struct ContextStores<'w> {
    /// The entity store.
    pub world: &'w World,
    /// The resource store.
    pub resources: &'w ResourceStore,
    /// The event bus.
    pub events: &'w EventBus,
}

/// Identity and timing of one system run.
#[derive(Debug, Clone, Copy)]
pub struct RunInfo<'w> {
    /// System name.
    pub name: &'w str,
    /// Stage the system runs in.
    pub stage: &'w str,
    /// The system's declared access.
    pub access: &'w AccessSignature,
    /// The system's event reader.
    pub reader: ReaderId,
    /// Current cycle number.
    pub cycle: u64,
    /// Change tick of the system's previous successful run (0 if none).
    pub last_run: u64,
    /// Change tick of this run.
    pub this_run: u64,
}

impl<'w> SystemContext<'w> {
    /// Create a context for one system run.
    #[must_use]
    pub fn new(stores: ContextStores<'w>, run: RunInfo<'w>) -> Self {
        Self {
            name: run.name,
            stage: run.stage,
            access: run.access,
            world: stores.world,
            resources: stores.resources,
            events: stores.events,
            reader: run.reader,
            commands: CommandBuffer::new(),
            cycle: run.cycle,
            last_run: run.last_run,
            this_run: run.this_run,
        }
    }

    /// The running system's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// The stage the system runs in.
    #[must_use]
    pub fn stage(&self) -> &str {
        self.stage
    }

    /// The current cycle number.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Change tick of the system's previous successful run.
    #[must_use]
    pub fn last_run(&self) -> u64 {
        self.last_run
    }

    /// Change tick of this run. Writes made through the context are stamped
    /// with it.
    #[must_use]
    pub fn this_run(&self) -> u64 {
        self.this_run
    }

    // ── Entities ───────────────────────────────────────────────────

    /// Returns `true` if `entity` is alive. Needs no declaration.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.world.is_alive(entity)
    }

    /// Returns `true` if `entity` holds a `T`. Needs no declaration.
    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.world.has::<T>(entity)
    }

    /// Run a query. `Changed` filters compare against this system's previous
    /// run.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Component`] if the descriptor touches a
    /// component the signature does not declare.
    pub fn query(&self, descriptor: QueryDescriptor) -> Result<Query<'w>, AccessError> {
        let world = self.world;
        if let Some((type_id, mode)) = self.access.undeclared(&descriptor) {
            return Err(AccessError::Component {
                system: self.name.to_string(),
                component: world.registry().name_of(type_id),
                mode,
            });
        }
        Ok(world.query_since(descriptor, self.last_run, self.this_run))
    }

    /// Shared borrow of one entity's `T`. `Ok(None)` if the entity is dead,
    /// lacks the component or the value is exclusively borrowed.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Component`] if `T` is not declared.
    pub fn component<T: Component>(
        &self,
        entity: Entity,
    ) -> Result<Option<ComponentRef<'w, T>>, AccessError> {
        let world = self.world;
        if !self.access.reads_component(T::component_type_id()) {
            return Err(self.component_error::<T>(AccessMode::Read));
        }
        Ok(world.get::<T>(entity))
    }

    /// Exclusive borrow of one entity's `T`, marking it changed.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Component`] if `T` is not declared as written.
    pub fn component_mut<T: Component>(
        &self,
        entity: Entity,
    ) -> Result<Option<ComponentMut<'w, T>>, AccessError> {
        let world = self.world;
        if !self.access.writes_component(T::component_type_id()) {
            return Err(self.component_error::<T>(AccessMode::Write));
        }
        Ok(world.get_mut_stamped::<T>(entity, self.this_run))
    }

    fn component_error<T: Component>(&self, mode: AccessMode) -> AccessError {
        AccessError::Component {
            system: self.name.to_string(),
            component: T::type_name(),
            mode,
        }
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Shared borrow of the resource `T`. `Ok(None)` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Resource`] if `T` is not declared.
    pub fn resource<T: Resource>(&self) -> Result<Option<Res<'w, T>>, AccessError> {
        let resources = self.resources;
        if !self.access.reads_resource_type(T::resource_type_id()) {
            return Err(self.resource_error::<T>(AccessMode::Read));
        }
        Ok(resources.get::<T>())
    }

    /// Exclusive borrow of the resource `T`. `Ok(None)` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Resource`] if `T` is not declared as written.
    pub fn resource_mut<T: Resource>(&self) -> Result<Option<ResMut<'w, T>>, AccessError> {
        let resources = self.resources;
        if !self.access.writes_resource_type(T::resource_type_id()) {
            return Err(self.resource_error::<T>(AccessMode::Write));
        }
        Ok(resources.get_mut::<T>())
    }

    fn resource_error<T: Resource>(&self, mode: AccessMode) -> AccessError {
        AccessError::Resource {
            system: self.name.to_string(),
            resource: T::type_name(),
            mode,
        }
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Send an event. Readers see it from now until the end of the next
    /// cycle.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Event`] if sending `T` is not declared, or
    /// [`AccessError::Bus`] if `T` was never registered.
    pub fn send<T: Event>(&self, event: T) -> Result<(), AccessError> {
        if !self.access.sends_event(T::event_type_id()) {
            return Err(self.event_error::<T>(AccessMode::Send));
        }
        self.events.send(event)?;
        Ok(())
    }

    /// Every `T` this system has not read yet, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Event`] if receiving `T` is not declared, or
    /// [`AccessError::Bus`] if `T` was never registered.
    pub fn read_events<T: Event>(&self) -> Result<Vec<T>, AccessError> {
        if !self.access.receives_event(T::event_type_id()) {
            return Err(self.event_error::<T>(AccessMode::Receive));
        }
        Ok(self.events.read::<T>(self.reader)?)
    }

    fn event_error<T: Event>(&self, mode: AccessMode) -> AccessError {
        AccessError::Event {
            system: self.name.to_string(),
            event: T::type_name(),
            mode,
        }
    }

    // ── Commands ───────────────────────────────────────────────────

    /// This run's command buffer.
    pub fn commands(&mut self) -> &mut CommandBuffer {
        &mut self.commands
    }

    /// Record a raw command.
    pub fn record(&mut self, command: Command) {
        self.commands.record(command);
    }

    /// Consume the context, returning the recorded commands.
    #[must_use]
    pub fn into_commands(self) -> CommandBuffer {
        self.commands
    }
}

impl std::fmt::Debug for SystemContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("cycle", &self.cycle)
            .field("last_run", &self.last_run)
            .field("this_run", &self.this_run)
            .field("commands", &self.commands.len())
            .finish_non_exhaustive()
    }
}
