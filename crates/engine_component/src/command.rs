//! Deferred structural mutations.
//!
//! Systems run against a shared `&World`, so they cannot spawn, destroy or
//! reshape entities directly. Instead each system records [`Command`]s into
//! its own [`CommandBuffer`]; the runtime applies the buffers at the end of
//! the stage, in a fixed order, with exclusive access to the world.
//!
//! A command that cannot be applied (for example one that targets an entity
//! destroyed earlier in the same apply pass) is skipped and reported; it never
//! aborts the commands after it.

use tracing::trace;

use crate::component::{Component, ComponentTypeId, ComponentValue};
use crate::entity::Entity;
use crate::error::{CommandError, CommandFailure};
use crate::resource::{Resource, ResourceStore, ResourceTypeId, ResourceValue};
use crate::world::World;

/// One deferred mutation.
#[derive(Debug)]
pub enum Command {
    /// Create an entity with the given components.
    Spawn(Vec<ComponentValue>),
    /// Destroy an entity.
    Destroy(Entity),
    /// Add or replace one component on an entity.
    Insert {
        /// Target entity.
        entity: Entity,
        /// The value to store.
        component: ComponentValue,
    },
    /// Remove one component from an entity.
    Remove {
        /// Target entity.
        entity: Entity,
        /// The component type to remove.
        component: ComponentTypeId,
    },
    /// Insert or replace a resource.
    InsertResource(ResourceValue),
    /// Remove a resource.
    RemoveResource(ResourceTypeId),
}

impl Command {
    /// Short name used in logs and errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Spawn(_) => "spawn",
            Command::Destroy(_) => "destroy",
            Command::Insert { .. } => "insert",
            Command::Remove { .. } => "remove",
            Command::InsertResource(_) => "insert_resource",
            Command::RemoveResource(_) => "remove_resource",
        }
    }

    fn apply(self, world: &mut World, resources: &mut ResourceStore) -> Result<(), CommandFailure> {
        match self {
            Command::Spawn(components) => {
                world.spawn(components)?;
            }
            Command::Destroy(entity) => world.destroy(entity)?,
            Command::Insert { entity, component } => world.insert_value(entity, component)?,
            Command::Remove { entity, component } => {
                world.remove_component(entity, component)?;
            }
            Command::InsertResource(value) => {
                resources.insert_value(value);
            }
            Command::RemoveResource(type_id) => {
                resources.remove(type_id)?;
            }
        }
        Ok(())
    }
}

/// An ordered list of commands recorded by one system run.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw command.
    pub fn record(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Spawn an entity with `components` when the buffer is applied.
    pub fn spawn(&mut self, components: impl IntoIterator<Item = ComponentValue>) {
        self.record(Command::Spawn(components.into_iter().collect()));
    }

    /// Destroy `entity` when the buffer is applied.
    pub fn destroy(&mut self, entity: Entity) {
        self.record(Command::Destroy(entity));
    }

    /// Add or replace a `T` on `entity` when the buffer is applied.
    pub fn insert<T: Component>(&mut self, entity: Entity, value: T) {
        self.record(Command::Insert {
            entity,
            component: ComponentValue::new(value),
        });
    }

    /// Remove the `T` from `entity` when the buffer is applied.
    pub fn remove<T: Component>(&mut self, entity: Entity) {
        self.record(Command::Remove {
            entity,
            component: T::component_type_id(),
        });
    }

    /// Insert or replace a resource when the buffer is applied.
    pub fn insert_resource<T: Resource>(&mut self, value: T) {
        self.record(Command::InsertResource(ResourceValue::new(value)));
    }

    /// Remove the `T` resource when the buffer is applied.
    pub fn remove_resource<T: Resource>(&mut self) {
        self.record(Command::RemoveResource(T::resource_type_id()));
    }

    /// Number of recorded commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The recorded commands, in order.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Append every command of `other`, leaving it empty.
    pub fn append(&mut self, other: &mut CommandBuffer) {
        self.commands.append(&mut other.commands);
    }

    /// Drop every recorded command.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Apply and drain every command in recording order.
    ///
    /// Returns the commands that could not be applied. Each failure skips
    /// only its own command.
    pub fn apply(&mut self, world: &mut World, resources: &mut ResourceStore) -> Vec<CommandError> {
        let mut errors = Vec::new();
        for (index, command) in self.commands.drain(..).enumerate() {
            let kind = command.kind();
            if let Err(source) = command.apply(world, resources) {
                trace!(index, kind, error = %source, "command skipped");
                errors.push(CommandError {
                    index,
                    kind,
                    source,
                });
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorldError;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Health(i32);

    impl Component for Health {
        fn type_name() -> &'static str {
            "Health"
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Score(u32);

    impl Resource for Score {
        fn type_name() -> &'static str {
            "Score"
        }
    }

    fn setup() -> (World, ResourceStore) {
        let mut world = World::new();
        world.register_component::<Health>().unwrap();
        (world, ResourceStore::new())
    }

    #[test]
    fn test_commands_are_deferred_until_apply() {
        let (mut world, mut resources) = setup();
        let mut buffer = CommandBuffer::new();
        buffer.spawn([ComponentValue::new(Health(10))]);
        buffer.insert_resource(Score(3));
        assert_eq!(world.entity_count(), 0);
        assert_eq!(buffer.len(), 2);

        let errors = buffer.apply(&mut world, &mut resources);
        assert!(errors.is_empty());
        assert!(buffer.is_empty());
        assert_eq!(world.entity_count(), 1);
        assert_eq!(*resources.get::<Score>().unwrap(), Score(3));
    }

    #[test]
    fn test_commands_apply_in_recording_order() {
        let (mut world, mut resources) = setup();
        let e = world.create().unwrap();
        let mut buffer = CommandBuffer::new();
        buffer.insert(e, Health(1));
        buffer.insert(e, Health(2));
        buffer.remove::<Health>(e);
        buffer.insert(e, Health(3));
        assert!(buffer.apply(&mut world, &mut resources).is_empty());
        assert_eq!(*world.get::<Health>(e).unwrap(), Health(3));
    }

    #[test]
    fn test_command_on_destroyed_entity_is_skipped() {
        let (mut world, mut resources) = setup();
        let e = world.create().unwrap();
        let mut buffer = CommandBuffer::new();
        buffer.destroy(e);
        buffer.insert(e, Health(5));
        buffer.spawn([ComponentValue::new(Health(7))]);

        let errors = buffer.apply(&mut world, &mut resources);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 1);
        assert_eq!(errors[0].kind, "insert");
        assert_eq!(
            errors[0].source,
            CommandFailure::World(WorldError::NotFound(e))
        );
        // The command after the failure still ran.
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn test_remove_absent_resource_is_reported() {
        let (mut world, mut resources) = setup();
        let mut buffer = CommandBuffer::new();
        buffer.remove_resource::<Score>();
        let errors = buffer.apply(&mut world, &mut resources);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, "remove_resource");
    }

    #[test]
    fn test_append_preserves_order() {
        let (mut world, mut resources) = setup();
        let mut first = CommandBuffer::new();
        let mut second = CommandBuffer::new();
        first.insert_resource(Score(1));
        second.insert_resource(Score(2));
        first.append(&mut second);
        assert!(second.is_empty());
        first.apply(&mut world, &mut resources);
        assert_eq!(*resources.get::<Score>().unwrap(), Score(2));
    }
}
