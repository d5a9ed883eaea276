//! The entity store.
//!
//! [`World`] owns the component registry, the entity allocator and every
//! archetype table. It is the only place structural changes happen: spawning,
//! destroying, adding and removing components all take `&mut World`, while
//! systems running in parallel only ever see `&World` and go through the
//! per-column locks.
//!
//! ## Migration
//!
//! Adding or removing a component moves the entity's row from its archetype
//! to the archetype with one more (or one fewer) component type. Transitions
//! are cached as edges on both tables so repeated migrations skip the set
//! arithmetic.
//!
//! ## Change ticks
//!
//! The world keeps a monotonically increasing change tick. Every structural
//! write and every mutable component access stamps the touched row with a
//! tick, which is what `Changed` query filters compare against.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLockReadGuard, RwLockWriteGuard,
};
use tracing::debug;

use crate::archetype::{ArchetypeId, ArchetypeTable};
use crate::component::{Component, ComponentInfo, ComponentRegistry, ComponentTypeId, ComponentValue};
use crate::entity::{Entity, EntityAllocator};
use crate::error::{RegistryError, WorldError};
use crate::query::{ArchetypeFilter, Query, QueryDescriptor};

/// Shared borrow of one component on one entity.
pub type ComponentRef<'w, T> = MappedRwLockReadGuard<'w, T>;

/// Exclusive borrow of one component on one entity.
pub type ComponentMut<'w, T> = MappedRwLockWriteGuard<'w, T>;

/// Where an entity's data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    /// The archetype holding the entity.
    pub archetype: ArchetypeId,
    /// The entity's row in that archetype's columns.
    pub row: usize,
}

#[derive(Debug, Default)]
struct CachedMatches {
    /// Number of archetypes already checked against the filter.
    seen: usize,
    matches: Vec<ArchetypeId>,
}

/// Entities, their components and the archetype tables that store them.
#[derive(Debug)]
pub struct World {
    registry: ComponentRegistry,
    allocator: EntityAllocator,
    /// Indexed by entity index. `None` for free slots.
    locations: Vec<Option<EntityLocation>>,
    archetypes: Vec<ArchetypeTable>,
    archetype_index: HashMap<BTreeSet<ComponentTypeId>, ArchetypeId>,
    query_cache: Mutex<HashMap<ArchetypeFilter, CachedMatches>>,
    change_tick: AtomicU64,
}

impl World {
    /// Create an empty world holding only the empty archetype.
    #[must_use]
    pub fn new() -> Self {
        Self::with_entity_limit(EntityAllocator::MAX_SLOTS)
    }

    /// Create an empty world that holds at most `limit` entities at once.
    #[must_use]
    pub fn with_entity_limit(limit: u32) -> Self {
        let registry = ComponentRegistry::new();
        let empty = ArchetypeTable::empty();
        let mut archetype_index = HashMap::new();
        archetype_index.insert(BTreeSet::new(), ArchetypeId::EMPTY);
        Self {
            registry,
            allocator: EntityAllocator::with_max_slots(limit),
            locations: Vec::new(),
            archetypes: vec![empty],
            archetype_index,
            query_cache: Mutex::new(HashMap::new()),
            change_tick: AtomicU64::new(1),
        }
    }

    // ── Registration ───────────────────────────────────────────────

    /// Register the component type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the type key is taken.
    pub fn register_component<T: Component>(&mut self) -> Result<ComponentTypeId, RegistryError> {
        self.registry.register::<T>()
    }

    /// Register a component from an explicit registration record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the type key is taken.
    pub fn register_component_info(
        &mut self,
        info: ComponentInfo,
    ) -> Result<ComponentTypeId, RegistryError> {
        self.registry.register_info(info)
    }

    /// The component registry.
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    // ── Entities ───────────────────────────────────────────────────

    /// Create an entity with no components.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::EntitiesExhausted`] if no index is left.
    pub fn create(&mut self) -> Result<Entity, WorldError> {
        let entity = self.allocator.allocate()?;
        let row = self.archetypes[ArchetypeId::EMPTY.index()].push_entity(entity);
        self.set_location(
            entity,
            EntityLocation {
                archetype: ArchetypeId::EMPTY,
                row,
            },
        );
        Ok(entity)
    }

    /// Create an entity holding `components`. If the same type appears more
    /// than once the last value wins.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnregisteredComponent`] or
    /// [`WorldError::TypeMismatch`] if any value is invalid, and
    /// [`WorldError::EntitiesExhausted`] if no index is left. Nothing is
    /// stored in those cases.
    pub fn spawn(
        &mut self,
        components: impl IntoIterator<Item = ComponentValue>,
    ) -> Result<Entity, WorldError> {
        let mut values = BTreeMap::new();
        for value in components {
            self.validate(&value)?;
            values.insert(value.type_id(), value);
        }

        let types: BTreeSet<_> = values.keys().copied().collect();
        let archetype = self.archetype_for(types)?;
        let tick = self.increment_change_tick();
        let entity = self.allocator.allocate()?;

        let table = &mut self.archetypes[archetype.index()];
        let row = table.len();
        let mut pushed = Vec::with_capacity(values.len());
        for (type_id, value) in values {
            let name = value.name();
            let result = match table.column_mut(type_id) {
                Some(column) => column
                    .push_boxed(value.into_inner(), tick)
                    .map_err(|_| WorldError::TypeMismatch { component: name }),
                None => Err(WorldError::UnregisteredComponent(type_id)),
            };
            if let Err(err) = result {
                for type_id in pushed {
                    if let Some(column) = table.column_mut(type_id) {
                        column.swap_remove_drop(row);
                    }
                }
                self.allocator.free(entity);
                return Err(err);
            }
            pushed.push(type_id);
        }
        table.push_entity(entity);
        self.set_location(entity, EntityLocation { archetype, row });
        Ok(entity)
    }

    /// Destroy an entity and drop all of its components.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::NotFound`] if the entity is dead or stale.
    pub fn destroy(&mut self, entity: Entity) -> Result<(), WorldError> {
        let location = self.location(entity).ok_or(WorldError::NotFound(entity))?;
        let moved = self.archetypes[location.archetype.index()].swap_remove_row(location.row);
        if let Some(moved) = moved {
            self.set_location(moved, location);
        }
        if let Some(slot) = self.locations.get_mut(entity.index() as usize) {
            *slot = None;
        }
        self.allocator.free(entity);
        Ok(())
    }

    /// Returns `true` if the handle refers to a live entity.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    /// Where a live entity's data is stored.
    #[must_use]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if !self.allocator.is_alive(entity) {
            return None;
        }
        self.locations.get(entity.index() as usize).copied().flatten()
    }

    /// The archetype a live entity belongs to.
    #[must_use]
    pub fn entity_archetype(&self, entity: Entity) -> Option<ArchetypeId> {
        self.location(entity).map(|location| location.archetype)
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.allocator.count()
    }

    /// Every live entity, archetype by archetype.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.archetypes
            .iter()
            .flat_map(|table| table.entities().iter().copied())
    }

    // ── Components ─────────────────────────────────────────────────

    /// Add `value` to an entity, replacing the existing value if the entity
    /// already holds a `T`.
    ///
    /// # Errors
    ///
    /// See [`World::insert_value`].
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), WorldError> {
        self.insert_value(entity, ComponentValue::new(value))
    }

    /// Add a type-erased component to an entity. Replaces the value in place
    /// if the entity already has the type, otherwise migrates the entity to
    /// the archetype with the extra component.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::NotFound`] for dead entities, and
    /// [`WorldError::UnregisteredComponent`] or [`WorldError::TypeMismatch`]
    /// for invalid values.
    pub fn insert_value(&mut self, entity: Entity, value: ComponentValue) -> Result<(), WorldError> {
        let location = self.location(entity).ok_or(WorldError::NotFound(entity))?;
        self.validate(&value)?;
        let type_id = value.type_id();
        let name = value.name();
        let tick = self.increment_change_tick();

        if self.archetypes[location.archetype.index()].has_component(type_id) {
            let column = self.archetypes[location.archetype.index()]
                .column_mut(type_id)
                .ok_or(WorldError::UnregisteredComponent(type_id))?;
            return column
                .replace_boxed(location.row, value.into_inner(), tick)
                .map_err(|_| WorldError::TypeMismatch { component: name });
        }

        // A rejected value leaves the entity in place.
        let target = self.add_target(location.archetype, type_id)?;
        let column = self.archetypes[target.index()]
            .column_mut(type_id)
            .ok_or(WorldError::UnregisteredComponent(type_id))?;
        column
            .push_boxed(value.into_inner(), tick)
            .map_err(|_| WorldError::TypeMismatch { component: name })?;
        self.move_row(entity, location, target);
        Ok(())
    }

    /// Remove a component from an entity and return it.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::NotFound`] for dead entities,
    /// [`WorldError::UnregisteredComponent`] for unknown types, and
    /// [`WorldError::MissingComponent`] if the entity does not hold the type.
    pub fn remove_component(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
    ) -> Result<ComponentValue, WorldError> {
        let location = self.location(entity).ok_or(WorldError::NotFound(entity))?;
        let name = self
            .registry
            .get(type_id)
            .map(|info| info.name)
            .ok_or(WorldError::UnregisteredComponent(type_id))?;
        let missing = WorldError::MissingComponent {
            entity,
            component: name,
        };
        if !self.archetypes[location.archetype.index()].has_component(type_id) {
            return Err(missing);
        }

        let target = self.remove_target(location.archetype, type_id)?;
        let removed = self.move_row(entity, location, target).ok_or(missing)?;
        Ok(ComponentValue::from_parts(type_id, name, removed))
    }

    /// Remove a `T` from an entity and return it.
    ///
    /// # Errors
    ///
    /// See [`World::remove_component`].
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Result<T, WorldError> {
        self.remove_component(entity, T::component_type_id())?
            .downcast::<T>()
            .map_err(|value| WorldError::TypeMismatch {
                component: value.name(),
            })
    }

    /// Returns `true` if the entity is alive and holds the component type.
    #[must_use]
    pub fn has_component(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.location(entity)
            .is_some_and(|loc| self.archetypes[loc.archetype.index()].has_component(type_id))
    }

    /// Returns `true` if the entity is alive and holds a `T`.
    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.has_component(entity, T::component_type_id())
    }

    /// Shared borrow of an entity's `T`. `None` if the entity is dead, lacks
    /// the component, or the column is exclusively borrowed.
    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<ComponentRef<'_, T>> {
        let location = self.location(entity)?;
        let lock = self.archetypes[location.archetype.index()].column(T::component_type_id())?;
        RwLockReadGuard::try_map(lock.try_read()?, |column| column.get::<T>(location.row)).ok()
    }

    /// Exclusive borrow of an entity's `T`, stamped with a fresh change tick.
    #[must_use]
    pub fn get_mut<T: Component>(&self, entity: Entity) -> Option<ComponentMut<'_, T>> {
        let tick = self.increment_change_tick();
        self.get_mut_stamped(entity, tick)
    }

    /// Exclusive borrow of an entity's `T`, stamped with `tick`.
    #[must_use]
    pub fn get_mut_stamped<T: Component>(
        &self,
        entity: Entity,
        tick: u64,
    ) -> Option<ComponentMut<'_, T>> {
        let location = self.location(entity)?;
        let lock = self.archetypes[location.archetype.index()].column(T::component_type_id())?;
        RwLockWriteGuard::try_map(lock.try_write()?, |column| {
            column.get_mut_stamped::<T>(location.row, tick)
        })
        .ok()
    }

    // ── Archetypes & queries ───────────────────────────────────────

    /// The archetype table with the given id.
    #[must_use]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&ArchetypeTable> {
        self.archetypes.get(id.index())
    }

    /// All archetype tables, in creation order.
    #[must_use]
    pub fn archetypes(&self) -> &[ArchetypeTable] {
        &self.archetypes
    }

    /// Number of archetypes, including the empty one.
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Archetypes matching a descriptor's required and excluded sets.
    ///
    /// Results are cached per filter; only archetypes created since the last
    /// call are checked.
    #[must_use]
    pub fn matching_archetypes(&self, descriptor: &QueryDescriptor) -> Vec<ArchetypeId> {
        let filter = descriptor.archetype_filter();
        let mut cache = self.query_cache.lock();
        let cached = cache.entry(filter.clone()).or_default();
        for table in &self.archetypes[cached.seen..] {
            if filter.matches(table.component_types()) {
                cached.matches.push(table.id);
            }
        }
        cached.seen = self.archetypes.len();
        cached.matches.clone()
    }

    /// Query the world outside of a system. `Changed` filters match every
    /// row ever written.
    #[must_use]
    pub fn query(&self, descriptor: QueryDescriptor) -> Query<'_> {
        let this_run = self.increment_change_tick();
        Query::new(self, descriptor, 0, this_run)
    }

    /// Query as a system that last ran at `last_run` and is running at
    /// `this_run`.
    #[must_use]
    pub fn query_since(&self, descriptor: QueryDescriptor, last_run: u64, this_run: u64) -> Query<'_> {
        Query::new(self, descriptor, last_run, this_run)
    }

    /// The most recently issued change tick.
    #[must_use]
    pub fn change_tick(&self) -> u64 {
        self.change_tick.load(Ordering::Acquire)
    }

    /// Issue a new change tick, strictly greater than every earlier one.
    pub fn increment_change_tick(&self) -> u64 {
        self.change_tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    // ── Internals ──────────────────────────────────────────────────

    fn validate(&self, value: &ComponentValue) -> Result<(), WorldError> {
        let info = self
            .registry
            .get(value.type_id())
            .ok_or(WorldError::UnregisteredComponent(value.type_id()))?;
        if info.rust_type != value.rust_type() {
            return Err(WorldError::TypeMismatch {
                component: info.name,
            });
        }
        Ok(())
    }

    fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        let index = entity.index() as usize;
        if index >= self.locations.len() {
            self.locations.resize(index + 1, None);
        }
        self.locations[index] = Some(location);
    }

    fn archetype_for(&mut self, types: BTreeSet<ComponentTypeId>) -> Result<ArchetypeId, WorldError> {
        if let Some(&id) = self.archetype_index.get(&types) {
            return Ok(id);
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        let table = ArchetypeTable::new(id, types.clone(), &self.registry)?;
        debug!(archetype = id.0, components = types.len(), "archetype created");
        self.archetypes.push(table);
        self.archetype_index.insert(types, id);
        Ok(id)
    }

    fn add_target(
        &mut self,
        from: ArchetypeId,
        type_id: ComponentTypeId,
    ) -> Result<ArchetypeId, WorldError> {
        if let Some(target) = self.archetypes[from.index()].add_edge(type_id) {
            return Ok(target);
        }
        let mut types = self.archetypes[from.index()].component_types().clone();
        types.insert(type_id);
        let target = self.archetype_for(types)?;
        self.archetypes[from.index()].set_add_edge(type_id, target);
        self.archetypes[target.index()].set_remove_edge(type_id, from);
        Ok(target)
    }

    fn remove_target(
        &mut self,
        from: ArchetypeId,
        type_id: ComponentTypeId,
    ) -> Result<ArchetypeId, WorldError> {
        if let Some(target) = self.archetypes[from.index()].remove_edge(type_id) {
            return Ok(target);
        }
        let mut types = self.archetypes[from.index()].component_types().clone();
        types.remove(&type_id);
        let target = self.archetype_for(types)?;
        self.archetypes[from.index()].set_remove_edge(type_id, target);
        self.archetypes[target.index()].set_add_edge(type_id, from);
        Ok(target)
    }

    /// Move an entity's row into `target`. Columns the target lacks are
    /// taken out; the value of the last such column is returned.
    fn move_row(
        &mut self,
        entity: Entity,
        location: EntityLocation,
        target: ArchetypeId,
    ) -> Option<Box<dyn std::any::Any + Send + Sync>> {
        let (src, dst) = pair_mut(
            &mut self.archetypes,
            location.archetype.index(),
            target.index(),
        );
        let mut removed = None;
        for column in src.columns_mut() {
            match dst.column_mut(column.type_id) {
                Some(dest) => {
                    column.move_row_into(location.row, dest);
                }
                None => removed = column.swap_remove_boxed(location.row),
            }
        }
        let moved = src.swap_remove_entity(location.row);
        let row = dst.push_entity(entity);

        if let Some(moved) = moved {
            self.set_location(moved, location);
        }
        self.set_location(
            entity,
            EntityLocation {
                archetype: target,
                row,
            },
        );
        removed
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrow two distinct tables mutably.
fn pair_mut(
    tables: &mut [ArchetypeTable],
    a: usize,
    b: usize,
) -> (&mut ArchetypeTable, &mut ArchetypeTable) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = tables.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = tables.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    impl Component for Position {
        fn type_name() -> &'static str {
            "Position"
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    impl Component for Velocity {
        fn type_name() -> &'static str {
            "Velocity"
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Frozen;

    impl Component for Frozen {
        fn type_name() -> &'static str {
            "Frozen"
        }
    }

    /// Shares the registered name of [`Position`].
    struct FakePosition;

    impl Component for FakePosition {
        fn type_name() -> &'static str {
            "Position"
        }
    }

    fn world() -> World {
        let mut world = World::new();
        world.register_component::<Position>().unwrap();
        world.register_component::<Velocity>().unwrap();
        world.register_component::<Frozen>().unwrap();
        world
    }

    fn pos(x: f32, y: f32) -> ComponentValue {
        ComponentValue::new(Position { x, y })
    }

    fn vel(dx: f32, dy: f32) -> ComponentValue {
        ComponentValue::new(Velocity { dx, dy })
    }

    #[test]
    fn test_spawn_and_get() {
        let mut world = world();
        let e = world.spawn([pos(1.0, 2.0), vel(0.5, 0.0)]).unwrap();
        assert!(world.is_alive(e));
        assert_eq!(*world.get::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
        assert_eq!(world.get::<Velocity>(e).unwrap().dx, 0.5);
        assert!(world.get::<Frozen>(e).is_none());
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn test_spawn_last_duplicate_wins() {
        let mut world = world();
        let e = world.spawn([pos(1.0, 1.0), pos(3.0, 3.0)]).unwrap();
        assert_eq!(world.get::<Position>(e).unwrap().x, 3.0);
    }

    #[test]
    fn test_spawn_rejects_unregistered_component() {
        let mut world = World::new();
        let err = world.spawn([pos(0.0, 0.0)]).unwrap_err();
        assert_eq!(
            err,
            WorldError::UnregisteredComponent(Position::component_type_id())
        );
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn test_spawn_rejects_type_mismatch() {
        let mut world = world();
        let err = world.spawn([ComponentValue::new(FakePosition)]).unwrap_err();
        assert_eq!(
            err,
            WorldError::TypeMismatch {
                component: "Position"
            }
        );
    }

    #[test]
    fn test_same_component_set_shares_archetype() {
        let mut world = world();
        let a = world.spawn([pos(0.0, 0.0), vel(1.0, 1.0)]).unwrap();
        let b = world.spawn([vel(2.0, 2.0), pos(1.0, 1.0)]).unwrap();
        assert_eq!(
            world.location(a).unwrap().archetype,
            world.location(b).unwrap().archetype
        );
    }

    #[test]
    fn test_destroy_invalidates_handle() {
        let mut world = world();
        let e = world.spawn([pos(0.0, 0.0)]).unwrap();
        world.destroy(e).unwrap();
        assert!(!world.is_alive(e));
        assert!(world.get::<Position>(e).is_none());
        assert_eq!(world.destroy(e), Err(WorldError::NotFound(e)));

        // The index is reused, the old handle stays dead.
        let f = world.spawn([pos(5.0, 5.0)]).unwrap();
        assert_eq!(f.index(), e.index());
        assert!(!world.is_alive(e));
        assert_eq!(world.get::<Position>(f).unwrap().x, 5.0);
    }

    #[test]
    fn test_destroy_relocates_swapped_entity() {
        let mut world = world();
        let a = world.spawn([pos(1.0, 0.0)]).unwrap();
        let b = world.spawn([pos(2.0, 0.0)]).unwrap();
        let c = world.spawn([pos(3.0, 0.0)]).unwrap();
        world.destroy(a).unwrap();
        assert_eq!(world.location(c).unwrap().row, 0);
        assert_eq!(world.get::<Position>(c).unwrap().x, 3.0);
        assert_eq!(world.get::<Position>(b).unwrap().x, 2.0);
    }

    #[test]
    fn test_insert_migrates_and_keeps_existing_values() {
        let mut world = world();
        let e = world.spawn([pos(1.0, 2.0)]).unwrap();
        let before = world.location(e).unwrap().archetype;
        world.add_component(e, Velocity { dx: 3.0, dy: 4.0 }).unwrap();
        assert_ne!(world.location(e).unwrap().archetype, before);
        assert_eq!(*world.get::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
        assert_eq!(*world.get::<Velocity>(e).unwrap(), Velocity { dx: 3.0, dy: 4.0 });
    }

    #[test]
    fn test_insert_existing_replaces_in_place() {
        let mut world = world();
        let e = world.spawn([pos(1.0, 2.0)]).unwrap();
        let before = world.location(e).unwrap();
        world.add_component(e, Position { x: 9.0, y: 9.0 }).unwrap();
        assert_eq!(world.location(e).unwrap(), before);
        assert_eq!(world.get::<Position>(e).unwrap().x, 9.0);
    }

    #[test]
    fn test_insert_on_dead_entity_fails() {
        let mut world = world();
        let e = world.create().unwrap();
        world.destroy(e).unwrap();
        assert_eq!(world.add_component(e, Frozen), Err(WorldError::NotFound(e)));
    }

    #[test]
    fn test_remove_returns_value_and_migrates() {
        let mut world = world();
        let e = world.spawn([pos(1.0, 2.0), vel(3.0, 4.0)]).unwrap();
        let v = world.remove::<Velocity>(e).unwrap();
        assert_eq!(v, Velocity { dx: 3.0, dy: 4.0 });
        assert!(!world.has::<Velocity>(e));
        assert_eq!(world.get::<Position>(e).unwrap().y, 2.0);
    }

    #[test]
    fn test_remove_missing_component_fails() {
        let mut world = world();
        let e = world.spawn([pos(0.0, 0.0)]).unwrap();
        assert_eq!(
            world.remove::<Velocity>(e),
            Err(WorldError::MissingComponent {
                entity: e,
                component: "Velocity"
            })
        );
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Mislabeled(u8);

    impl Component for Mislabeled {
        fn type_name() -> &'static str {
            "Mislabeled"
        }
    }

    /// Registers `Mislabeled` with a column that stores `Velocity`.
    fn world_with_mislabeled_column() -> World {
        let mut world = world();
        world
            .register_component_info(ComponentInfo {
                constructor: crate::archetype::TypedColumn::<Velocity>::boxed,
                ..ComponentInfo::of::<Mislabeled>()
            })
            .unwrap();
        world
    }

    fn assert_columns_aligned(world: &World, archetype: ArchetypeId) {
        let table = world.archetype(archetype).unwrap();
        for &type_id in table.component_types() {
            assert_eq!(table.column(type_id).unwrap().read().len(), table.len());
        }
    }

    #[test]
    fn test_rejected_insert_leaves_entity_in_place() {
        let mut world = world_with_mislabeled_column();
        let e = world.spawn([pos(3.0, 4.0)]).unwrap();
        let before = world.entity_archetype(e);

        let err = world
            .insert_value(e, ComponentValue::new(Mislabeled(1)))
            .unwrap_err();
        assert_eq!(err, WorldError::TypeMismatch { component: "Mislabeled" });
        assert_eq!(world.entity_archetype(e), before);
        assert_eq!(*world.get::<Position>(e).unwrap(), Position { x: 3.0, y: 4.0 });
        assert!(!world.has::<Mislabeled>(e));
        for id in 0..world.archetype_count() {
            assert_columns_aligned(&world, ArchetypeId(id as u32));
        }
    }

    #[test]
    fn test_rejected_spawn_stores_nothing() {
        let mut world = world_with_mislabeled_column();
        let err = world
            .spawn([pos(1.0, 1.0), ComponentValue::new(Mislabeled(2))])
            .unwrap_err();
        assert_eq!(err, WorldError::TypeMismatch { component: "Mislabeled" });
        assert_eq!(world.entity_count(), 0);
        for id in 0..world.archetype_count() {
            assert_columns_aligned(&world, ArchetypeId(id as u32));
        }
        // The world stays usable.
        let e = world.spawn([pos(5.0, 0.0)]).unwrap();
        assert_eq!(world.get::<Position>(e).unwrap().x, 5.0);
    }

    #[test]
    fn test_entity_limit_is_an_error() {
        let mut world = World::with_entity_limit(2);
        world.register_component::<Position>().unwrap();
        let a = world.create().unwrap();
        world.spawn([pos(1.0, 0.0)]).unwrap();

        assert_eq!(world.create(), Err(WorldError::EntitiesExhausted));
        assert_eq!(
            world.spawn([pos(2.0, 0.0)]),
            Err(WorldError::EntitiesExhausted)
        );
        assert_eq!(world.entity_count(), 2);

        world.destroy(a).unwrap();
        assert!(world.spawn([pos(3.0, 0.0)]).is_ok());
    }

    #[test]
    fn test_migration_edges_are_reused() {
        let mut world = world();
        let a = world.spawn([pos(0.0, 0.0)]).unwrap();
        let b = world.spawn([pos(0.0, 0.0)]).unwrap();
        world.add_component(a, Frozen).unwrap();
        let count = world.archetype_count();
        world.add_component(b, Frozen).unwrap();
        assert_eq!(world.archetype_count(), count);
        world.remove::<Frozen>(a).unwrap();
        let c = world.spawn([pos(1.0, 1.0)]).unwrap();
        assert_eq!(
            world.location(a).unwrap().archetype,
            world.location(c).unwrap().archetype
        );
        assert_eq!(world.archetype_count(), count);
    }

    #[test]
    fn test_query_required_and_excluded() {
        let mut world = world();
        let moving = world.spawn([pos(0.0, 0.0), vel(1.0, 0.0)]).unwrap();
        let frozen = world
            .spawn([pos(0.0, 0.0), vel(1.0, 0.0), ComponentValue::new(Frozen)])
            .unwrap();
        let _still = world.spawn([pos(0.0, 0.0)]).unwrap();

        let descriptor = QueryDescriptor::new()
            .write(Position::component_type_id())
            .read(Velocity::component_type_id())
            .without(Frozen::component_type_id());
        let query = world.query(descriptor);
        query
            .for_each(|mut row| {
                let dx = row.get::<Velocity>().unwrap().dx;
                row.get_mut::<Position>().unwrap().x += dx;
            })
            .unwrap();

        assert_eq!(world.get::<Position>(moving).unwrap().x, 1.0);
        assert_eq!(world.get::<Position>(frozen).unwrap().x, 0.0);
    }

    #[test]
    fn test_query_read_only_component_is_not_writable() {
        let mut world = world();
        world.spawn([pos(0.0, 0.0)]).unwrap();
        let query = world.query(QueryDescriptor::new().read(Position::component_type_id()));
        query
            .for_each(|mut row| assert!(row.get_mut::<Position>().is_none()))
            .unwrap();
    }

    #[test]
    fn test_query_optional_component() {
        let mut world = world();
        world.spawn([pos(0.0, 0.0)]).unwrap();
        world.spawn([pos(0.0, 0.0), vel(1.0, 1.0)]).unwrap();
        let query = world.query(
            QueryDescriptor::new()
                .read(Position::component_type_id())
                .optional(Velocity::component_type_id()),
        );
        let mut with_velocity = 0;
        query
            .for_each(|row| {
                if row.has::<Velocity>() {
                    with_velocity += 1;
                }
            })
            .unwrap();
        assert_eq!(with_velocity, 1);
        assert_eq!(query.count().unwrap(), 2);
    }

    #[test]
    fn test_query_is_restartable() {
        let mut world = world();
        world.spawn([pos(0.0, 0.0)]).unwrap();
        let query = world.query(QueryDescriptor::new().read(Position::component_type_id()));
        assert_eq!(query.count().unwrap(), 1);
        assert_eq!(query.count().unwrap(), 1);
    }

    #[test]
    fn test_query_cache_sees_new_archetypes() {
        let mut world = world();
        world.spawn([pos(0.0, 0.0)]).unwrap();
        let descriptor = QueryDescriptor::new().read(Position::component_type_id());
        assert_eq!(world.matching_archetypes(&descriptor).len(), 1);
        world.spawn([pos(0.0, 0.0), ComponentValue::new(Frozen)]).unwrap();
        assert_eq!(world.matching_archetypes(&descriptor).len(), 2);
    }

    #[test]
    fn test_changed_filter_tracks_writes() {
        let mut world = world();
        let a = world.spawn([pos(0.0, 0.0)]).unwrap();
        let b = world.spawn([pos(0.0, 0.0)]).unwrap();
        let descriptor = QueryDescriptor::new()
            .read(Position::component_type_id())
            .changed(Position::component_type_id());

        let last_run = world.change_tick();
        let this_run = world.increment_change_tick();
        assert_eq!(
            world
                .query_since(descriptor.clone(), last_run, this_run)
                .count()
                .unwrap(),
            0
        );

        world.get_mut::<Position>(b).unwrap().x = 1.0;
        let seen = world
            .query_since(descriptor.clone(), this_run, world.increment_change_tick())
            .entities()
            .unwrap();
        assert_eq!(seen, vec![b]);
        assert!(!seen.contains(&a));
    }

    #[test]
    fn test_nested_conflicting_query_reports_borrow() {
        let mut world = world();
        world.spawn([pos(0.0, 0.0)]).unwrap();
        let outer = world.query(QueryDescriptor::new().write(Position::component_type_id()));
        let inner = world.query(QueryDescriptor::new().read(Position::component_type_id()));
        let mut inner_result = Ok(());
        outer
            .for_each(|_| inner_result = inner.count().map(|_| ()))
            .unwrap();
        assert!(matches!(
            inner_result,
            Err(crate::error::QueryError::Borrowed {
                component: "Position"
            })
        ));
    }

    proptest! {
        #[test]
        fn prop_insert_remove_keeps_values(ops in proptest::collection::vec((0usize..4, any::<bool>()), 1..40)) {
            let mut world = world();
            let entities: Vec<Entity> = (0..4)
                .map(|i| world.spawn([pos(i as f32, 0.0)]).unwrap())
                .collect();
            let original: Vec<Option<ArchetypeId>> =
                entities.iter().map(|&e| world.entity_archetype(e)).collect();
            let mut has_velocity = [false; 4];

            for (i, add) in ops {
                let e = entities[i];
                if add {
                    world.add_component(e, Velocity { dx: i as f32, dy: 0.0 }).unwrap();
                    has_velocity[i] = true;
                } else if has_velocity[i] {
                    world.remove::<Velocity>(e).unwrap();
                    has_velocity[i] = false;
                }
            }

            for (i, &e) in entities.iter().enumerate() {
                prop_assert_eq!(world.get::<Position>(e).unwrap().x, i as f32);
                prop_assert_eq!(world.has::<Velocity>(e), has_velocity[i]);
                if has_velocity[i] {
                    prop_assert_eq!(world.get::<Velocity>(e).unwrap().dx, i as f32);
                } else {
                    prop_assert_eq!(world.entity_archetype(e), original[i]);
                }
            }
        }
    }
}
