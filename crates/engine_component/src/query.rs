//! Query descriptors and query iteration.
//!
//! A [`QueryDescriptor`] declares which component types a system reads and
//! writes, which it can handle optionally, and which filters narrow the
//! match. The scheduler uses descriptors to detect conflicts between systems;
//! the world uses them to select matching archetypes.
//!
//! [`Query`] is the runtime side: a lazy, restartable walk over the matching
//! archetypes that borrows the requested columns one archetype at a time and
//! hands each entity to a callback as a [`Row`].

use std::collections::BTreeSet;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::archetype::{ArchetypeId, ArchetypeTable, Column};
use crate::component::{Component, ComponentTypeId};
use crate::entity::Entity;
use crate::error::QueryError;
use crate::world::World;

/// Describes the data access requirements of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Component types read immutably.
    pub reads: Vec<ComponentTypeId>,
    /// Component types written (mutable access).
    pub writes: Vec<ComponentTypeId>,
    /// Component types that are optional: matched entities may or may not
    /// have them. Read-only.
    pub optionals: Vec<ComponentTypeId>,
    /// Filters applied to the query.
    pub filters: Vec<QueryFilter>,
}

impl QueryDescriptor {
    /// Create a new empty query descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a read-only component requirement.
    #[must_use]
    pub fn read(mut self, type_id: ComponentTypeId) -> Self {
        self.reads.push(type_id);
        self
    }

    /// Add a mutable component requirement.
    #[must_use]
    pub fn write(mut self, type_id: ComponentTypeId) -> Self {
        self.writes.push(type_id);
        self
    }

    /// Add an optional component.
    #[must_use]
    pub fn optional(mut self, type_id: ComponentTypeId) -> Self {
        self.optionals.push(type_id);
        self
    }

    /// Add a query filter.
    #[must_use]
    pub fn filter(mut self, f: QueryFilter) -> Self {
        self.filters.push(f);
        self
    }

    /// Only match entities that also have `type_id`.
    #[must_use]
    pub fn with(self, type_id: ComponentTypeId) -> Self {
        self.filter(QueryFilter::With(type_id))
    }

    /// Only match entities that lack `type_id`.
    #[must_use]
    pub fn without(self, type_id: ComponentTypeId) -> Self {
        self.filter(QueryFilter::Without(type_id))
    }

    /// Only match rows whose `type_id` value changed since the querying
    /// system last ran.
    #[must_use]
    pub fn changed(self, type_id: ComponentTypeId) -> Self {
        self.filter(QueryFilter::Changed(type_id))
    }

    /// Returns all component types that this query accesses (reads + writes
    /// + optionals + changed filters, since those read change ticks).
    #[must_use]
    pub fn all_accessed_types(&self) -> Vec<ComponentTypeId> {
        let mut types = Vec::new();
        types.extend_from_slice(&self.reads);
        types.extend_from_slice(&self.writes);
        types.extend_from_slice(&self.optionals);
        types.extend(self.changed_types());
        types
    }

    /// Component types the query reads without writing.
    #[must_use]
    pub fn read_types(&self) -> Vec<ComponentTypeId> {
        self.reads
            .iter()
            .chain(&self.optionals)
            .copied()
            .chain(self.changed_types())
            .filter(|ty| !self.writes.contains(ty))
            .collect()
    }

    /// Returns the set of required component types (reads + writes, excluding
    /// optionals).
    #[must_use]
    pub fn required_types(&self) -> Vec<ComponentTypeId> {
        let mut types = Vec::new();
        types.extend_from_slice(&self.reads);
        types.extend_from_slice(&self.writes);
        types
    }

    fn changed_types(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.filters.iter().filter_map(|f| match f {
            QueryFilter::Changed(ty) => Some(*ty),
            _ => None,
        })
    }

    /// The archetype-level part of the descriptor: which component sets
    /// match.
    #[must_use]
    pub fn archetype_filter(&self) -> ArchetypeFilter {
        let mut required: BTreeSet<ComponentTypeId> =
            self.required_types().into_iter().collect();
        let mut excluded = BTreeSet::new();
        for filter in &self.filters {
            match *filter {
                QueryFilter::With(ty) | QueryFilter::Changed(ty) => {
                    required.insert(ty);
                }
                QueryFilter::Without(ty) => {
                    excluded.insert(ty);
                }
            }
        }
        ArchetypeFilter { required, excluded }
    }

    /// Checks whether this query conflicts with another.
    ///
    /// Two queries conflict when one writes a component type that the other
    /// reads or writes:
    ///
    /// ```text
    /// A.writes ∩ (B.reads ∪ B.writes) ≠ ∅  OR
    /// B.writes ∩ (A.reads ∪ A.writes) ≠ ∅
    /// ```
    #[must_use]
    pub fn conflicts_with(&self, other: &QueryDescriptor) -> bool {
        let ours = self.all_accessed_types();
        let theirs = other.all_accessed_types();
        self.writes.iter().any(|w| theirs.contains(w))
            || other.writes.iter().any(|w| ours.contains(w))
    }
}

/// A filter that narrows the set of entities matched by a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryFilter {
    /// Only match entities that have this component.
    With(ComponentTypeId),
    /// Only match entities that do NOT have this component.
    Without(ComponentTypeId),
    /// Only match entities where this component has changed since the
    /// querying system last ran.
    Changed(ComponentTypeId),
}

/// Required and excluded component sets; the key of the world's match cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchetypeFilter {
    /// Every one of these must be present.
    pub required: BTreeSet<ComponentTypeId>,
    /// None of these may be present.
    pub excluded: BTreeSet<ComponentTypeId>,
}

impl ArchetypeFilter {
    /// Returns `true` if an archetype with `types` matches.
    #[must_use]
    pub fn matches(&self, types: &BTreeSet<ComponentTypeId>) -> bool {
        self.required.is_subset(types) && self.excluded.is_disjoint(types)
    }
}

enum ColumnGuard<'w> {
    Read(RwLockReadGuard<'w, Column>),
    Write(RwLockWriteGuard<'w, Column>),
}

impl ColumnGuard<'_> {
    fn column(&self) -> &Column {
        match self {
            ColumnGuard::Read(guard) => &**guard,
            ColumnGuard::Write(guard) => &**guard,
        }
    }
}

type Borrowed<'w> = Vec<(ComponentTypeId, ColumnGuard<'w>)>;

/// A lazy, restartable query over the world.
///
/// Matching archetypes are resolved when the query is created. Nothing is
/// borrowed until [`Query::for_each`] runs, and each call walks the matches
/// from the start again.
pub struct Query<'w> {
    world: &'w World,
    descriptor: QueryDescriptor,
    archetypes: Vec<ArchetypeId>,
    last_run: u64,
    this_run: u64,
}

impl<'w> Query<'w> {
    pub(crate) fn new(
        world: &'w World,
        descriptor: QueryDescriptor,
        last_run: u64,
        this_run: u64,
    ) -> Self {
        let archetypes = world.matching_archetypes(&descriptor);
        Self {
            world,
            descriptor,
            archetypes,
            last_run,
            this_run,
        }
    }

    /// The descriptor this query was built from.
    #[must_use]
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    /// The archetypes this query walks.
    #[must_use]
    pub fn archetypes(&self) -> &[ArchetypeId] {
        &self.archetypes
    }

    /// Call `f` once per matching entity.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Borrowed`] if a needed column is already
    /// borrowed incompatibly (for example by an enclosing `for_each` over
    /// the same written component). Rows visited before the error keep any
    /// writes made to them.
    pub fn for_each<F>(&self, mut f: F) -> Result<(), QueryError>
    where
        F: FnMut(Row<'_, 'w>),
    {
        let world = self.world;
        for &id in &self.archetypes {
            let Some(table) = world.archetype(id) else {
                continue;
            };
            if table.is_empty() {
                continue;
            }
            let mut guards = self.borrow_columns(table)?;
            let changed: Vec<usize> = self
                .descriptor
                .changed_types()
                .filter_map(|ty| guards.iter().position(|(t, _)| *t == ty))
                .collect();

            for (row, &entity) in table.entities().iter().enumerate() {
                let passes = changed.iter().all(|&i| {
                    guards[i]
                        .1
                        .column()
                        .changed_tick(row)
                        .is_some_and(|tick| tick > self.last_run)
                });
                if !passes {
                    continue;
                }
                f(Row {
                    entity,
                    row,
                    tick: self.this_run,
                    guards: &mut guards,
                });
            }
        }
        Ok(())
    }

    /// Collect the matching entities.
    ///
    /// # Errors
    ///
    /// Same as [`Query::for_each`].
    pub fn entities(&self) -> Result<Vec<Entity>, QueryError> {
        let mut entities = Vec::new();
        self.for_each(|row| entities.push(row.entity()))?;
        Ok(entities)
    }

    /// Count the matching entities.
    ///
    /// # Errors
    ///
    /// Same as [`Query::for_each`].
    pub fn count(&self) -> Result<usize, QueryError> {
        let mut count = 0;
        self.for_each(|_| count += 1)?;
        Ok(count)
    }

    fn borrow_columns(&self, table: &'w ArchetypeTable) -> Result<Borrowed<'w>, QueryError> {
        let mut guards = Borrowed::new();
        for &ty in &self.descriptor.writes {
            self.borrow_column(table, ty, true, &mut guards)?;
        }
        for ty in self.descriptor.read_types() {
            self.borrow_column(table, ty, false, &mut guards)?;
        }
        Ok(guards)
    }

    fn borrow_column(
        &self,
        table: &'w ArchetypeTable,
        ty: ComponentTypeId,
        write: bool,
        guards: &mut Borrowed<'w>,
    ) -> Result<(), QueryError> {
        if guards.iter().any(|(t, _)| *t == ty) {
            return Ok(());
        }
        // Optionals may be absent from this archetype.
        let Some(lock) = table.column(ty) else {
            return Ok(());
        };
        let guard = if write {
            lock.try_write().map(ColumnGuard::Write)
        } else {
            lock.try_read().map(ColumnGuard::Read)
        };
        let guard = guard.ok_or_else(|| QueryError::Borrowed {
            component: self.world.registry().name_of(ty),
        })?;
        guards.push((ty, guard));
        Ok(())
    }
}

/// One matched entity during [`Query::for_each`].
pub struct Row<'q, 'w> {
    entity: Entity,
    row: usize,
    tick: u64,
    guards: &'q mut Borrowed<'w>,
}

impl Row<'_, '_> {
    /// The entity this row belongs to.
    #[must_use]
    pub fn entity(&self) -> Entity {
        self.entity
    }

    fn column(&self, ty: ComponentTypeId) -> Option<&Column> {
        self.guards
            .iter()
            .find(|(t, _)| *t == ty)
            .map(|(_, guard)| guard.column())
    }

    /// Returns `true` if the entity has `T` and the query borrowed it
    /// (useful for optionals).
    #[must_use]
    pub fn has<T: Component>(&self) -> bool {
        self.column(T::component_type_id()).is_some()
    }

    /// Shared access to a read, written or optional component.
    #[must_use]
    pub fn get<T: Component>(&self) -> Option<&T> {
        self.column(T::component_type_id())?.get::<T>(self.row)
    }

    /// Mutable access to a written component. Marks the value as changed.
    /// `None` for components the query only reads.
    #[must_use]
    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        let ty = T::component_type_id();
        let (row, tick) = (self.row, self.tick);
        self.guards
            .iter_mut()
            .find_map(|(t, guard)| match guard {
                ColumnGuard::Write(column) if *t == ty => Some(column),
                _ => None,
            })
            .and_then(|column| column.get_mut_stamped::<T>(row, tick))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_conflict_both_read() {
        let transform = ComponentTypeId(1);

        let q1 = QueryDescriptor::new().read(transform);
        let q2 = QueryDescriptor::new().read(transform);

        assert!(!q1.conflicts_with(&q2));
    }

    #[test]
    fn test_conflict_read_vs_write() {
        let transform = ComponentTypeId(1);

        let q1 = QueryDescriptor::new().read(transform);
        let q2 = QueryDescriptor::new().write(transform);

        assert!(q1.conflicts_with(&q2));
    }

    #[test]
    fn test_conflict_write_vs_write() {
        let velocity = ComponentTypeId(2);

        let q1 = QueryDescriptor::new().write(velocity);
        let q2 = QueryDescriptor::new().write(velocity);

        assert!(q1.conflicts_with(&q2));
    }

    #[test]
    fn test_conflict_optional_vs_write() {
        let tag = ComponentTypeId(4);

        let q1 = QueryDescriptor::new().optional(tag);
        let q2 = QueryDescriptor::new().write(tag);

        assert!(q1.conflicts_with(&q2));
    }

    #[test]
    fn test_no_conflict_different_types() {
        let velocity = ComponentTypeId(2);
        let ai_state = ComponentTypeId(3);
        let transform = ComponentTypeId(1);

        // Physics: reads Transform, writes Velocity
        let physics = QueryDescriptor::new().read(transform).write(velocity);
        // AI: reads Transform, writes AiState
        let ai = QueryDescriptor::new().read(transform).write(ai_state);

        assert!(!physics.conflicts_with(&ai));
    }

    #[test]
    fn test_required_types() {
        let a = ComponentTypeId(1);
        let b = ComponentTypeId(2);
        let c = ComponentTypeId(3);

        let q = QueryDescriptor::new().read(a).write(b).optional(c);

        let required = q.required_types();
        assert!(required.contains(&a));
        assert!(required.contains(&b));
        assert!(!required.contains(&c));
    }

    #[test]
    fn test_archetype_filter_matching() {
        let a = ComponentTypeId(1);
        let b = ComponentTypeId(2);
        let c = ComponentTypeId(3);

        let filter = QueryDescriptor::new().read(a).without(c).archetype_filter();
        let ab: BTreeSet<_> = [a, b].into_iter().collect();
        let ac: BTreeSet<_> = [a, c].into_iter().collect();
        let only_b: BTreeSet<_> = [b].into_iter().collect();

        assert!(filter.matches(&ab));
        assert!(!filter.matches(&ac));
        assert!(!filter.matches(&only_b));
    }

    #[test]
    fn test_changed_filter_requires_component() {
        let a = ComponentTypeId(1);
        let filter = QueryDescriptor::new().changed(a).archetype_filter();
        assert!(filter.required.contains(&a));
    }
}
