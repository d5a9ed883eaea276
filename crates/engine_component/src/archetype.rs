//! Archetype definitions and columnar storage.
//!
//! An archetype is a unique combination of component types. Entities sharing
//! the same set of components are grouped into the same archetype table, with
//! one [`Column`] per component type and row `i` of every column belonging to
//! `entities[i]`.
//!
//! Columns are type-erased behind [`ColumnStorage`] so a table can hold any
//! registered component; each concrete column is a plain `Vec<T>`
//! ([`TypedColumn`]) built by the registry's column constructor.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentRegistry, ComponentTypeId};
use crate::entity::Entity;
use crate::error::WorldError;

/// A dense identifier for an archetype: its index in the world's table list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchetypeId(pub u32);

impl ArchetypeId {
    /// The archetype with no components. Always present.
    pub const EMPTY: ArchetypeId = ArchetypeId(0);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Object-safe interface over a column of one component type.
pub trait ColumnStorage: Any + Send + Sync {
    /// Number of values stored.
    fn len(&self) -> usize;

    /// Returns `true` if the column holds no values.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upcast for typed access.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for typed mutable access.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Build an empty column of the same component type.
    fn new_empty(&self) -> Box<dyn ColumnStorage>;

    /// Append a boxed value. Hands the box back on a type mismatch.
    fn push_boxed(
        &mut self,
        value: Box<dyn Any + Send + Sync>,
    ) -> Result<(), Box<dyn Any + Send + Sync>>;

    /// Overwrite the value at `row`. Hands the box back on a type mismatch
    /// or an out-of-range row.
    fn replace_boxed(
        &mut self,
        row: usize,
        value: Box<dyn Any + Send + Sync>,
    ) -> Result<(), Box<dyn Any + Send + Sync>>;

    /// Swap-remove `row` and return its value.
    fn swap_remove_boxed(&mut self, row: usize) -> Option<Box<dyn Any + Send + Sync>>;

    /// Swap-remove `row` and push its value onto `dest`. Returns `false` if
    /// the row is out of range or `dest` stores a different type.
    fn swap_remove_into(&mut self, row: usize, dest: &mut dyn ColumnStorage) -> bool;

    /// Swap-remove `row` and drop its value.
    fn swap_remove_drop(&mut self, row: usize);
}

/// A column of `T` values.
#[derive(Debug)]
pub struct TypedColumn<T> {
    values: Vec<T>,
}

impl<T: Component> TypedColumn<T> {
    /// Create an empty column.
    #[must_use]
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Column constructor used by [`ComponentInfo`](crate::ComponentInfo).
    #[must_use]
    pub fn boxed() -> Box<dyn ColumnStorage> {
        Box::new(Self::new())
    }

    /// The stored values as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// The stored values as a mutable slice.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values
    }
}

impl<T: Component> Default for TypedColumn<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> ColumnStorage for TypedColumn<T> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn new_empty(&self) -> Box<dyn ColumnStorage> {
        Self::boxed()
    }

    fn push_boxed(
        &mut self,
        value: Box<dyn Any + Send + Sync>,
    ) -> Result<(), Box<dyn Any + Send + Sync>> {
        let value = value.downcast::<T>()?;
        self.values.push(*value);
        Ok(())
    }

    fn replace_boxed(
        &mut self,
        row: usize,
        value: Box<dyn Any + Send + Sync>,
    ) -> Result<(), Box<dyn Any + Send + Sync>> {
        if row >= self.values.len() {
            return Err(value);
        }
        let value = value.downcast::<T>()?;
        self.values[row] = *value;
        Ok(())
    }

    fn swap_remove_boxed(&mut self, row: usize) -> Option<Box<dyn Any + Send + Sync>> {
        if row >= self.values.len() {
            return None;
        }
        Some(Box::new(self.values.swap_remove(row)))
    }

    fn swap_remove_into(&mut self, row: usize, dest: &mut dyn ColumnStorage) -> bool {
        if row >= self.values.len() {
            return false;
        }
        let Some(dest) = dest.as_any_mut().downcast_mut::<Self>() else {
            return false;
        };
        dest.values.push(self.values.swap_remove(row));
        true
    }

    fn swap_remove_drop(&mut self, row: usize) {
        if row < self.values.len() {
            self.values.swap_remove(row);
        }
    }
}

/// A column in an archetype table: the values of one component type plus
/// the change tick of every row.
pub struct Column {
    /// The component type stored in this column.
    pub type_id: ComponentTypeId,
    /// Size of a single component instance in bytes.
    pub item_size: usize,
    storage: Box<dyn ColumnStorage>,
    changed_ticks: Vec<u64>,
}

impl Column {
    /// Create a new empty column around an empty storage.
    #[must_use]
    pub fn new(type_id: ComponentTypeId, item_size: usize, storage: Box<dyn ColumnStorage>) -> Self {
        Self {
            type_id,
            item_size,
            storage,
            changed_ticks: Vec::new(),
        }
    }

    /// Returns the number of component instances stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Returns `true` if this column contains no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Typed view of the whole column. `None` if `T` is not the stored type.
    #[must_use]
    pub fn as_slice<T: Component>(&self) -> Option<&[T]> {
        self.storage
            .as_any()
            .downcast_ref::<TypedColumn<T>>()
            .map(|column| column.as_slice())
    }

    /// Get a typed reference to the component at `row`.
    #[must_use]
    pub fn get<T: Component>(&self, row: usize) -> Option<&T> {
        self.as_slice::<T>()?.get(row)
    }

    /// Get a typed mutable reference to the component at `row`. Does not
    /// touch the change tick; see [`Column::get_mut_stamped`].
    #[must_use]
    pub fn get_mut<T: Component>(&mut self, row: usize) -> Option<&mut T> {
        self.storage
            .as_any_mut()
            .downcast_mut::<TypedColumn<T>>()?
            .as_mut_slice()
            .get_mut(row)
    }

    /// Mutable access that records `tick` as the row's change tick.
    #[must_use]
    pub fn get_mut_stamped<T: Component>(&mut self, row: usize, tick: u64) -> Option<&mut T> {
        if let Some(slot) = self.changed_ticks.get_mut(row) {
            *slot = tick;
        }
        self.get_mut::<T>(row)
    }

    /// The tick at which `row` was last inserted or mutably accessed.
    #[must_use]
    pub fn changed_tick(&self, row: usize) -> Option<u64> {
        self.changed_ticks.get(row).copied()
    }

    pub(crate) fn push_boxed(
        &mut self,
        value: Box<dyn Any + Send + Sync>,
        tick: u64,
    ) -> Result<(), Box<dyn Any + Send + Sync>> {
        self.storage.push_boxed(value)?;
        self.changed_ticks.push(tick);
        Ok(())
    }

    pub(crate) fn replace_boxed(
        &mut self,
        row: usize,
        value: Box<dyn Any + Send + Sync>,
        tick: u64,
    ) -> Result<(), Box<dyn Any + Send + Sync>> {
        self.storage.replace_boxed(row, value)?;
        self.changed_ticks[row] = tick;
        Ok(())
    }

    pub(crate) fn swap_remove_boxed(&mut self, row: usize) -> Option<Box<dyn Any + Send + Sync>> {
        let value = self.storage.swap_remove_boxed(row)?;
        self.changed_ticks.swap_remove(row);
        Some(value)
    }

    /// Move `row` into `dest`, keeping its change tick.
    pub(crate) fn move_row_into(&mut self, row: usize, dest: &mut Column) -> bool {
        if !self.storage.swap_remove_into(row, dest.storage.as_mut()) {
            return false;
        }
        dest.changed_ticks.push(self.changed_ticks.swap_remove(row));
        true
    }

    pub(crate) fn swap_remove_drop(&mut self, row: usize) {
        if row < self.changed_ticks.len() {
            self.storage.swap_remove_drop(row);
            self.changed_ticks.swap_remove(row);
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("type_id", &self.type_id)
            .field("item_size", &self.item_size)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// A table of entities sharing the same archetype (set of component types).
///
/// Each column sits behind its own lock so that systems in one batch can
/// borrow disjoint columns of the same table at the same time. Structural
/// changes go through `&mut` and never take the locks.
#[derive(Debug)]
pub struct ArchetypeTable {
    /// The archetype identifier.
    pub id: ArchetypeId,
    component_types: BTreeSet<ComponentTypeId>,
    entities: Vec<Entity>,
    /// One column per component type, in the same order as `component_types`.
    columns: Vec<RwLock<Column>>,
    /// Cached migration targets, keyed by the added component type.
    add_edges: HashMap<ComponentTypeId, ArchetypeId>,
    /// Cached migration targets, keyed by the removed component type.
    remove_edges: HashMap<ComponentTypeId, ArchetypeId>,
}

impl ArchetypeTable {
    /// Create a new, empty archetype table with one column per type.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::UnregisteredComponent`] if a type is missing
    /// from the registry.
    pub fn new(
        id: ArchetypeId,
        component_types: BTreeSet<ComponentTypeId>,
        registry: &ComponentRegistry,
    ) -> Result<Self, WorldError> {
        let columns = component_types
            .iter()
            .map(|&type_id| {
                let info = registry
                    .get(type_id)
                    .ok_or(WorldError::UnregisteredComponent(type_id))?;
                Ok(RwLock::new(Column::new(info.type_id, info.size, (info.constructor)())))
            })
            .collect::<Result<Vec<_>, WorldError>>()?;

        Ok(Self {
            id,
            component_types,
            entities: Vec::new(),
            columns,
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
        })
    }

    /// The table for entities with no components.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            id: ArchetypeId::EMPTY,
            component_types: BTreeSet::new(),
            entities: Vec::new(),
            columns: Vec::new(),
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
        }
    }

    /// Returns the number of entities in this archetype table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if this table has no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The set of component types defining this archetype.
    #[must_use]
    pub fn component_types(&self) -> &BTreeSet<ComponentTypeId> {
        &self.component_types
    }

    /// Entities in row order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Returns `true` if this archetype contains the given component type.
    #[must_use]
    pub fn has_component(&self, type_id: ComponentTypeId) -> bool {
        self.component_types.contains(&type_id)
    }

    /// Returns the column index for the given component type, if present.
    #[must_use]
    pub fn column_index(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.component_types.iter().position(|&tid| tid == type_id)
    }

    /// The locked column for a component type.
    #[must_use]
    pub fn column(&self, type_id: ComponentTypeId) -> Option<&RwLock<Column>> {
        self.columns.get(self.column_index(type_id)?)
    }

    /// Exclusive access to a column, bypassing the lock.
    #[must_use]
    pub fn column_mut(&mut self, type_id: ComponentTypeId) -> Option<&mut Column> {
        let index = self.column_index(type_id)?;
        self.columns.get_mut(index).map(|lock| lock.get_mut())
    }

    pub(crate) fn columns_mut(&mut self) -> impl Iterator<Item = &mut Column> {
        self.columns.iter_mut().map(|lock| lock.get_mut())
    }

    pub(crate) fn push_entity(&mut self, entity: Entity) -> usize {
        self.entities.push(entity);
        self.entities.len() - 1
    }

    /// Swap-remove an entity row from the entity list only. Returns the
    /// entity that moved into `row`, if any. Columns must already have been
    /// swap-removed at the same row.
    pub(crate) fn swap_remove_entity(&mut self, row: usize) -> Option<Entity> {
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    /// Drop a whole row. Returns the entity that moved into `row`, if any.
    pub(crate) fn swap_remove_row(&mut self, row: usize) -> Option<Entity> {
        for column in self.columns_mut() {
            column.swap_remove_drop(row);
        }
        self.swap_remove_entity(row)
    }

    pub(crate) fn add_edge(&self, type_id: ComponentTypeId) -> Option<ArchetypeId> {
        self.add_edges.get(&type_id).copied()
    }

    pub(crate) fn remove_edge(&self, type_id: ComponentTypeId) -> Option<ArchetypeId> {
        self.remove_edges.get(&type_id).copied()
    }

    pub(crate) fn set_add_edge(&mut self, type_id: ComponentTypeId, target: ArchetypeId) {
        self.add_edges.insert(type_id, target);
    }

    pub(crate) fn set_remove_edge(&mut self, type_id: ComponentTypeId, target: ArchetypeId) {
        self.remove_edges.insert(type_id, target);
    }
}
