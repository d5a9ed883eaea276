//! Singleton resources keyed by type.
//!
//! A resource is global state that belongs to no entity: frame timing,
//! configuration injected by the host, physics settings and so on. The store
//! holds at most one value per [`ResourceTypeId`].
//!
//! Every value sits behind its own lock so systems in the same batch can
//! borrow different resources at the same time. Borrows never wait: if the
//! lock is held incompatibly the accessor returns `None`.

use std::any::Any;
use std::collections::HashMap;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use serde::{Deserialize, Serialize};

use crate::component::fnv1a;
use crate::error::ResourceError;

/// Shared borrow of a resource.
pub type Res<'a, T> = MappedRwLockReadGuard<'a, T>;

/// Exclusive borrow of a resource.
pub type ResMut<'a, T> = MappedRwLockWriteGuard<'a, T>;

/// Type key of a resource, the FNV-1a 64-bit hash of its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceTypeId(pub u64);

impl ResourceTypeId {
    /// Compute the key from a resource name.
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        Self(fnv1a(name))
    }

    /// Compute the key for the Rust resource type `T`.
    #[must_use]
    pub fn of<T: Resource>() -> Self {
        Self::from_name(T::type_name())
    }
}

impl std::fmt::Display for ResourceTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "resource#{:016x}", self.0)
    }
}

/// Marker trait for singleton resources.
pub trait Resource: Send + Sync + 'static {
    /// Unique human-readable name.
    fn type_name() -> &'static str;

    /// The resource's type key.
    fn resource_type_id() -> ResourceTypeId {
        ResourceTypeId::from_name(Self::type_name())
    }
}

/// A type-erased resource value, as carried by commands.
pub struct ResourceValue {
    type_id: ResourceTypeId,
    name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl ResourceValue {
    /// Box a typed resource.
    #[must_use]
    pub fn new<T: Resource>(value: T) -> Self {
        Self {
            type_id: T::resource_type_id(),
            name: T::type_name(),
            value: Box::new(value),
        }
    }

    /// The resource's type key.
    #[must_use]
    pub fn type_id(&self) -> ResourceTypeId {
        self.type_id
    }

    /// The resource's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Unbox the value as `T`. Returns the value unchanged on a type
    /// mismatch.
    pub fn downcast<T: Resource>(self) -> Result<T, Self> {
        let Self {
            type_id,
            name,
            value,
        } = self;
        match value.downcast::<T>() {
            Ok(typed) => Ok(*typed),
            Err(value) => Err(Self {
                type_id,
                name,
                value,
            }),
        }
    }
}

impl std::fmt::Debug for ResourceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceValue")
            .field("type_id", &self.type_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct ResourceEntry {
    name: &'static str,
    value: RwLock<Box<dyn Any + Send + Sync>>,
}

/// Storage for singleton resources.
#[derive(Default)]
pub struct ResourceStore {
    entries: HashMap<ResourceTypeId, ResourceEntry>,
}

impl ResourceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource, replacing any existing instance of the same type.
    /// Returns `true` if a previous instance was replaced.
    pub fn insert<T: Resource>(&mut self, value: T) -> bool {
        self.insert_value(ResourceValue::new(value))
    }

    /// Insert a type-erased resource, replacing any existing instance.
    pub fn insert_value(&mut self, value: ResourceValue) -> bool {
        let ResourceValue {
            type_id,
            name,
            value,
        } = value;
        self.entries
            .insert(
                type_id,
                ResourceEntry {
                    name,
                    value: RwLock::new(value),
                },
            )
            .is_some()
    }

    /// Remove a resource by key.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::NotFound`] if no resource of the type is
    /// present.
    pub fn remove(&mut self, type_id: ResourceTypeId) -> Result<ResourceValue, ResourceError> {
        let entry = self
            .entries
            .remove(&type_id)
            .ok_or(ResourceError::NotFound(type_id))?;
        Ok(ResourceValue {
            type_id,
            name: entry.name,
            value: entry.value.into_inner(),
        })
    }

    /// Remove a resource and return it typed.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::NotFound`] if absent, or
    /// [`ResourceError::TypeMismatch`] if the stored value is not a `T` (the
    /// value is then put back).
    pub fn remove_typed<T: Resource>(&mut self) -> Result<T, ResourceError> {
        match self.remove(T::resource_type_id())?.downcast::<T>() {
            Ok(value) => Ok(value),
            Err(original) => {
                let name = original.name();
                self.insert_value(original);
                Err(ResourceError::TypeMismatch(name))
            }
        }
    }

    /// Returns `true` if a resource of the type is present.
    #[must_use]
    pub fn contains(&self, type_id: ResourceTypeId) -> bool {
        self.entries.contains_key(&type_id)
    }

    /// Returns the stored name for a key, if present.
    #[must_use]
    pub fn name_of(&self, type_id: ResourceTypeId) -> Option<&'static str> {
        self.entries.get(&type_id).map(|entry| entry.name)
    }

    /// Shared borrow of a resource. `None` if absent or exclusively
    /// borrowed.
    #[must_use]
    pub fn get<T: Resource>(&self) -> Option<Res<'_, T>> {
        let entry = self.entries.get(&T::resource_type_id())?;
        let guard = entry.value.try_read()?;
        RwLockReadGuard::try_map(guard, |value| (**value).downcast_ref::<T>()).ok()
    }

    /// Exclusive borrow of a resource. `None` if absent or borrowed.
    #[must_use]
    pub fn get_mut<T: Resource>(&self) -> Option<ResMut<'_, T>> {
        let entry = self.entries.get(&T::resource_type_id())?;
        let guard = entry.value.try_write()?;
        RwLockWriteGuard::try_map(guard, |value| (**value).downcast_mut::<T>()).ok()
    }

    /// Returns the number of stored resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.values().map(|entry| entry.name))
            .finish()
    }
}
