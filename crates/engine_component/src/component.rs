//! Core [`Component`] trait, type keys and the component registry.
//!
//! Every piece of data stored on an entity must implement [`Component`]. The
//! trait requires `Send + Sync + 'static` so component columns can be shared
//! with systems running on worker threads.
//!
//! ## Type Identity
//!
//! [`ComponentTypeId`] is derived from the component's **string name** using
//! the FNV-1a 64-bit hash algorithm. The same scheme keys resources and
//! events, so a type key is stable across builds and processes as long as the
//! name is.
//!
//! ## Registration
//!
//! Nothing is discovered implicitly. A component type must be registered with
//! the [`ComponentRegistry`] before it can be stored; registration records the
//! type key, the byte size and the column constructor used when a new
//! archetype needs a column for the type.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::archetype::{ColumnStorage, TypedColumn};
use crate::error::RegistryError;

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Hash a type name with FNV-1a 64-bit.
///
/// ```text
/// hash = 0xcbf29ce484222325          (offset basis)
/// for each byte in name.as_bytes():
///     hash = hash XOR byte
///     hash = hash * 0x00000100000001b3  (prime)
/// return hash
/// ```
#[must_use]
pub const fn fnv1a(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// A unique identifier for a component type, derived from its string name
/// using the FNV-1a 64-bit hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u64);

impl ComponentTypeId {
    /// Compute the [`ComponentTypeId`] from a component's string name.
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        Self(fnv1a(name))
    }

    /// Compute the [`ComponentTypeId`] for a Rust component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self::from_name(T::type_name())
    }
}

impl std::fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "component#{:016x}", self.0)
    }
}

/// The core component trait.
///
/// Components are plain data: they carry no behavior the runtime relies on.
///
/// # Examples
///
/// ```rust
/// use engine_component::Component;
///
/// #[derive(Debug, Clone, Copy)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     fn type_name() -> &'static str { "Health" }
/// }
/// ```
pub trait Component: Send + Sync + 'static {
    /// A human-readable name for this component type. Must be unique among
    /// registered components.
    fn type_name() -> &'static str;

    /// Returns the [`ComponentTypeId`] for this component.
    fn component_type_id() -> ComponentTypeId {
        ComponentTypeId::from_name(Self::type_name())
    }
}

/// Creates an empty, correctly typed column for one component type.
pub type ColumnConstructor = fn() -> Box<dyn ColumnStorage>;

/// Registration record for a component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// The unique type key.
    pub type_id: ComponentTypeId,
    /// The human-readable name of the component (e.g. `"Position"`).
    pub name: &'static str,
    /// Size of one component instance in bytes.
    pub size: usize,
    /// The Rust type backing the component, used to reject two distinct
    /// types registered under the same name.
    pub rust_type: TypeId,
    /// Builds an empty column for this component.
    pub constructor: ColumnConstructor,
}

impl ComponentInfo {
    /// Build the registration record for `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: T::component_type_id(),
            name: T::type_name(),
            size: std::mem::size_of::<T>(),
            rust_type: TypeId::of::<T>(),
            constructor: TypedColumn::<T>::boxed,
        }
    }
}

/// Registry of every component type the world can store.
///
/// The registry only grows. Its [`generation`](Self::generation) counter
/// increments on every successful registration so caches keyed on the set of
/// known types can tell when they are stale.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    infos: BTreeMap<ComponentTypeId, ComponentInfo>,
    generation: u64,
}

impl ComponentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the component type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if a component with the same type
    /// key is already registered.
    pub fn register<T: Component>(&mut self) -> Result<ComponentTypeId, RegistryError> {
        self.register_info(ComponentInfo::of::<T>())
    }

    /// Register a component from an explicit `(type key, size, constructor)`
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the type key is taken, whether
    /// by the same Rust type or by a different type with a colliding name.
    pub fn register_info(&mut self, info: ComponentInfo) -> Result<ComponentTypeId, RegistryError> {
        if let Some(existing) = self.infos.get(&info.type_id) {
            return Err(RegistryError::Duplicate {
                kind: "component",
                name: existing.name,
            });
        }
        let type_id = info.type_id;
        self.infos.insert(type_id, info);
        self.generation += 1;
        Ok(type_id)
    }

    /// Returns the registration record for a type key.
    #[must_use]
    pub fn get(&self, type_id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(&type_id)
    }

    /// Returns `true` if the type key is registered.
    #[must_use]
    pub fn contains(&self, type_id: ComponentTypeId) -> bool {
        self.infos.contains_key(&type_id)
    }

    /// Returns the registered name for a type key, or `"<unregistered>"`.
    #[must_use]
    pub fn name_of(&self, type_id: ComponentTypeId) -> &'static str {
        self.infos.get(&type_id).map_or("<unregistered>", |info| info.name)
    }

    /// Returns the number of registered component types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns `true` if no component type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Incremented on every successful registration.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Iterate over all registration records in type-key order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.values()
    }
}

/// A type-erased component value travelling through commands and
/// structural mutations.
pub struct ComponentValue {
    type_id: ComponentTypeId,
    name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl ComponentValue {
    /// Box a typed component.
    #[must_use]
    pub fn new<T: Component>(value: T) -> Self {
        Self {
            type_id: T::component_type_id(),
            name: T::type_name(),
            value: Box::new(value),
        }
    }

    pub(crate) fn from_parts(
        type_id: ComponentTypeId,
        name: &'static str,
        value: Box<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            type_id,
            name,
            value,
        }
    }

    /// The component's type key.
    #[must_use]
    pub fn type_id(&self) -> ComponentTypeId {
        self.type_id
    }

    /// The component's registered name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Borrow the value as `T`, if it is one.
    #[must_use]
    pub fn downcast_ref<T: Component>(&self) -> Option<&T> {
        (*self.value).downcast_ref::<T>()
    }

    /// Unbox the value as `T`. Returns the value unchanged on a type
    /// mismatch.
    pub fn downcast<T: Component>(self) -> Result<T, Self> {
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

    /// The [`TypeId`] of the boxed Rust value.
    pub(crate) fn rust_type(&self) -> TypeId {
        (*self.value).type_id()
    }

    pub(crate) fn into_inner(self) -> Box<dyn Any + Send + Sync> {
        self.value
    }
}

impl std::fmt::Debug for ComponentValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentValue")
            .field("type_id", &self.type_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Health {
        current: f32,
        max: f32,
    }

    impl Component for Health {
        fn type_name() -> &'static str {
            "Health"
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    impl Component for Velocity {
        fn type_name() -> &'static str {
            "Velocity"
        }
    }

    /// Different Rust type, same registered name as [`Health`].
    struct FakeHealth;

    impl Component for FakeHealth {
        fn type_name() -> &'static str {
            "Health"
        }
    }

    #[test]
    fn test_component_type_id_matches_from_name() {
        assert_eq!(
            Health::component_type_id(),
            ComponentTypeId::from_name("Health")
        );
        assert_eq!(ComponentTypeId::of::<Health>(), Health::component_type_id());
    }

    #[test]
    fn test_component_type_id_differs_between_types() {
        assert_ne!(Health::component_type_id(), Velocity::component_type_id());
    }

    #[test]
    fn test_fnv1a_known_vector() {
        // FNV-1a 64-bit of empty string is the offset basis itself.
        assert_eq!(
            ComponentTypeId::from_name(""),
            ComponentTypeId(0xcbf2_9ce4_8422_2325)
        );
        // Published FNV-1a 64-bit test vector for "a".
        assert_eq!(fnv1a("a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_component_info_records_size() {
        let info = ComponentInfo::of::<Health>();
        assert_eq!(info.name, "Health");
        assert_eq!(info.size, std::mem::size_of::<Health>());
        assert_eq!(info.rust_type, TypeId::of::<Health>());
        let column = (info.constructor)();
        assert_eq!(column.len(), 0);
    }

    #[test]
    fn test_registry_register_and_lookup() {
        let mut registry = ComponentRegistry::new();
        let id = registry.register::<Health>().unwrap();
        assert!(registry.contains(id));
        assert_eq!(registry.name_of(id), "Health");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.generation(), 1);
    }

    #[test]
    fn test_registry_rejects_duplicate() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Health>().unwrap();
        let err = registry.register::<Health>().unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { name: "Health", .. }));
        assert_eq!(registry.generation(), 1);
    }

    #[test]
    fn test_registry_rejects_name_collision() {
        let mut registry = ComponentRegistry::new();
        registry.register::<Health>().unwrap();
        assert!(registry.register::<FakeHealth>().is_err());
    }

    #[test]
    fn test_component_value_downcast() {
        let value = ComponentValue::new(Velocity { x: 1.0, y: 2.0 });
        assert_eq!(value.type_id(), Velocity::component_type_id());
        assert_eq!(value.name(), "Velocity");
        assert!(value.downcast_ref::<Health>().is_none());

        let value = value.downcast::<Health>().unwrap_err();
        let velocity = value.downcast::<Velocity>().unwrap();
        assert_eq!(velocity, Velocity { x: 1.0, y: 2.0 });
    }
}
