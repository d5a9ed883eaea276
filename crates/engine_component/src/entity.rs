//! Entity type and generational allocation.
//!
//! An [`Entity`] is a lightweight `(index, generation)` pair with no inherent
//! data. Indices are recycled after destruction; the generation stored for an
//! index is bumped on every destruction so handles to a destroyed entity stop
//! resolving instead of aliasing whichever entity reuses the slot.

use serde::{Deserialize, Serialize};

use crate::error::WorldError;

/// A generational entity identifier.
///
/// Entities are pure identifiers. Components are attached to entities to
/// give them meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    /// The null / invalid entity sentinel. Never returned by an allocator.
    pub const INVALID: Entity = Entity {
        index: u32::MAX,
        generation: u32::MAX,
    };

    /// Create an entity handle from raw parts.
    #[must_use]
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// The slot index. Shared by every entity that ever lived in the slot.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// The generation of the slot when this handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Returns `false` for [`Entity::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    alive: bool,
}

/// Allocates generational entity handles with index reuse.
#[derive(Debug)]
pub struct EntityAllocator {
    slots: Vec<Slot>,
    free: Vec<u32>,
    alive: usize,
    max_slots: u32,
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::with_max_slots(Self::MAX_SLOTS)
    }
}

impl EntityAllocator {
    /// Largest number of slots an allocator can hold. `u32::MAX` is reserved
    /// for [`Entity::INVALID`].
    pub const MAX_SLOTS: u32 = u32::MAX;

    /// Creates a new, empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator that holds at most `max_slots` indices.
    #[must_use]
    pub fn with_max_slots(max_slots: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            alive: 0,
            max_slots: max_slots.min(Self::MAX_SLOTS),
        }
    }

    /// Allocates a live entity, reusing a freed index when one is available.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::EntitiesExhausted`] if no index is free and
    /// every slot is in use.
    pub fn allocate(&mut self) -> Result<Entity, WorldError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.alive = true;
            self.alive += 1;
            return Ok(Entity::from_raw_parts(index, slot.generation));
        }
        let index = u32::try_from(self.slots.len())
            .ok()
            .filter(|&i| i < self.max_slots)
            .ok_or(WorldError::EntitiesExhausted)?;
        self.slots.push(Slot {
            generation: 0,
            alive: true,
        });
        self.alive += 1;
        Ok(Entity::from_raw_parts(index, 0))
    }

    /// Frees an entity's index for reuse and bumps its generation.
    ///
    /// Returns `false` if the handle was already dead or stale.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = &mut self.slots[entity.index as usize];
        slot.alive = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(entity.index);
        self.alive -= 1;
        true
    }

    /// Returns `true` if the handle names the current live occupant of its
    /// slot.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index as usize)
            .is_some_and(|slot| slot.alive && slot.generation == entity.generation)
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn count(&self) -> usize {
        self.alive
    }

    /// Returns the number of slots ever allocated, live or free.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_allocator_produces_unique_ids() {
        let mut alloc = EntityAllocator::new();
        let e1 = alloc.allocate().unwrap();
        let e2 = alloc.allocate().unwrap();
        let e3 = alloc.allocate().unwrap();
        assert_eq!(e1.index(), 0);
        assert_eq!(e2.index(), 1);
        assert_eq!(e3.index(), 2);
        assert_eq!(alloc.count(), 3);
    }

    #[test]
    fn test_entity_invalid() {
        assert!(!Entity::INVALID.is_valid());
        assert!(Entity::from_raw_parts(0, 0).is_valid());
        assert!(!EntityAllocator::new().is_alive(Entity::INVALID));
    }

    #[test]
    fn test_free_reuses_index_with_new_generation() {
        let mut alloc = EntityAllocator::new();
        let first = alloc.allocate().unwrap();
        assert!(alloc.free(first));
        let second = alloc.allocate().unwrap();
        assert_eq!(second.index(), first.index());
        assert!(second.generation() > first.generation());
        assert!(!alloc.is_alive(first));
        assert!(alloc.is_alive(second));
    }

    #[test]
    fn test_exhausted_allocator_returns_error() {
        let mut alloc = EntityAllocator::with_max_slots(2);
        let first = alloc.allocate().unwrap();
        alloc.allocate().unwrap();
        assert_eq!(alloc.allocate(), Err(WorldError::EntitiesExhausted));
        assert_eq!(alloc.count(), 2);

        // A freed slot is still available.
        assert!(alloc.free(first));
        let reused = alloc.allocate().unwrap();
        assert_eq!(reused.index(), first.index());
    }

    #[test]
    fn test_double_free_is_rejected() {
        let mut alloc = EntityAllocator::new();
        let e = alloc.allocate().unwrap();
        assert!(alloc.free(e));
        assert!(!alloc.free(e));
        assert_eq!(alloc.count(), 0);
    }

    #[test]
    fn test_entity_serialization_roundtrip() {
        let entity = Entity::from_raw_parts(7, 3);
        let json = serde_json::to_string(&entity).unwrap();
        let restored: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(entity, restored);
    }

    proptest! {
        #[test]
        fn prop_stale_handles_never_resolve(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
            let mut alloc = EntityAllocator::new();
            let mut live: Vec<Entity> = Vec::new();
            let mut dead: Vec<Entity> = Vec::new();
            for allocate in ops {
                if allocate || live.is_empty() {
                    let e = alloc.allocate().unwrap();
                    // A reused index always carries a strictly greater generation
                    // than every dead handle for that index.
                    for d in dead.iter().filter(|d| d.index() == e.index()) {
                        prop_assert!(e.generation() > d.generation());
                    }
                    live.push(e);
                } else {
                    let e = live.swap_remove(0);
                    prop_assert!(alloc.free(e));
                    dead.push(e);
                }
                for d in &dead {
                    prop_assert!(!alloc.is_alive(*d));
                }
                for l in &live {
                    prop_assert!(alloc.is_alive(*l));
                }
            }
            prop_assert_eq!(alloc.count(), live.len());
        }
    }
}
