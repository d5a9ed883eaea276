//! Double-buffered event queues with independent reader cursors.
//!
//! Every registered event type gets a queue holding two generations of
//! events: `previous` and `current`. Sending appends to `current`. At the end
//! of every scheduling cycle [`EventBus::update`] drops `previous`, turns
//! `current` into `previous` and starts an empty `current`. An event is
//! therefore readable during the cycle it was sent in and the one after it;
//! after that it is gone, read or not.
//!
//! Each event gets a sequential id. A reader is identified by a [`ReaderId`]
//! and keeps one cursor per event type (the id of the next event it has not
//! seen), so any number of systems can consume the same events without
//! affecting each other.

use std::any::Any;
use std::collections::HashMap;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::component::fnv1a;
use crate::error::{EventError, RegistryError};

/// Type key of an event, the FNV-1a 64-bit hash of its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventTypeId(pub u64);

impl EventTypeId {
    /// Compute the key from an event name.
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        Self(fnv1a(name))
    }

    /// Compute the key for the Rust event type `T`.
    #[must_use]
    pub fn of<T: Event>() -> Self {
        Self::from_name(T::type_name())
    }
}

/// A typed message broadcast between systems.
///
/// Readers receive clones, so events should be small plain data.
pub trait Event: Clone + Send + Sync + 'static {
    /// Unique human-readable name.
    fn type_name() -> &'static str;

    /// The event's type key.
    fn event_type_id() -> EventTypeId {
        EventTypeId::from_name(Self::type_name())
    }
}

/// Identity of one event reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReaderId(Uuid);

impl ReaderId {
    /// Create a fresh, unique reader identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReaderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reader-{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct EventInstance<T> {
    id: u64,
    generation: u64,
    event: T,
}

/// The two buffered generations of one event type.
#[derive(Debug)]
pub struct EventQueue<T> {
    previous: Vec<EventInstance<T>>,
    current: Vec<EventInstance<T>>,
    next_id: u64,
}

impl<T: Event> EventQueue<T> {
    fn new() -> Self {
        Self {
            previous: Vec::new(),
            current: Vec::new(),
            next_id: 0,
        }
    }

    fn send(&mut self, event: T, generation: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.current.push(EventInstance {
            id,
            generation,
            event,
        });
        id
    }

    /// Id of the oldest event still buffered, or the next id if none is.
    fn oldest_id(&self) -> u64 {
        self.previous
            .first()
            .or(self.current.first())
            .map_or(self.next_id, |instance| instance.id)
    }

    /// Clone every event with an id at or after `cursor`. Returns the events,
    /// the advanced cursor and how many events the cursor had already lost.
    fn read_from(&self, cursor: u64) -> (Vec<T>, u64, u64) {
        let oldest = self.oldest_id();
        let missed = oldest.saturating_sub(cursor);
        let start = cursor.max(oldest);
        let events = self
            .previous
            .iter()
            .chain(&self.current)
            .filter(|instance| instance.id >= start)
            .map(|instance| instance.event.clone())
            .collect();
        (events, self.next_id, missed)
    }

    fn pending_from(&self, cursor: u64) -> usize {
        let start = cursor.max(self.oldest_id());
        usize::try_from(self.next_id.saturating_sub(start)).unwrap_or(usize::MAX)
    }

    fn swap_generations(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }

    fn oldest_generation(&self) -> Option<u64> {
        self.previous
            .first()
            .or(self.current.first())
            .map(|instance| instance.generation)
    }

    /// Generations (cycles) of the buffered events, oldest first.
    #[cfg(test)]
    fn generations(&self) -> Vec<u64> {
        self.previous
            .iter()
            .chain(&self.current)
            .map(|instance| instance.generation)
            .collect()
    }
}

/// Type-erased handle on a locked queue, so the bus can rotate every queue
/// without knowing the event types.
trait AnyEventQueue: Send + Sync {
    fn name(&self) -> &'static str;
    fn swap_generations(&mut self);
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
}

struct LockedQueue<T> {
    name: &'static str,
    queue: RwLock<EventQueue<T>>,
}

impl<T: Event> AnyEventQueue for LockedQueue<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn swap_generations(&mut self) {
        self.queue.get_mut().swap_generations();
    }

    fn len(&self) -> usize {
        let queue = self.queue.read();
        queue.previous.len() + queue.current.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Per-type event queues plus every reader's cursors.
pub struct EventBus {
    queues: HashMap<EventTypeId, Box<dyn AnyEventQueue>>,
    cursors: DashMap<(ReaderId, EventTypeId), u64>,
    generation: u64,
}

impl EventBus {
    /// Create an empty bus at generation 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            cursors: DashMap::new(),
            generation: 0,
        }
    }

    /// Register the event type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the type key is already
    /// registered.
    pub fn register<T: Event>(&mut self) -> Result<EventTypeId, RegistryError> {
        let type_id = T::event_type_id();
        if let Some(existing) = self.queues.get(&type_id) {
            return Err(RegistryError::Duplicate {
                kind: "event",
                name: existing.name(),
            });
        }
        self.queues.insert(
            type_id,
            Box::new(LockedQueue {
                name: T::type_name(),
                queue: RwLock::new(EventQueue::<T>::new()),
            }),
        );
        Ok(type_id)
    }

    /// Returns `true` if the event type is registered.
    #[must_use]
    pub fn is_registered(&self, type_id: EventTypeId) -> bool {
        self.queues.contains_key(&type_id)
    }

    fn queue<T: Event>(&self) -> Result<&RwLock<EventQueue<T>>, EventError> {
        self.queues
            .get(&T::event_type_id())
            .and_then(|queue| queue.as_any().downcast_ref::<LockedQueue<T>>())
            .map(|locked| &locked.queue)
            .ok_or(EventError::Unregistered(T::type_name()))
    }

    /// Append an event to the current generation.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Unregistered`] if `T` was never registered.
    pub fn send<T: Event>(&self, event: T) -> Result<(), EventError> {
        let id = self.queue::<T>()?.write().send(event, self.generation);
        trace!(event = T::type_name(), id, generation = self.generation, "event sent");
        Ok(())
    }

    /// Read every event of type `T` the reader has not seen yet, oldest
    /// first, and advance the reader's cursor past them.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Unregistered`] if `T` was never registered.
    pub fn read<T: Event>(&self, reader: ReaderId) -> Result<Vec<T>, EventError> {
        let queue = self.queue::<T>()?.read();
        let mut cursor = self.cursors.entry((reader, T::event_type_id())).or_insert(0);
        let (events, next, missed) = queue.read_from(*cursor);
        if missed > 0 && *cursor > 0 {
            trace!(
                event = T::type_name(),
                %reader,
                missed,
                "reader fell behind; expired events dropped"
            );
        }
        *cursor = next;
        Ok(events)
    }

    /// Number of events of type `T` the reader would receive from
    /// [`EventBus::read`] right now.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Unregistered`] if `T` was never registered.
    pub fn pending<T: Event>(&self, reader: ReaderId) -> Result<usize, EventError> {
        let queue = self.queue::<T>()?.read();
        let cursor = self
            .cursors
            .get(&(reader, T::event_type_id()))
            .map_or(0, |cursor| *cursor);
        Ok(queue.pending_from(cursor))
    }

    /// The generation the oldest buffered event of type `T` was sent in.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Unregistered`] if `T` was never registered.
    pub fn oldest_generation<T: Event>(&self) -> Result<Option<u64>, EventError> {
        Ok(self.queue::<T>()?.read().oldest_generation())
    }

    /// Total events of all types still buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.queues.values().map(|queue| queue.len()).sum()
    }

    /// The generation (cycle number) new events are stamped with.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// End-of-cycle rotation: drop `previous`, demote `current`, advance the
    /// generation.
    pub fn update(&mut self) {
        for queue in self.queues.values_mut() {
            queue.swap_generations();
        }
        self.generation += 1;
    }

    /// Forget every cursor held by `reader`.
    pub fn remove_reader(&self, reader: ReaderId) {
        self.cursors.retain(|(owner, _), _| *owner != reader);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("types", &self.queues.len())
            .field("readers", &self.cursors.len())
            .field("generation", &self.generation)
            .finish()
    }
}
