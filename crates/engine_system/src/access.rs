//! Declared data access of a system.
//!
//! An [`AccessSignature`] is everything the scheduler knows about a system's
//! data use: the queries it runs, the resources it reads or writes and the
//! events it sends or receives. The scheduler never runs a system to find
//! out; it only compares signatures.

use std::fmt;

use serde::{Deserialize, Serialize};

use engine_component::{
    Component, ComponentTypeId, Event, EventTypeId, QueryDescriptor, Resource, ResourceTypeId,
};

/// How a system touches a piece of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// Shared access.
    Read,
    /// Exclusive access.
    Write,
    /// Event production.
    Send,
    /// Event consumption.
    Receive,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::Send => "send",
            AccessMode::Receive => "receive",
        };
        f.write_str(mode)
    }
}

/// The declared reads and writes of one system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSignature {
    /// Component queries the system runs.
    pub queries: Vec<QueryDescriptor>,
    /// Resource types read.
    pub resource_reads: Vec<ResourceTypeId>,
    /// Resource types written.
    pub resource_writes: Vec<ResourceTypeId>,
    /// Event types sent.
    pub event_sends: Vec<EventTypeId>,
    /// Event types received.
    pub event_receives: Vec<EventTypeId>,
}

impl AccessSignature {
    /// An empty signature: the system touches nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a query.
    #[must_use]
    pub fn query(mut self, descriptor: QueryDescriptor) -> Self {
        self.queries.push(descriptor);
        self
    }

    /// Declare shared access to the component `T` outside of a query.
    #[must_use]
    pub fn reads<T: Component>(self) -> Self {
        self.query(QueryDescriptor::new().read(T::component_type_id()))
    }

    /// Declare exclusive access to the component `T` outside of a query.
    #[must_use]
    pub fn writes<T: Component>(self) -> Self {
        self.query(QueryDescriptor::new().write(T::component_type_id()))
    }

    /// Declare shared access to the resource `T`.
    #[must_use]
    pub fn reads_resource<T: Resource>(mut self) -> Self {
        self.resource_reads.push(T::resource_type_id());
        self
    }

    /// Declare exclusive access to the resource `T`.
    #[must_use]
    pub fn writes_resource<T: Resource>(mut self) -> Self {
        self.resource_writes.push(T::resource_type_id());
        self
    }

    /// Declare that the system sends `T` events.
    #[must_use]
    pub fn sends<T: Event>(mut self) -> Self {
        self.event_sends.push(T::event_type_id());
        self
    }

    /// Declare that the system receives `T` events.
    #[must_use]
    pub fn receives<T: Event>(mut self) -> Self {
        self.event_receives.push(T::event_type_id());
        self
    }

    /// Returns `true` if some declared query writes `type_id`.
    #[must_use]
    pub fn writes_component(&self, type_id: ComponentTypeId) -> bool {
        self.queries.iter().any(|q| q.writes.contains(&type_id))
    }

    /// Returns `true` if some declared query reads or writes `type_id`.
    #[must_use]
    pub fn reads_component(&self, type_id: ComponentTypeId) -> bool {
        self.queries
            .iter()
            .any(|q| q.all_accessed_types().contains(&type_id))
    }

    /// Returns `true` if the resource is declared for writing.
    #[must_use]
    pub fn writes_resource_type(&self, type_id: ResourceTypeId) -> bool {
        self.resource_writes.contains(&type_id)
    }

    /// Returns `true` if the resource is declared for reading or writing.
    #[must_use]
    pub fn reads_resource_type(&self, type_id: ResourceTypeId) -> bool {
        self.resource_reads.contains(&type_id) || self.writes_resource_type(type_id)
    }

    /// Returns `true` if the system may send events of the type.
    #[must_use]
    pub fn sends_event(&self, type_id: EventTypeId) -> bool {
        self.event_sends.contains(&type_id)
    }

    /// Returns `true` if the system may receive events of the type.
    #[must_use]
    pub fn receives_event(&self, type_id: EventTypeId) -> bool {
        self.event_receives.contains(&type_id)
    }

    /// The first component access in `descriptor` the signature does not
    /// cover. Written types must be declared as writes; read, optional and
    /// `Changed` types may be declared as either.
    #[must_use]
    pub fn undeclared(&self, descriptor: &QueryDescriptor) -> Option<(ComponentTypeId, AccessMode)> {
        if let Some(&ty) = descriptor
            .writes
            .iter()
            .find(|&&ty| !self.writes_component(ty))
        {
            return Some((ty, AccessMode::Write));
        }
        descriptor
            .all_accessed_types()
            .into_iter()
            .find(|&ty| !self.reads_component(ty))
            .map(|ty| (ty, AccessMode::Read))
    }

    /// Checks whether two systems may not share a batch.
    ///
    /// They conflict when one writes a component or resource type the other
    /// reads or writes. Events never conflict: queues are internally
    /// synchronized, and ordering between a sender and a receiver is
    /// expressed with explicit constraints.
    #[must_use]
    pub fn conflicts_with(&self, other: &AccessSignature) -> bool {
        let components = self
            .queries
            .iter()
            .any(|ours| other.queries.iter().any(|theirs| ours.conflicts_with(theirs)));

        let resources = self
            .resource_writes
            .iter()
            .any(|&ty| other.reads_resource_type(ty))
            || other
                .resource_writes
                .iter()
                .any(|&ty| self.reads_resource_type(ty));

        components || resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSFORM: ComponentTypeId = ComponentTypeId(1);
    const VELOCITY: ComponentTypeId = ComponentTypeId(2);

    struct Gravity;

    impl Resource for Gravity {
        fn type_name() -> &'static str {
            "Gravity"
        }
    }

    #[derive(Clone)]
    struct Collision;

    impl Event for Collision {
        fn type_name() -> &'static str {
            "Collision"
        }
    }

    #[test]
    fn test_signature_conflicts() {
        let physics =
            AccessSignature::new().query(QueryDescriptor::new().read(TRANSFORM).write(VELOCITY));
        let render = AccessSignature::new().query(QueryDescriptor::new().read(TRANSFORM));
        let movement = AccessSignature::new().query(QueryDescriptor::new().read(VELOCITY));

        assert!(!physics.conflicts_with(&AccessSignature::new()));
        assert!(!physics.conflicts_with(&render));
        assert!(physics.conflicts_with(&movement));
        assert!(movement.conflicts_with(&physics));
        assert!(!render.conflicts_with(&movement));
    }

    #[test]
    fn test_resource_write_conflicts_with_read() {
        let reader = AccessSignature::new().reads_resource::<Gravity>();
        let writer = AccessSignature::new().writes_resource::<Gravity>();
        assert!(!reader.conflicts_with(&reader.clone()));
        assert!(reader.conflicts_with(&writer));
        assert!(writer.conflicts_with(&reader));
        assert!(writer.conflicts_with(&writer.clone()));
    }

    #[test]
    fn test_events_do_not_conflict() {
        let sender = AccessSignature::new().sends::<Collision>();
        let receiver = AccessSignature::new().receives::<Collision>();
        assert!(!sender.conflicts_with(&receiver));
        assert!(sender.sends_event(Collision::event_type_id()));
        assert!(!sender.receives_event(Collision::event_type_id()));
    }

    #[test]
    fn test_undeclared_write_is_reported() {
        let signature = AccessSignature::new().query(QueryDescriptor::new().read(VELOCITY));
        assert_eq!(
            signature.undeclared(&QueryDescriptor::new().write(VELOCITY)),
            Some((VELOCITY, AccessMode::Write))
        );
        assert_eq!(signature.undeclared(&QueryDescriptor::new().read(VELOCITY)), None);
    }

    #[test]
    fn test_write_declaration_covers_reads() {
        let signature = AccessSignature::new().query(QueryDescriptor::new().write(VELOCITY));
        assert_eq!(signature.undeclared(&QueryDescriptor::new().read(VELOCITY)), None);
        assert_eq!(
            signature.undeclared(&QueryDescriptor::new().read(TRANSFORM)),
            Some((TRANSFORM, AccessMode::Read))
        );
    }

    #[test]
    fn test_filters_need_no_declaration() {
        let signature = AccessSignature::new().query(QueryDescriptor::new().read(VELOCITY));
        let descriptor = QueryDescriptor::new().read(VELOCITY).without(TRANSFORM);
        assert_eq!(signature.undeclared(&descriptor), None);
    }
}
