//! # engine_component
//!
//! The data half of the ECS: what a component is, how entities and their
//! components are stored, and the shared state systems communicate through.
//!
//! This crate provides:
//!
//! - [`Component`] trait and [`ComponentRegistry`] — the contract all ECS
//!   data must satisfy, and the record of every storable type.
//! - [`Entity`] — generational `(index, generation)` identifiers.
//! - [`World`] — archetype-based columnar entity storage.
//! - [`QueryDescriptor`] and [`Query`] — declarative data access and its
//!   iteration.
//! - [`ResourceStore`] — singleton state keyed by type.
//! - [`EventBus`] — double-buffered typed events with per-reader cursors.
//! - [`CommandBuffer`] — structural mutations deferred to stage boundaries.

pub mod archetype;
pub mod command;
pub mod component;
pub mod entity;
pub mod error;
pub mod event;
pub mod query;
pub mod resource;
pub mod world;

pub use archetype::{ArchetypeId, ArchetypeTable, Column};
pub use command::{Command, CommandBuffer};
pub use component::{Component, ComponentInfo, ComponentRegistry, ComponentTypeId, ComponentValue};
pub use entity::{Entity, EntityAllocator};
pub use error::{
    CommandError, CommandFailure, EventError, QueryError, RegistryError, ResourceError, WorldError,
};
pub use event::{Event, EventBus, EventTypeId, ReaderId};
pub use query::{ArchetypeFilter, Query, QueryDescriptor, QueryFilter, Row};
pub use resource::{Res, ResMut, Resource, ResourceStore, ResourceTypeId, ResourceValue};
pub use world::{ComponentMut, ComponentRef, EntityLocation, World};
