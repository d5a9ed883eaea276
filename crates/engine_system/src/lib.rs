//! # engine_system
//!
//! The behavior half of the ECS: what a system is and what it may touch.
//!
//! A system is an explicit descriptor rather than a bare function. The
//! [`SystemConfig`] carries its name, its declared [`AccessSignature`], the
//! stage it runs in and its ordering constraints; the scheduler works from
//! the config alone and never has to run a system to learn what it does.
//! At run time the system receives a [`SystemContext`] that hands out exactly
//! the declared data.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engine_component::{Component, QueryDescriptor};
//! use engine_system::{AccessSignature, SystemConfig, SystemContext};
//!
//! struct Position(f32);
//! impl Component for Position {
//!     fn type_name() -> &'static str { "Position" }
//! }
//!
//! let config = SystemConfig::new(
//!     "drift",
//!     AccessSignature::new().writes::<Position>(),
//! );
//!
//! let system = |ctx: &mut SystemContext<'_>| -> anyhow::Result<()> {
//!     ctx.query(QueryDescriptor::new().write(Position::component_type_id()))?
//!         .for_each(|mut row| {
//!             if let Some(p) = row.get_mut::<Position>() {
//!                 p.0 += 1.0;
//!             }
//!         })?;
//!     Ok(())
//! };
//! # let _ = (config, system);
//! ```

pub mod access;
pub mod config;
pub mod context;
pub mod error;
pub mod runner;
pub mod system;

pub use access::{AccessMode, AccessSignature};
pub use config::{DEFAULT_STAGE, SystemConfig};
pub use context::{ContextStores, RunInfo, SystemContext};
pub use error::{AccessError, SystemFailure};
pub use runner::{SystemOutcome, SystemRunner};
pub use system::System;
