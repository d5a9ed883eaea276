//! # engine_app
//!
//! The execution half of the ECS: the stage graph, the batch scheduler, the
//! worker pool and the [`Runtime`] that ties them to the stores.
//!
//! ## Cycle
//!
//! 1. Rebuild the schedule if systems or stages changed.
//! 2. Run each stage's batches in order, the systems of a batch in parallel.
//! 3. Apply the stage's command buffers at the stage boundary.
//! 4. Rotate event buffers.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engine_app::{Runtime, RuntimeConfig};
//! use engine_system::{AccessSignature, SystemConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut runtime = Runtime::new(RuntimeConfig::default())?;
//! runtime.add_system(SystemConfig::new("noop", AccessSignature::new()), |_| Ok(()))?;
//! let report = runtime.run_cycle()?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod stage;
pub mod worker;

pub use config::RuntimeConfig;
pub use error::{ConfigError, RuntimeError};
pub use registry::SystemRegistry;
pub use runtime::{CycleReport, Runtime};
pub use scheduler::{Batch, Schedule, StageSchedule};
pub use stage::{DEFAULT_STAGES, StageGraph, StagePosition};
pub use worker::WorkerPool;
