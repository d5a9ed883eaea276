//! Worker pool — runs the systems of one batch concurrently.
//!
//! A batch is a fan-out/fan-in unit: [`WorkerPool::run_batch`] returns only
//! after every system of the batch has returned.

use rayon::prelude::*;

use engine_component::{EventBus, ResourceStore, World};
use engine_system::{SystemOutcome, SystemRunner};

/// A fixed-size pool of worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Build a pool with `threads` workers. `0` means one per logical CPU.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the threads could not be spawned.
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("engine-worker-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run every system of a batch and wait for all of them.
    ///
    /// Outcomes are returned in the order of `runners`.
    pub fn run_batch(
        &self,
        runners: Vec<&mut SystemRunner>,
        world: &World,
        resources: &ResourceStore,
        events: &EventBus,
        cycle: u64,
    ) -> Vec<SystemOutcome> {
        if runners.len() <= 1 {
            return runners
                .into_iter()
                .map(|runner| runner.run(world, resources, events, cycle))
                .collect();
        }
        self.pool.install(|| {
            runners
                .into_par_iter()
                .map(|runner| runner.run(world, resources, events, cycle))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use engine_system::{AccessSignature, SystemConfig, SystemContext};

    use super::*;

    #[test]
    fn test_fixed_thread_count() {
        let pool = WorkerPool::new(3).unwrap();
        assert_eq!(pool.threads(), 3);
    }

    #[test]
    fn test_batch_outcomes_keep_order_and_isolate_failures() {
        let pool = WorkerPool::new(2).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut runners: Vec<SystemRunner> = (0..4)
            .map(|i| {
                let calls = Arc::clone(&calls);
                SystemRunner::new(
                    SystemConfig::new(format!("s{i}"), AccessSignature::new()),
                    Box::new(move |_: &mut SystemContext<'_>| -> anyhow::Result<()> {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if i == 2 {
                            anyhow::bail!("boom");
                        }
                        Ok(())
                    }),
                )
            })
            .collect();

        let world = World::new();
        let resources = ResourceStore::new();
        let events = EventBus::new();
        let outcomes = pool.run_batch(runners.iter_mut().collect(), &world, &resources, &events, 1);

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let failed: Vec<String> = outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err())
            .map(|failure| failure.system.clone())
            .collect();
        assert_eq!(failed, vec!["s2".to_string()]);
    }
}
