//! Worker threads scoped to a single distribution run.

use std::num::NonZero;
use std::thread::{self, Scope, ScopedJoinHandle};

use tracing::{debug, trace, warn};

use crate::{Error, Result};

/// Outcome of joining the workers of a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct JoinSummary {
    /// Number of workers joined, including those that panicked.
    pub(crate) joined: usize,

    /// Number of workers whose entry point panicked.
    pub(crate) panicked: usize,
}

impl JoinSummary {
    fn record(&mut self, panicked: bool) {
        self.joined = self.joined.saturating_add(1);

        if panicked {
            self.panicked = self.panicked.saturating_add(1);
        }
    }
}

/// Named worker threads spawned into a [`thread::scope()`].
///
/// Workers may borrow anything that outlives the scope. Every worker is joined before the
/// scope ends: explicitly via [`join()`][Self::join] on the success path, or by `Drop` when an
/// error returns early. Joining here instead of leaving it to the scope keeps a panicking
/// worker from turning into a panic of the distributing thread.
pub(crate) struct ScopedWorkers<'scope, 'env> {
    scope: &'scope Scope<'scope, 'env>,
    name_prefix: &'static str,
    handles: Vec<ScopedJoinHandle<'scope, ()>>,
}

impl<'scope, 'env> ScopedWorkers<'scope, 'env> {
    pub(crate) fn new(
        scope: &'scope Scope<'scope, 'env>,
        name_prefix: &'static str,
        capacity: usize,
    ) -> Self {
        Self {
            scope,
            name_prefix,
            handles: Vec::with_capacity(capacity),
        }
    }

    /// Starts one worker. The worker receives its index in spawn order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerSpawn`] if the operating system refuses to create the thread.
    /// Workers spawned earlier keep running and are joined when `self` is dropped.
    pub(crate) fn spawn<F>(&mut self, entrypoint: F) -> Result<()>
    where
        F: FnOnce(usize) + Send + 'scope,
    {
        let worker = self.handles.len();

        let handle = thread::Builder::new()
            .name(format!("{}-{worker}", self.name_prefix))
            .spawn_scoped(self.scope, move || {
                debug!(worker, "worker started");
                entrypoint(worker);
                debug!(worker, "worker exiting");
            })
            .map_err(|source| Error::WorkerSpawn { worker, source })?;

        self.handles.push(handle);
        Ok(())
    }

    /// Waits for every worker to exit.
    pub(crate) fn join(self) -> JoinSummary {
        self.join_batched(NonZero::<usize>::MAX)
    }

    /// Waits for every worker to exit, joining at most `batch_size` handles per round.
    pub(crate) fn join_batched(mut self, batch_size: NonZero<usize>) -> JoinSummary {
        let mut summary = JoinSummary::default();

        while !self.handles.is_empty() {
            let batch_len = batch_size.get().min(self.handles.len());

            for handle in self.handles.drain(..batch_len) {
                summary.record(handle.join().is_err());
            }

            trace!(
                joined = summary.joined,
                remaining = self.handles.len(),
                "joined batch of workers"
            );
        }

        if summary.panicked > 0 {
            debug!(
                panicked = summary.panicked,
                joined = summary.joined,
                "some workers panicked"
            );
        }

        summary
    }
}

impl Drop for ScopedWorkers<'_, '_> {
    #[cfg_attr(test, mutants::skip)] // Impractical to observe; the scope would join anyway.
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("worker panicked during an aborted run");
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use new_zealand::nz;

    use super::*;

    #[test]
    fn join_reports_every_worker() {
        testing::with_watchdog(|| {
            let counter = AtomicUsize::new(0);

            let summary = thread::scope(|scope| {
                let mut workers = ScopedWorkers::new(scope, "test-worker", 5);

                for _ in 0..5 {
                    workers
                        .spawn(|_| {
                            counter.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }

                workers.join_batched(nz!(2))
            });

            assert_eq!(counter.load(Ordering::SeqCst), 5);
            assert_eq!(
                summary,
                JoinSummary {
                    joined: 5,
                    panicked: 0
                }
            );
        });
    }

    #[test]
    fn workers_receive_spawn_order_indices() {
        testing::with_watchdog(|| {
            let seen = parking_lot::Mutex::new(Vec::new());

            thread::scope(|scope| {
                let mut workers = ScopedWorkers::new(scope, "test-worker", 3);

                for _ in 0..3 {
                    workers.spawn(|worker| seen.lock().push(worker)).unwrap();
                }

                workers.join()
            });

            let mut seen = seen.into_inner();
            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1, 2]);
        });
    }

    #[test]
    fn panicking_worker_is_counted_not_propagated() {
        testing::with_watchdog(|| {
            let summary = thread::scope(|scope| {
                let mut workers = ScopedWorkers::new(scope, "test-worker", 2);

                workers.spawn(|_| panic!("deliberate test panic")).unwrap();
                workers.spawn(|_| {}).unwrap();

                workers.join()
            });

            assert_eq!(summary.joined, 2);
            assert_eq!(summary.panicked, 1);
        });
    }

    #[test]
    fn dropped_pool_joins_its_workers() {
        testing::with_watchdog(|| {
            let counter = AtomicUsize::new(0);

            thread::scope(|scope| {
                let mut workers = ScopedWorkers::new(scope, "test-worker", 1);

                workers
                    .spawn(|_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();

                drop(workers);

                // The worker has been joined by the drop, so its effect is visible here.
                assert_eq!(counter.load(Ordering::SeqCst), 1);
            });
        });
    }
}
