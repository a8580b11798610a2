//! Fans blocks of work out to worker threads and waits until every block has been executed.
//!
//! All strategies give the same guarantee: each block is handed to exactly one worker, which
//! executes it exactly once, and [`Distributor::run()`] returns only after every worker has
//! exited. They differ only in the synchronization primitive used to hand out blocks.

mod channel;
mod cursor;
mod shared_list;
mod thread_per_block;

use std::fmt::{self, Display};
use std::num::NonZero;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use many_cpus::ProcessorSet;
use new_zealand::nz;
use tracing::debug;

use crate::worker_pool::JoinSummary;
use crate::{Block, Error, Result};

/// Queue capacity used by [`Strategy::Channel`] unless another is requested.
pub const DEFAULT_CHANNEL_CAPACITY: NonZero<usize> = nz!(100);

/// Synchronization discipline used to hand blocks to workers.
///
/// Swapping strategies never changes the product, only how work is scheduled.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Strategy {
    /// The calling thread pushes every block into a bounded queue and closes it. Workers pop
    /// until the queue is closed and empty; the last worker to exit signals completion.
    Channel {
        /// Number of blocks the queue holds before the calling thread blocks.
        capacity: NonZero<usize>,
    },

    /// Workers take a permit from a counting semaphore before popping a block index from a
    /// shared list.
    Semaphore,

    /// Workers fetch and increment a shared cursor into the block list.
    Cursor,

    /// One short-lived thread per block, all joined at the end. The worker count is ignored.
    ThreadPerBlock,
}

impl Strategy {
    /// [`Strategy::Channel`] with the default queue capacity.
    #[must_use]
    pub const fn channel() -> Self {
        Self::Channel {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Every strategy, in the order a benchmark sweep runs them.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [
            Self::channel(),
            Self::Semaphore,
            Self::Cursor,
            Self::ThreadPerBlock,
        ]
    }

    /// Short name used in logs, reports and on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Channel { .. } => "channel",
            Self::Semaphore => "semaphore",
            Self::Cursor => "cursor",
            Self::ThreadPerBlock => "thread-per-block",
        }
    }
}

impl Display for Strategy {
    #[cfg_attr(test, mutants::skip)] // Trivial delegation to name().
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = String;

    /// Parses a strategy name. The channel strategy accepts an optional queue capacity as
    /// `channel:<capacity>`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(capacity) = s.strip_prefix("channel:") {
            let capacity = capacity
                .parse::<NonZero<usize>>()
                .map_err(|e| format!("invalid channel capacity '{capacity}': {e}"))?;

            return Ok(Self::Channel { capacity });
        }

        match s {
            "channel" => Ok(Self::channel()),
            "semaphore" => Ok(Self::Semaphore),
            "cursor" => Ok(Self::Cursor),
            "thread-per-block" => Ok(Self::ThreadPerBlock),
            _ => Err(format!(
                "unknown strategy '{s}', expected one of: channel, channel:<capacity>, \
                 semaphore, cursor, thread-per-block"
            )),
        }
    }
}

/// What happened during one [`Distributor::run()`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DistributionReport {
    workers: usize,
    blocks_executed: usize,
}

impl DistributionReport {
    /// Number of worker threads that took part in the run.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of blocks whose execution returned normally.
    #[must_use]
    pub fn blocks_executed(&self) -> usize {
        self.blocks_executed
    }
}

/// Implemented by each strategy: execute every block of `blocks` with `executor` on at most
/// `workers` worker threads and return once all of them have been joined.
trait DistributionStrategy {
    fn distribute<F>(
        &self,
        blocks: &[Block],
        workers: NonZero<usize>,
        executor: &F,
    ) -> Result<JoinSummary>
    where
        F: Fn(&Block) + Sync;
}

/// Executes a list of blocks on a pool of worker threads using one [`Strategy`].
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use block_matmul::{Distributor, Strategy, partition};
/// use new_zealand::nz;
///
/// let blocks = partition(8, 2).unwrap();
/// let executed = AtomicUsize::new(0);
///
/// let report = Distributor::new(Strategy::Semaphore, nz!(4))
///     .run(&blocks, |_block| {
///         executed.fetch_add(1, Ordering::Relaxed);
///     })
///     .unwrap();
///
/// assert_eq!(report.blocks_executed(), 16);
/// assert_eq!(executed.into_inner(), 16);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Distributor {
    strategy: Strategy,
    workers: NonZero<usize>,
}

impl Distributor {
    /// Creates a distributor that runs `workers` concurrent workers.
    #[must_use]
    pub fn new(strategy: Strategy, workers: NonZero<usize>) -> Self {
        Self { strategy, workers }
    }

    /// Creates a distributor with one worker per processor available to the current process.
    #[must_use]
    pub fn with_hardware_workers(strategy: Strategy) -> Self {
        Self::new(strategy, hardware_concurrency())
    }

    /// The strategy used to hand out blocks.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The requested worker count. A run may use fewer workers if there are fewer blocks.
    #[must_use]
    pub fn workers(&self) -> NonZero<usize> {
        self.workers
    }

    /// Executes every block with `executor`, blocking until all of them are done and every
    /// worker has exited.
    ///
    /// The worker count is clamped to the number of blocks, except for
    /// [`Strategy::ThreadPerBlock`] which always uses one worker per block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerSpawn`] if a worker thread cannot be started. Workers that were
    /// already running finish their blocks before the error is returned.
    ///
    /// Returns [`Error::WorkerPanicked`] if `executor` panicked on any worker. The remaining
    /// workers keep executing blocks, so every block except those being executed by a
    /// panicking worker is still executed exactly once.
    pub fn run<F>(&self, blocks: &[Block], executor: F) -> Result<DistributionReport>
    where
        F: Fn(&Block) + Sync,
    {
        let Some(block_count) = NonZero::new(blocks.len()) else {
            debug!(strategy = %self.strategy, "no blocks to distribute");
            return Ok(DistributionReport::default());
        };

        let workers = self.workers.min(block_count);

        if workers < self.workers && !matches!(self.strategy, Strategy::ThreadPerBlock) {
            debug!(
                requested = self.workers.get(),
                clamped = workers.get(),
                "more workers requested than there are blocks"
            );
        }

        debug!(
            strategy = %self.strategy,
            workers = workers.get(),
            blocks = blocks.len(),
            "distributing blocks"
        );

        let executed = AtomicUsize::new(0);
        let counting_executor = |block: &Block| {
            executor(block);
            executed.fetch_add(1, Ordering::Relaxed);
        };

        let summary = match self.strategy {
            Strategy::Channel { capacity } => channel::BoundedQueue { capacity }
                .distribute(blocks, workers, &counting_executor),
            Strategy::Semaphore => {
                shared_list::PermitGatedList.distribute(blocks, workers, &counting_executor)
            }
            Strategy::Cursor => {
                cursor::FetchIncrement.distribute(blocks, workers, &counting_executor)
            }
            Strategy::ThreadPerBlock => thread_per_block::SpawnEach
                .distribute(blocks, workers, &counting_executor),
        }?;

        if summary.panicked > 0 {
            return Err(Error::WorkerPanicked {
                panicked: summary.panicked,
                workers: summary.joined,
            });
        }

        let report = DistributionReport {
            workers: summary.joined,
            blocks_executed: executed.into_inner(),
        };

        debug!(
            strategy = %self.strategy,
            workers = report.workers,
            blocks_executed = report.blocks_executed,
            "distribution complete"
        );

        Ok(report)
    }
}

/// Number of processors available to the current process.
#[must_use]
pub fn hardware_concurrency() -> NonZero<usize> {
    NonZero::new(ProcessorSet::default().len())
        .expect("the current process always has at least one processor available")
}
