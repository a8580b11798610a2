use std::num::NonZero;
use std::thread;

use new_zealand::nz;
use tracing::trace;

use super::DistributionStrategy;
use crate::worker_pool::{JoinSummary, ScopedWorkers};
use crate::{Block, Result};

/// Number of thread handles joined per round.
pub(super) const JOIN_BATCH: NonZero<usize> = nz!(64);

/// Every block gets its own thread. All threads are started before any is joined.
pub(super) struct SpawnEach;

impl DistributionStrategy for SpawnEach {
    fn distribute<F>(
        &self,
        blocks: &[Block],
        _workers: NonZero<usize>,
        executor: &F,
    ) -> Result<JoinSummary>
    where
        F: Fn(&Block) + Sync,
    {
        thread::scope(|scope| {
            let mut pool = ScopedWorkers::new(scope, "block-matmul-block", blocks.len());

            for block in blocks {
                pool.spawn(move |worker| {
                    trace!(worker, block = block.index(), "executing block");
                    executor(block);
                })?;
            }

            trace!(threads = blocks.len(), "every block thread started");

            Ok(pool.join_batched(JOIN_BATCH))
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use testing::ExecutionLedger;

    use super::*;
    use crate::partition;

    #[test]
    fn more_blocks_than_one_join_batch() {
        testing::with_watchdog(|| {
            // 10x10 single-cell blocks: 100 threads, joined in two batches.
            let blocks = partition(10, 1).unwrap();
            let ledger = ExecutionLedger::new(blocks.len());

            let summary = SpawnEach
                .distribute(&blocks, nz!(1), &|block: &Block| ledger.record(block.index()))
                .unwrap();

            assert_eq!(summary.joined, 100);
            ledger.assert_each_executed_once();
        });
    }
}
