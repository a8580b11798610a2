use std::num::NonZero;
use std::thread;

use parking_lot::Mutex;
use tracing::trace;

use super::DistributionStrategy;
use crate::worker_pool::{JoinSummary, ScopedWorkers};
use crate::{Block, Result};

/// Workers claim blocks by fetching and incrementing a shared cursor. A cursor value past the
/// end of the block list means there is no more work.
pub(super) struct FetchIncrement;

impl DistributionStrategy for FetchIncrement {
    fn distribute<F>(
        &self,
        blocks: &[Block],
        workers: NonZero<usize>,
        executor: &F,
    ) -> Result<JoinSummary>
    where
        F: Fn(&Block) + Sync,
    {
        let cursor = Mutex::new(0_usize);
        let cursor = &cursor;

        thread::scope(|scope| {
            let mut pool = ScopedWorkers::new(scope, "block-matmul-cursor", workers.get());

            for _ in 0..workers.get() {
                pool.spawn(move |worker| {
                    while let Some(block) = blocks.get(claim_next(cursor)) {
                        trace!(worker, block = block.index(), "executing block");
                        executor(block);
                    }
                })?;
            }

            Ok(pool.join())
        })
    }
}

fn claim_next(cursor: &Mutex<usize>) -> usize {
    let mut cursor = cursor.lock();
    let claimed = *cursor;
    *cursor = claimed.saturating_add(1);
    claimed
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use testing::ExecutionLedger;

    use super::*;
    use crate::partition;

    #[test]
    fn claims_are_sequential() {
        let cursor = Mutex::new(0);

        assert_eq!(claim_next(&cursor), 0);
        assert_eq!(claim_next(&cursor), 1);
        assert_eq!(claim_next(&cursor), 2);
        assert_eq!(*cursor.lock(), 3);
    }

    #[test]
    fn cursor_never_wraps() {
        let cursor = Mutex::new(usize::MAX);

        assert_eq!(claim_next(&cursor), usize::MAX);
        assert_eq!(claim_next(&cursor), usize::MAX);
    }

    #[test]
    fn executes_every_block_once() {
        testing::with_watchdog(|| {
            let blocks = partition(10, 3).unwrap();
            let ledger = ExecutionLedger::new(blocks.len());

            let summary = FetchIncrement
                .distribute(&blocks, nz!(4), &|block: &Block| ledger.record(block.index()))
                .unwrap();

            assert_eq!(summary.joined, 4);
            ledger.assert_each_executed_once();
        });
    }
}
