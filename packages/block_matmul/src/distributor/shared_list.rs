use std::num::NonZero;
use std::thread;

use parking_lot::Mutex;
use tracing::trace;

use super::DistributionStrategy;
use crate::semaphore::Semaphore;
use crate::worker_pool::{JoinSummary, ScopedWorkers};
use crate::{Block, Result};

/// Workers take a semaphore permit, then pop a block index from a shared list.
///
/// The semaphore starts with one permit per block. Whoever pops the last index returns one
/// extra permit; a worker that holds a permit but finds the list empty passes that permit on
/// and exits, so every idle worker eventually wakes up and leaves.
pub(super) struct PermitGatedList;

impl DistributionStrategy for PermitGatedList {
    fn distribute<F>(
        &self,
        blocks: &[Block],
        workers: NonZero<usize>,
        executor: &F,
    ) -> Result<JoinSummary>
    where
        F: Fn(&Block) + Sync,
    {
        let permits = Semaphore::new(blocks.len());

        // Indices are popped from the back, so the list is reversed to hand blocks out in
        // partition order.
        let pending = Mutex::new((0..blocks.len()).rev().collect::<Vec<_>>());

        let permits = &permits;
        let pending = &pending;

        thread::scope(|scope| {
            let mut pool = ScopedWorkers::new(scope, "block-matmul-semaphore", workers.get());

            for _ in 0..workers.get() {
                pool.spawn(move |worker| {
                    while let Some(index) = take_next(permits, pending) {
                        let block = blocks
                            .get(index)
                            .expect("the pending list only holds indices of existing blocks");

                        trace!(worker, block = index, "executing block");
                        executor(block);
                    }
                })?;
            }

            Ok(pool.join())
        })
    }
}

fn take_next(permits: &Semaphore, pending: &Mutex<Vec<usize>>) -> Option<usize> {
    permits.acquire();

    let mut pending = pending.lock();
    let next = pending.pop();

    // Both the "just took the last block" and "found nothing" paths pass a permit on, which
    // is what keeps the shutdown chain going.
    if pending.is_empty() {
        permits.release();
    }

    next
}
