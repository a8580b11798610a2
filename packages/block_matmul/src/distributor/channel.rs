use std::num::NonZero;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam::channel;
use parking_lot::Mutex;
use tracing::{trace, warn};

use super::DistributionStrategy;
use crate::worker_pool::{JoinSummary, ScopedWorkers};
use crate::{Block, Result};

/// Blocks flow through a bounded queue filled by the calling thread.
pub(super) struct BoundedQueue {
    pub(super) capacity: NonZero<usize>,
}

impl DistributionStrategy for BoundedQueue {
    fn distribute<F>(
        &self,
        blocks: &[Block],
        workers: NonZero<usize>,
        executor: &F,
    ) -> Result<JoinSummary>
    where
        F: Fn(&Block) + Sync,
    {
        let (block_tx, block_rx) = channel::bounded::<&Block>(self.capacity.get());
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let completion = Completion::new(workers.get(), done_tx);
        let completion = &completion;

        thread::scope(|scope| {
            let mut pool = ScopedWorkers::new(scope, "block-matmul-channel", workers.get());

            for _ in 0..workers.get() {
                let block_rx = block_rx.clone();

                let spawned = pool.spawn(move |worker| {
                    let _exit = completion.exit_guard();

                    for block in block_rx {
                        trace!(worker, block = block.index(), "executing block");
                        executor(block);
                    }
                });

                if let Err(e) = spawned {
                    // Closing the queue lets the workers that did start run dry and exit,
                    // so dropping the pool can join them.
                    drop(block_tx);
                    return Err(e);
                }
            }

            // Only the workers hold receivers now, so a send fails once all of them are gone.
            drop(block_rx);

            for block in blocks {
                if block_tx.send(block).is_err() {
                    warn!(
                        block = block.index(),
                        "every worker exited before all blocks were queued"
                    );
                    break;
                }
            }

            // Disconnecting the queue is the end-of-work marker.
            drop(block_tx);

            // An error means every worker exited without signaling, which only happens if the
            // completion sender was lost. Either way there is nothing left to wait for.
            _ = done_rx.recv();

            Ok(pool.join())
        })
    }
}

/// Tracks the workers that have not exited yet. The last one to exit signals the calling
/// thread.
struct Completion {
    active: AtomicUsize,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Completion {
    fn new(workers: usize, done_tx: oneshot::Sender<()>) -> Self {
        Self {
            active: AtomicUsize::new(workers),
            done_tx: Mutex::new(Some(done_tx)),
        }
    }

    fn exit_guard(&self) -> ExitGuard<'_> {
        ExitGuard { completion: self }
    }

    fn worker_exited(&self) {
        let previously_active = self.active.fetch_sub(1, Ordering::AcqRel);
        trace!(remaining = previously_active.saturating_sub(1), "channel worker exited");

        if previously_active != 1 {
            return;
        }

        if let Some(done_tx) = self.done_tx.lock().take() {
            // The receiver is only gone if the calling thread already stopped waiting.
            _ = done_tx.send(());
        }
    }
}

/// Marks the owning worker as exited when dropped, including while the worker unwinds.
struct ExitGuard<'a> {
    completion: &'a Completion,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.completion.worker_exited();
    }
}
