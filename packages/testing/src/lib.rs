#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing the block multiplication packages.

use std::env;
use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// How long a test may run under [`with_watchdog()`] before it is considered hung.
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(30);

/// Under Miri, thread synchronization is dramatically slower.
const MIRI_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs a test with a timeout so that a deadlocked distribution fails the test instead of
/// hanging the test run.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled
/// and the test function is executed directly. This allows mutation testing to detect hanging
/// mutations through its own timeout.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode). A panic inside
/// the test is propagated unchanged.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let timeout = if cfg!(miri) {
        MIRI_WATCHDOG_TIMEOUT
    } else {
        WATCHDOG_TIMEOUT
    };

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the watchdog has already given up on us.
        drop(tx.send(result));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("test thread should not panic after sending its result");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded the {}-second watchdog timeout", timeout.as_secs());
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread disconnected without a result"),
            Err(e) => panic::resume_unwind(e),
        },
    }
}

/// Counts how many times each item of a numbered set of work items was executed.
///
/// Safe to record into from any number of threads at once.
///
/// # Example
///
/// ```rust
/// use testing::ExecutionLedger;
///
/// let ledger = ExecutionLedger::new(3);
/// ledger.record(0);
/// ledger.record(1);
/// ledger.record(2);
///
/// ledger.assert_each_executed_once();
/// ```
#[derive(Debug)]
pub struct ExecutionLedger {
    counts: Vec<AtomicUsize>,
}

impl ExecutionLedger {
    /// Creates a ledger for items numbered `0..len`.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            counts: (0..len).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Records one execution of item `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the ledger.
    pub fn record(&self, index: usize) {
        self.counts
            .get(index)
            .unwrap_or_else(|| panic!("item {index} is outside a ledger of {}", self.counts.len()))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Execution count of every item, in item order.
    #[must_use]
    pub fn counts(&self) -> Vec<usize> {
        self.counts
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect()
    }

    /// Total number of recorded executions.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts().iter().sum()
    }

    /// # Panics
    ///
    /// Panics, naming the first offending item, unless every item was executed exactly once.
    pub fn assert_each_executed_once(&self) {
        for (index, count) in self.counts().into_iter().enumerate() {
            assert_eq!(count, 1, "item {index} was executed {count} times");
        }
    }
}

/// Rows of a 4x4 matrix holding the values 1 to 16 in row-major order.
#[must_use]
pub fn sample_4x4_rows() -> Vec<Vec<i64>> {
    vec![
        vec![1, 2, 3, 4],
        vec![5, 6, 7, 8],
        vec![9, 10, 11, 12],
        vec![13, 14, 15, 16],
    ]
}

/// Rows of an identity matrix of the given dimension.
#[must_use]
pub fn identity_rows(dimension: usize) -> Vec<Vec<i64>> {
    (0..dimension)
        .map(|row| {
            (0..dimension)
                .map(|col| i64::from(row == col))
                .collect()
        })
        .collect()
}

/// A pair of 2x2 matrices whose product is `[[19, 22], [43, 50]]`.
#[must_use]
pub fn pair_2x2() -> (Vec<Vec<i64>>, Vec<Vec<i64>>) {
    (vec![vec![1, 2], vec![3, 4]], vec![vec![5, 6], vec![7, 8]])
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn watchdog_returns_result() {
        assert_eq!(with_watchdog(|| "hello world"), "hello world");
    }

    #[test]
    #[should_panic(expected = "deliberate")]
    fn watchdog_propagates_panics() {
        with_watchdog(|| panic!("deliberate test panic"));
    }

    #[test]
    fn ledger_counts_concurrent_records() {
        let ledger = Arc::new(ExecutionLedger::new(4));

        let handles: Vec<_> = (0..4)
            .map(|index| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || ledger.record(index))
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        ledger.assert_each_executed_once();
        assert_eq!(ledger.total(), 4);
    }

    #[test]
    #[should_panic(expected = "item 1 was executed 2 times")]
    fn ledger_detects_duplicates() {
        let ledger = ExecutionLedger::new(2);
        ledger.record(0);
        ledger.record(1);
        ledger.record(1);

        ledger.assert_each_executed_once();
    }

    #[test]
    fn identity_rows_have_ones_on_diagonal() {
        assert_eq!(identity_rows(2), vec![vec![1, 0], vec![0, 1]]);
    }
}
