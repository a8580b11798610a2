use std::io;

use thiserror::Error;

/// Errors that can occur when configuring or executing a block-partitioned multiplication.
///
/// A result that does not match the reference product is not an error. It is reported as an
/// invalid trial so a benchmark sweep can continue with the next block size.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The matrix dimension was zero.
    #[error("matrix dimension must be positive")]
    InvalidDimension,

    /// The block size was zero.
    #[error("block size must be positive")]
    InvalidBlockSize,

    /// The requested worker count was zero.
    #[error("worker count must be positive")]
    InvalidWorkerCount,

    /// The range used to seed input matrices was empty.
    #[error("invalid value range {min}..={max}: the lower bound exceeds the upper bound")]
    InvalidValueRange {
        /// Lower bound of the rejected range.
        min: i64,

        /// Upper bound of the rejected range.
        max: i64,
    },

    /// Input values are large enough that a cell of the product could overflow `i64`.
    #[error(
        "values of magnitude up to {magnitude} can overflow the product of {dimension}x{dimension} matrices"
    )]
    ProductOverflow {
        /// Dimension of the matrices.
        dimension: usize,

        /// Largest absolute value the inputs may contain.
        magnitude: u64,
    },

    /// A matrix built from rows did not have as many values in each row as it has rows.
    #[error("matrix is not square: row {row} has {len} values but the matrix has {expected} rows")]
    NotSquare {
        /// Index of the first offending row.
        row: usize,

        /// Number of values in the offending row.
        len: usize,

        /// Number of rows in the matrix.
        expected: usize,
    },

    /// Two matrices that take part in the same product have different dimensions.
    #[error("matrix dimensions do not match: {left}x{left} vs {right}x{right}")]
    DimensionMismatch {
        /// Dimension of the left-hand matrix.
        left: usize,

        /// Dimension of the right-hand matrix.
        right: usize,
    },

    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread {worker}")]
    WorkerSpawn {
        /// Index of the worker that could not be started.
        worker: usize,

        /// The underlying operating system error.
        #[source]
        source: io::Error,
    },

    /// One or more workers panicked while executing a block. The blocks they were executing
    /// are lost and the output matrix is only partially computed.
    #[error("{panicked} of {workers} workers panicked before completing their blocks")]
    WorkerPanicked {
        /// Number of workers that panicked.
        panicked: usize,

        /// Number of workers that took part in the run.
        workers: usize,
    },
}

/// A specialized `Result` type for block multiplication, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::error::Error as _;
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn worker_spawn_exposes_source() {
        let error = Error::WorkerSpawn {
            worker: 3,
            source: io::Error::other("out of threads"),
        };

        assert!(error.source().is_some());
        assert!(error.to_string().contains("worker thread 3"));
    }

    #[test]
    fn worker_panicked_mentions_counts() {
        let error = Error::WorkerPanicked {
            panicked: 1,
            workers: 4,
        };

        assert_eq!(
            error.to_string(),
            "1 of 4 workers panicked before completing their blocks"
        );
    }
}
