//! Computation of individual output blocks and the job that drives a full multiplication.

use std::num::NonZero;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::{
    Block, CommitMode, DistributionReport, Distributor, Matrix, MatrixStore, Result, partition,
};

/// A computed block of the output matrix, held in a buffer local to the worker until it is
/// committed into the shared output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalBlock {
    height: usize,
    width: usize,
    cells: Vec<i64>,
}

impl LocalBlock {
    /// Creates a zero-filled buffer of the given size.
    #[must_use]
    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            cells: vec![0; local_cell_count(height, width)],
        }
    }

    /// Creates a buffer from row-major cell values.
    ///
    /// # Panics
    ///
    /// Panics if `cells` does not contain exactly `height * width` values.
    #[must_use]
    pub fn from_cells(height: usize, width: usize, cells: Vec<i64>) -> Self {
        assert_eq!(
            cells.len(),
            local_cell_count(height, width),
            "a {height}x{width} block needs exactly {} cells",
            local_cell_count(height, width)
        );

        Self {
            height,
            width,
            cells,
        }
    }

    /// Number of rows in the buffer.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of columns in the buffer.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the values of one row of the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    #[must_use]
    pub fn row(&self, row: usize) -> &[i64] {
        assert!(row < self.height, "row {row} is out of bounds");

        self.cells
            .chunks(self.width.max(1))
            .nth(row)
            .expect("bounds were asserted above")
    }

    fn row_mut(&mut self, row: usize) -> &mut [i64] {
        assert!(row < self.height, "row {row} is out of bounds");

        self.cells
            .chunks_mut(self.width.max(1))
            .nth(row)
            .expect("bounds were asserted above")
    }
}

fn local_cell_count(height: usize, width: usize) -> usize {
    height
        .checked_mul(width)
        .expect("block cell count overflows usize")
}

/// How the contraction dimension k is walked when computing a block.
///
/// Correctness does not depend on this setting: every mode covers the full range `0..N`
/// exactly once. It only changes the memory access pattern.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum KBlocking {
    /// Walk k in chunks as wide as the block size of the partition.
    #[default]
    MatchBlockSize,

    /// Walk the whole of k in one pass.
    SinglePass,

    /// Walk k in chunks of the given width.
    Width(NonZero<usize>),
}

impl KBlocking {
    /// The chunk width used for a partition of a `dimension`x`dimension` product into blocks of
    /// `block_size` cells per side.
    #[must_use]
    pub fn resolve(self, dimension: NonZero<usize>, block_size: NonZero<usize>) -> NonZero<usize> {
        match self {
            Self::MatchBlockSize => block_size,
            Self::SinglePass => dimension,
            Self::Width(width) => width,
        }
    }
}

/// Computes one block of the product C = A·B.
///
/// For every cell (i, j) of the block, the full sum `A[i][k] * B[k][j]` over `k` in `0..N` is
/// accumulated into a local buffer, walking the contraction dimension in chunks of `k_width`.
/// The shared output is not touched; the caller commits the returned buffer.
///
/// # Panics
///
/// Panics if `a` and `b` have different dimensions or the block does not fit in them. With
/// overflow checks enabled, also panics if a cell of the product overflows `i64`; the inputs
/// of a [`MatrixStore`] are validated so that this cannot happen.
///
/// # Example
///
/// ```
/// use block_matmul::{Matrix, execute_block, partition};
/// use new_zealand::nz;
///
/// let a = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();
/// let b = Matrix::from_rows(vec![vec![5, 6], vec![7, 8]]).unwrap();
/// let blocks = partition(2, 1).unwrap();
///
/// let local = execute_block(&blocks[3], &a, &b, nz!(2));
/// assert_eq!(local.row(0), &[50]);
/// ```
#[must_use]
#[expect(
    clippy::arithmetic_side_effects,
    reason = "store inputs are validated against product overflow; row offsets are below the block height"
)]
pub fn execute_block(block: &Block, a: &Matrix, b: &Matrix, k_width: NonZero<usize>) -> LocalBlock {
    assert_eq!(
        a.dimension(),
        b.dimension(),
        "input matrices must have the same dimension"
    );

    let dimension = a.dimension();
    let mut local = LocalBlock::zeros(block.height(), block.width());

    for k_start in (0..dimension).step_by(k_width.get()) {
        let k_end = k_start.saturating_add(k_width.get()).min(dimension);

        for row in block.rows() {
            let a_row = a
                .row(row)
                .get(k_start..k_end)
                .expect("k chunk is clipped to the matrix dimension");

            let local_row = local.row_mut(row - block.rows().start);

            for (cell, col) in local_row.iter_mut().zip(block.cols()) {
                let partial: i64 = a_row
                    .iter()
                    .zip(k_start..k_end)
                    .map(|(a_ik, k)| a_ik * b.get(k, col))
                    .sum();

                *cell += partial;
            }
        }
    }

    local
}

/// Computes C = A·B for the matrices of a [`MatrixStore`] by partitioning the output into
/// blocks and handing them to a [`Distributor`].
///
/// Every run zeroes the output first, computes each block into a worker-local buffer and then
/// commits the buffer into the shared output under the store's lock.
///
/// # Example
///
/// ```
/// use block_matmul::{Distributor, Matrix, MatrixStore, MultiplyJob, Strategy};
/// use new_zealand::nz;
///
/// let a = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();
/// let b = Matrix::from_rows(vec![vec![5, 6], vec![7, 8]]).unwrap();
/// let store = MatrixStore::from_matrices(a, b).unwrap();
///
/// let report = MultiplyJob::new(&store, 1)
///     .run(&Distributor::new(Strategy::Cursor, nz!(2)))
///     .unwrap();
///
/// assert_eq!(report.blocks_executed(), 4);
/// assert_eq!(
///     store.output(),
///     Matrix::from_rows(vec![vec![19, 22], vec![43, 50]]).unwrap()
/// );
/// ```
#[derive(Debug)]
pub struct MultiplyJob<'a> {
    store: &'a MatrixStore,
    block_size: usize,
    commit_mode: CommitMode,
    k_blocking: KBlocking,
}

impl<'a> MultiplyJob<'a> {
    /// Creates a job that multiplies the inputs of `store` in blocks of
    /// `block_size`x`block_size` cells.
    #[must_use]
    pub fn new(store: &'a MatrixStore, block_size: usize) -> Self {
        Self {
            store,
            block_size,
            commit_mode: CommitMode::default(),
            k_blocking: KBlocking::default(),
        }
    }

    /// Sets how computed blocks are written into the output.
    #[must_use]
    pub fn commit_mode(mut self, commit_mode: CommitMode) -> Self {
        self.commit_mode = commit_mode;
        self
    }

    /// Sets how the contraction dimension is walked.
    #[must_use]
    pub fn k_blocking(mut self, k_blocking: KBlocking) -> Self {
        self.k_blocking = k_blocking;
        self
    }

    /// Runs the multiplication, blocking until every block has been committed.
    ///
    /// The arguments are validated before the output is touched or any worker is started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockSize`][crate::Error::InvalidBlockSize] for a zero block
    /// size. Distribution errors are passed through from [`Distributor::run()`]; after
    /// [`Error::WorkerPanicked`][crate::Error::WorkerPanicked] the output is only partially
    /// computed.
    pub fn run(&self, distributor: &Distributor) -> Result<DistributionReport> {
        let blocks = partition(self.store.dimension(), self.block_size)?;

        let k_width = self.k_blocking.resolve(
            NonZero::new(self.store.dimension()).expect("partition() rejects a zero dimension"),
            NonZero::new(self.block_size).expect("partition() rejects a zero block size"),
        );

        self.store.reset_output();

        let total = blocks.len();
        let committed = AtomicUsize::new(0);

        distributor.run(&blocks, |block| {
            let local = execute_block(block, self.store.a(), self.store.b(), k_width);
            self.store.commit(block, &local, self.commit_mode);

            let done = committed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
            let (grid_row, grid_col) = block.grid_position();
            trace!(
                block = block.index(),
                grid_row, grid_col, done, total, "block committed"
            );
        })
    }
}
