//! Square integer matrices and the store that holds the inputs and output of a product.

use std::fmt;
use std::num::NonZero;
use std::ops::{Range, RangeInclusive};

use parking_lot::Mutex;
use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Block, Error, LocalBlock, Result};

/// A dense square matrix of signed integers stored in row-major order.
///
/// # Example
///
/// ```
/// use block_matmul::Matrix;
///
/// let matrix = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();
///
/// assert_eq!(matrix.dimension(), 2);
/// assert_eq!(matrix.get(1, 0), 3);
/// assert_eq!(matrix.row(1), &[3, 4]);
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Matrix {
    dimension: usize,
    cells: Vec<i64>,
}

impl Matrix {
    /// Creates a matrix with every cell set to zero.
    #[must_use]
    pub fn zeros(dimension: NonZero<usize>) -> Self {
        let dimension = dimension.get();

        Self {
            dimension,
            cells: vec![0; cell_count(dimension)],
        }
    }

    /// Creates an identity matrix.
    #[must_use]
    pub fn identity(dimension: NonZero<usize>) -> Self {
        let mut matrix = Self::zeros(dimension);

        for i in 0..matrix.dimension {
            matrix.set(i, i, 1);
        }

        matrix
    }

    /// Creates a matrix from a list of rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimension`] if `rows` is empty and [`Error::NotSquare`] if any
    /// row has a different number of values than there are rows.
    pub fn from_rows(rows: Vec<Vec<i64>>) -> Result<Self> {
        let dimension = rows.len();

        if dimension == 0 {
            return Err(Error::InvalidDimension);
        }

        let mut cells = Vec::with_capacity(cell_count(dimension));

        for (row, values) in rows.into_iter().enumerate() {
            if values.len() != dimension {
                return Err(Error::NotSquare {
                    row,
                    len: values.len(),
                    expected: dimension,
                });
            }

            cells.extend(values);
        }

        Ok(Self { dimension, cells })
    }

    /// Creates a matrix whose cells are drawn uniformly from the inclusive range `values`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValueRange`] if the range is empty.
    pub fn random(
        dimension: NonZero<usize>,
        values: &RangeInclusive<i64>,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let (min, max) = (*values.start(), *values.end());

        if min > max {
            return Err(Error::InvalidValueRange { min, max });
        }

        let distribution =
            Uniform::new_inclusive(min, max).expect("range bounds were validated above");

        let dimension = dimension.get();
        let cells = distribution
            .sample_iter(rng)
            .take(cell_count(dimension))
            .collect();

        Ok(Self { dimension, cells })
    }

    /// Number of rows (and columns) of the matrix.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the value at (`row`, `col`).
    ///
    /// # Panics
    ///
    /// Panics if either coordinate is out of bounds.
    #[must_use]
    #[expect(
        clippy::indexing_slicing,
        reason = "offset() asserts that the coordinates are in bounds"
    )]
    pub fn get(&self, row: usize, col: usize) -> i64 {
        self.cells[self.offset(row, col)]
    }

    /// Sets the value at (`row`, `col`).
    ///
    /// # Panics
    ///
    /// Panics if either coordinate is out of bounds.
    #[expect(
        clippy::indexing_slicing,
        reason = "offset() asserts that the coordinates are in bounds"
    )]
    pub fn set(&mut self, row: usize, col: usize, value: i64) {
        let offset = self.offset(row, col);
        self.cells[offset] = value;
    }

    /// Returns the values of one row.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    #[must_use]
    pub fn row(&self, row: usize) -> &[i64] {
        let start = self.offset(row, 0);

        self.cells
            .get(start..start.saturating_add(self.dimension))
            .expect("offset() asserts that the row is in bounds")
    }

    /// All cells in row-major order.
    #[must_use]
    pub fn as_slice(&self) -> &[i64] {
        &self.cells
    }

    /// Wrapping sum of all cells, a cheap fingerprint for comparing results in logs.
    #[must_use]
    pub fn checksum(&self) -> i64 {
        self.cells
            .iter()
            .fold(0_i64, |sum, value| sum.wrapping_add(*value))
    }

    /// Largest absolute value of any cell.
    fn magnitude(&self) -> u64 {
        self.cells
            .iter()
            .map(|value| value.unsigned_abs())
            .max()
            .unwrap_or(0)
    }

    fn fill_zero(&mut self) {
        self.cells.fill(0);
    }

    /// Mutable view of the cells `cols` of `row`.
    fn row_segment_mut(&mut self, row: usize, cols: &Range<usize>) -> &mut [i64] {
        assert!(
            cols.end <= self.dimension,
            "columns {cols:?} are out of bounds for a {n}x{n} matrix",
            n = self.dimension
        );

        let row_start = self.offset(row, 0);

        self.cells
            .get_mut(row_start.saturating_add(cols.start)..row_start.saturating_add(cols.end))
            .expect("bounds were asserted above")
    }

    #[expect(
        clippy::arithmetic_side_effects,
        reason = "coordinates are asserted to be in bounds, so the offset is below the cell count"
    )]
    fn offset(&self, row: usize, col: usize) -> usize {
        assert!(
            row < self.dimension && col < self.dimension,
            "cell ({row}, {col}) is out of bounds for a {n}x{n} matrix",
            n = self.dimension
        );

        row * self.dimension + col
    }
}

impl fmt::Display for Matrix {
    #[cfg_attr(test, mutants::skip)] // No API contract for the exact layout.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.cells.chunks(self.dimension) {
            for value in row {
                write!(f, "{value:>6}")?;
            }

            writeln!(f)?;
        }

        Ok(())
    }
}

/// How a computed block is written into the output matrix.
///
/// Both modes produce the same product because blocks never overlap and every block is fully
/// summed over the contraction dimension before it is committed. Accumulation additionally
/// depends on the output being zeroed before the run, which [`MatrixStore::reset_output()`]
/// does before every multiplication.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CommitMode {
    /// Each output cell is assigned the computed value.
    #[default]
    Overwrite,

    /// Each computed value is added to the current value of the output cell.
    Accumulate,
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overwrite => write!(f, "overwrite"),
            Self::Accumulate => write!(f, "accumulate"),
        }
    }
}

/// Owns the input matrices A and B and the shared output matrix C of a product C = A·B.
///
/// The inputs are read-only for the lifetime of the store, so workers read them concurrently
/// without synchronization. The output is guarded by a single lock that is taken once per
/// committed block.
///
/// # Example
///
/// ```
/// use block_matmul::MatrixStore;
/// use new_zealand::nz;
///
/// let store = MatrixStore::seed(nz!(8), 1..=20, 42).unwrap();
///
/// assert_eq!(store.dimension(), 8);
/// assert!(store.a().as_slice().iter().all(|value| (1..=20).contains(value)));
/// assert!(store.output().as_slice().iter().all(|value| *value == 0));
/// ```
#[derive(Debug)]
pub struct MatrixStore {
    a: Matrix,
    b: Matrix,
    c: Mutex<Matrix>,
}

impl MatrixStore {
    /// Creates a store whose inputs are filled with values drawn uniformly from `values`.
    ///
    /// The same `rng_seed` always produces the same inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValueRange`] if `values` is empty and
    /// [`Error::ProductOverflow`] if values from `values` can make a cell of the product
    /// overflow `i64`.
    pub fn seed(
        dimension: NonZero<usize>,
        values: RangeInclusive<i64>,
        rng_seed: u64,
    ) -> Result<Self> {
        let (min, max) = (*values.start(), *values.end());

        if min > max {
            return Err(Error::InvalidValueRange { min, max });
        }

        ensure_product_fits(
            dimension.get(),
            min.unsigned_abs().max(max.unsigned_abs()),
        )?;

        let mut rng = StdRng::seed_from_u64(rng_seed);

        let a = Matrix::random(dimension, &values, &mut rng)?;
        let b = Matrix::random(dimension, &values, &mut rng)?;

        Ok(Self::new_unchecked(a, b))
    }

    /// Creates a store from caller-provided input matrices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the inputs have different dimensions and
    /// [`Error::ProductOverflow`] if their values can make a cell of the product overflow `i64`.
    pub fn from_matrices(a: Matrix, b: Matrix) -> Result<Self> {
        ensure_operands_fit(&a, &b)?;

        Ok(Self::new_unchecked(a, b))
    }

    fn new_unchecked(a: Matrix, b: Matrix) -> Self {
        let c = Matrix {
            dimension: a.dimension,
            cells: vec![0; a.cells.len()],
        };

        Self {
            a,
            b,
            c: Mutex::new(c),
        }
    }

    /// Dimension shared by all three matrices.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.a.dimension()
    }

    /// The left-hand input matrix.
    #[must_use]
    pub fn a(&self) -> &Matrix {
        &self.a
    }

    /// The right-hand input matrix.
    #[must_use]
    pub fn b(&self) -> &Matrix {
        &self.b
    }

    /// Sets every cell of the output matrix to zero.
    pub fn reset_output(&self) {
        self.c.lock().fill_zero();
    }

    /// Writes a computed block into the output matrix, using `mode` to combine it with the
    /// current contents.
    ///
    /// # Panics
    ///
    /// Panics if the block does not fit in the matrix or if `local` does not have the
    /// dimensions of `block`. Blocks always come from [`partition()`][crate::partition], so
    /// either case is a bug in the caller.
    pub fn commit(&self, block: &Block, local: &LocalBlock, mode: CommitMode) {
        match mode {
            CommitMode::Overwrite => self.commit_block(block, local),
            CommitMode::Accumulate => self.accumulate_block(block, local),
        }
    }

    /// Assigns the values of a computed block to the corresponding output cells.
    ///
    /// # Panics
    ///
    /// See [`commit()`][Self::commit].
    pub fn commit_block(&self, block: &Block, local: &LocalBlock) {
        assert_block_shape(block, local);

        let mut c = self.c.lock();

        for (local_row, row) in block.rows().enumerate() {
            c.row_segment_mut(row, &block.cols())
                .copy_from_slice(local.row(local_row));
        }
    }

    /// Adds the values of a computed block to the corresponding output cells.
    ///
    /// # Panics
    ///
    /// See [`commit()`][Self::commit].
    pub fn accumulate_block(&self, block: &Block, local: &LocalBlock) {
        assert_block_shape(block, local);

        let mut c = self.c.lock();

        for (local_row, row) in block.rows().enumerate() {
            for (cell, value) in c
                .row_segment_mut(row, &block.cols())
                .iter_mut()
                .zip(local.row(local_row))
            {
                *cell = cell.wrapping_add(*value);
            }
        }
    }

    /// Returns a copy of the current output matrix.
    #[must_use]
    pub fn output(&self) -> Matrix {
        self.c.lock().clone()
    }

    /// Consumes the store, returning the output matrix.
    #[must_use]
    pub fn into_output(self) -> Matrix {
        self.c.into_inner()
    }
}

/// Fails unless `a` and `b` have the same dimension and every partial sum of their product
/// fits in `i64`.
pub(crate) fn ensure_operands_fit(a: &Matrix, b: &Matrix) -> Result<()> {
    if a.dimension() != b.dimension() {
        return Err(Error::DimensionMismatch {
            left: a.dimension(),
            right: b.dimension(),
        });
    }

    ensure_product_fits(a.dimension(), a.magnitude().max(b.magnitude()))
}

/// Fails if `dimension` products of two values of at most `magnitude` can add up to more
/// than `i64::MAX`. Every cell and every partial sum of the product is bounded by that total.
fn ensure_product_fits(dimension: usize, magnitude: u64) -> Result<()> {
    let fits = u64::try_from(dimension)
        .ok()
        .and_then(|terms| magnitude.checked_mul(magnitude)?.checked_mul(terms))
        .is_some_and(|bound| bound <= i64::MAX.unsigned_abs());

    if fits {
        Ok(())
    } else {
        Err(Error::ProductOverflow {
            dimension,
            magnitude,
        })
    }
}

fn assert_block_shape(block: &Block, local: &LocalBlock) {
    assert!(
        block.height() == local.height() && block.width() == local.width(),
        "local block is {}x{} but block {} is {}x{}",
        local.height(),
        local.width(),
        block.index(),
        block.height(),
        block.width()
    );
}

fn cell_count(dimension: usize) -> usize {
    dimension
        .checked_mul(dimension)
        .expect("matrix cell count overflows usize")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::partition;

    assert_impl_all!(Matrix: Send, Sync);
    assert_impl_all!(MatrixStore: Send, Sync);

    #[test]
    fn identity_has_ones_on_diagonal() {
        let identity = Matrix::identity(nz!(3));

        assert_eq!(identity.as_slice(), &[1, 0, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        let result = Matrix::from_rows(vec![vec![1, 2], vec![3]]);

        assert!(matches!(
            result,
            Err(Error::NotSquare {
                row: 1,
                len: 1,
                expected: 2
            })
        ));
    }

    #[test]
    fn from_rows_rejects_empty_input() {
        assert!(matches!(
            Matrix::from_rows(Vec::new()),
            Err(Error::InvalidDimension)
        ));
    }

    #[test]
    fn seeded_inputs_are_reproducible() {
        let first = MatrixStore::seed(nz!(16), 1..=20, 7).unwrap();
        let second = MatrixStore::seed(nz!(16), 1..=20, 7).unwrap();
        let other = MatrixStore::seed(nz!(16), 1..=20, 8).unwrap();

        assert_eq!(first.a(), second.a());
        assert_eq!(first.b(), second.b());
        assert_ne!(first.a(), other.a());
    }

    #[test]
    fn seeded_values_stay_in_range() {
        let store = MatrixStore::seed(nz!(20), -3..=3, 1).unwrap();

        for value in store.a().as_slice().iter().chain(store.b().as_slice()) {
            assert!((-3..=3).contains(value));
        }
    }

    #[test]
    fn seed_rejects_empty_range() {
        let (min, max) = (5, 1);
        let result = MatrixStore::seed(nz!(2), min..=max, 0);

        assert!(matches!(
            result,
            Err(Error::InvalidValueRange { min: 5, max: 1 })
        ));
    }

    #[test]
    fn seed_rejects_range_that_overflows_product() {
        let result = MatrixStore::seed(nz!(4), 1..=4_000_000_000, 0);

        assert!(matches!(
            result,
            Err(Error::ProductOverflow {
                dimension: 4,
                magnitude: 4_000_000_000
            })
        ));

        // A negative bound counts by its absolute value.
        assert!(matches!(
            MatrixStore::seed(nz!(4), i64::MIN..=0, 0),
            Err(Error::ProductOverflow { dimension: 4, .. })
        ));
    }

    #[test]
    fn product_bound_is_exact_at_the_limit() {
        // 3_037_000_499 squared is just below i64::MAX; one more is just above it.
        ensure_product_fits(1, 3_037_000_499).unwrap();

        assert!(matches!(
            ensure_product_fits(1, 3_037_000_500),
            Err(Error::ProductOverflow { .. })
        ));
        assert!(matches!(
            ensure_product_fits(2, 3_037_000_499),
            Err(Error::ProductOverflow { .. })
        ));
    }

    #[test]
    fn from_matrices_rejects_values_that_overflow_product() {
        let large = Matrix::from_rows(vec![vec![i64::MAX, 0], vec![0, 1]]).unwrap();

        assert!(matches!(
            MatrixStore::from_matrices(large, Matrix::identity(nz!(2))),
            Err(Error::ProductOverflow { dimension: 2, .. })
        ));
    }

    #[test]
    fn into_output_returns_last_committed_product() {
        let store =
            MatrixStore::from_matrices(Matrix::zeros(nz!(2)), Matrix::zeros(nz!(2))).unwrap();
        let blocks = partition(2, 2).unwrap();

        store.commit_block(&blocks[0], &LocalBlock::from_cells(2, 2, vec![1, 2, 3, 4]));

        assert_eq!(
            store.into_output(),
            Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap()
        );
    }

    #[test]
    fn from_matrices_rejects_mismatched_dimensions() {
        let result = MatrixStore::from_matrices(Matrix::zeros(nz!(2)), Matrix::zeros(nz!(3)));

        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { left: 2, right: 3 })
        ));
    }

    #[test]
    fn commit_overwrites_and_accumulate_adds() {
        let store =
            MatrixStore::from_matrices(Matrix::zeros(nz!(3)), Matrix::zeros(nz!(3))).unwrap();
        let blocks = partition(3, 2).unwrap();

        // Block 1 covers rows 0..2 and column 2.
        let block = &blocks[1];
        let local = LocalBlock::from_cells(2, 1, vec![5, 6]);

        store.commit(block, &local, CommitMode::Overwrite);
        store.commit(block, &local, CommitMode::Overwrite);
        assert_eq!(store.output().as_slice(), &[0, 0, 5, 0, 0, 6, 0, 0, 0]);

        store.commit(block, &local, CommitMode::Accumulate);
        assert_eq!(store.output().as_slice(), &[0, 0, 10, 0, 0, 12, 0, 0, 0]);

        store.reset_output();
        assert!(store.output().as_slice().iter().all(|value| *value == 0));
    }

    #[test]
    #[should_panic]
    fn commit_rejects_wrong_shape() {
        let store =
            MatrixStore::from_matrices(Matrix::zeros(nz!(3)), Matrix::zeros(nz!(3))).unwrap();
        let blocks = partition(3, 2).unwrap();

        store.commit_block(&blocks[0], &LocalBlock::from_cells(1, 1, vec![1]));
    }

    #[test]
    #[should_panic]
    fn get_out_of_bounds_panics() {
        let matrix = Matrix::zeros(nz!(2));

        _ = matrix.get(2, 0);
    }

    #[test]
    fn checksum_sums_all_cells() {
        let matrix = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();

        assert_eq!(matrix.checksum(), 10);
    }

    #[test]
    fn display_renders_one_line_per_row() {
        let matrix = Matrix::from_rows(vec![vec![1, 2], vec![3, 40]]).unwrap();

        assert_eq!(matrix.to_string(), "     1     2\n     3    40\n");
    }
}
