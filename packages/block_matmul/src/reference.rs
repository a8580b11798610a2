//! Single-threaded reference product and verification of concurrent results against it.

use std::num::NonZero;

use crate::matrix::ensure_operands_fit;
use crate::{Matrix, Result};

/// Computes C = A·B with a plain single-threaded triple loop.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if the matrices have different dimensions and
/// [`Error::ProductOverflow`] if their values can make a cell of the product overflow `i64`.
///
/// # Example
///
/// ```
/// use block_matmul::{Matrix, compute_reference};
///
/// let a = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();
/// let b = Matrix::from_rows(vec![vec![5, 6], vec![7, 8]]).unwrap();
///
/// let c = compute_reference(&a, &b).unwrap();
/// assert_eq!(c.row(0), &[19, 22]);
/// assert_eq!(c.row(1), &[43, 50]);
/// ```
#[expect(
    clippy::arithmetic_side_effects,
    reason = "operands are checked up front so that no partial sum can overflow"
)]
pub fn compute_reference(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    ensure_operands_fit(a, b)?;

    let dimension = a.dimension();
    let mut c = Matrix::zeros(
        NonZero::new(dimension).expect("a matrix never has a zero dimension"),
    );

    for i in 0..dimension {
        for j in 0..dimension {
            let mut sum = 0;

            for k in 0..dimension {
                sum += a.get(i, k) * b.get(k, j);
            }

            c.set(i, j, sum);
        }
    }

    Ok(c)
}

/// Whether `c` equals `reference` in every cell. Matrices of different dimensions are never
/// equal. Stops at the first differing cell.
#[must_use]
pub fn verify(c: &Matrix, reference: &Matrix) -> bool {
    c.dimension() == reference.dimension() && c.as_slice() == reference.as_slice()
}

/// A cell in which a computed product differs from the reference.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Mismatch {
    row: usize,
    col: usize,
    actual: i64,
    expected: i64,
}

impl Mismatch {
    /// Row of the differing cell.
    #[must_use]
    pub fn row(&self) -> usize {
        self.row
    }

    /// Column of the differing cell.
    #[must_use]
    pub fn col(&self) -> usize {
        self.col
    }

    /// Value found in the computed product.
    #[must_use]
    pub fn actual(&self) -> i64 {
        self.actual
    }

    /// Value found in the reference product.
    #[must_use]
    pub fn expected(&self) -> i64 {
        self.expected
    }
}

/// Finds the first cell, in row-major order, where `c` differs from `reference`.
///
/// # Panics
///
/// Panics if the matrices have different dimensions.
#[must_use]
pub fn first_mismatch(c: &Matrix, reference: &Matrix) -> Option<Mismatch> {
    assert_eq!(
        c.dimension(),
        reference.dimension(),
        "only matrices of the same dimension can be compared cell by cell"
    );

    let dimension = c.dimension();

    (0..dimension)
        .flat_map(|row| (0..dimension).map(move |col| (row, col)))
        .find_map(|(row, col)| {
            let actual = c.get(row, col);
            let expected = reference.get(row, col);

            (actual != expected).then_some(Mismatch {
                row,
                col,
                actual,
                expected,
            })
        })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::Error;

    fn sample() -> Matrix {
        Matrix::from_rows(testing::sample_4x4_rows()).unwrap()
    }

    #[test]
    fn identity_is_neutral() {
        let a = sample();
        let identity = Matrix::identity(nz!(4));

        assert_eq!(compute_reference(&a, &identity).unwrap(), a);
        assert_eq!(compute_reference(&identity, &a).unwrap(), a);
    }

    #[test]
    fn known_2x2_product() {
        let (a, b) = testing::pair_2x2();
        let a = Matrix::from_rows(a).unwrap();
        let b = Matrix::from_rows(b).unwrap();

        let c = compute_reference(&a, &b).unwrap();

        assert_eq!(
            c,
            Matrix::from_rows(vec![vec![19, 22], vec![43, 50]]).unwrap()
        );
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let result = compute_reference(&sample(), &Matrix::identity(nz!(3)));

        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { left: 4, right: 3 })
        ));
    }

    #[test]
    fn rejects_operands_that_overflow_product() {
        let a = Matrix::from_rows(vec![vec![4_000_000_000, 1], vec![1, 1]]).unwrap();

        assert!(matches!(
            compute_reference(&a, &a),
            Err(Error::ProductOverflow {
                dimension: 2,
                magnitude: 4_000_000_000
            })
        ));
    }

    #[test]
    fn verify_accepts_equal_and_rejects_different() {
        let a = sample();
        let mut b = sample();

        assert!(verify(&a, &b));

        b.set(3, 1, 0);
        assert!(!verify(&a, &b));
    }

    #[test]
    fn verify_rejects_different_dimensions() {
        assert!(!verify(&Matrix::identity(nz!(2)), &Matrix::identity(nz!(3))));
    }

    #[test]
    fn first_mismatch_reports_position_and_values() {
        let reference = sample();
        let mut c = sample();

        assert_eq!(first_mismatch(&c, &reference), None);

        c.set(2, 3, -1);
        c.set(3, 0, -1);

        let mismatch = first_mismatch(&c, &reference).unwrap();
        assert_eq!(mismatch.row(), 2);
        assert_eq!(mismatch.col(), 3);
        assert_eq!(mismatch.actual(), -1);
        assert_eq!(mismatch.expected(), 12);
    }

    #[test]
    #[should_panic]
    fn first_mismatch_panics_on_dimension_mismatch() {
        _ = first_mismatch(&Matrix::identity(nz!(2)), &Matrix::identity(nz!(3)));
    }
}
