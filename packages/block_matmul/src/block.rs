//! Partitioning of a square output matrix into rectangular blocks of work.

use std::ops::Range;

use crate::{Error, Result};

/// A rectangular region of the output matrix that is computed as one unit of work.
///
/// Blocks are produced by [`partition()`] and never overlap: together, the blocks of one
/// partition cover every cell of the output matrix exactly once.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Block {
    index: usize,
    grid_row: usize,
    grid_col: usize,
    rows: Range<usize>,
    cols: Range<usize>,
}

impl Block {
    /// Position of the block in the row-major block order of its partition.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The (row, column) coordinates of the block in the grid of blocks.
    #[must_use]
    pub fn grid_position(&self) -> (usize, usize) {
        (self.grid_row, self.grid_col)
    }

    /// Half-open range of output rows covered by the block.
    #[must_use]
    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    /// Half-open range of output columns covered by the block.
    #[must_use]
    pub fn cols(&self) -> Range<usize> {
        self.cols.clone()
    }

    /// Number of rows in the block.
    #[must_use]
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns in the block.
    #[must_use]
    pub fn width(&self) -> usize {
        self.cols.len()
    }

    /// Number of output cells in the block.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.height()
            .checked_mul(self.width())
            .expect("a block is never larger than its matrix, whose cell count fits in usize")
    }

    /// Whether the output cell at (`row`, `col`) belongs to this block.
    #[must_use]
    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows.contains(&row) && self.cols.contains(&col)
    }
}

/// Number of blocks along one side of an `dimension`x`dimension` matrix, i.e.
/// `ceil(dimension / block_size)`.
///
/// # Panics
///
/// Panics if `block_size` is zero.
#[must_use]
pub fn blocks_per_side(dimension: usize, block_size: usize) -> usize {
    assert!(block_size > 0, "block size must be positive");

    dimension.div_ceil(block_size)
}

/// Total number of blocks a partition of an `dimension`x`dimension` matrix contains, i.e.
/// `ceil(dimension / block_size)²`.
///
/// # Panics
///
/// Panics if `block_size` is zero.
#[must_use]
pub fn block_count(dimension: usize, block_size: usize) -> usize {
    let per_side = blocks_per_side(dimension, block_size);

    per_side
        .checked_mul(per_side)
        .expect("block count cannot exceed the cell count of the matrix")
}

/// Splits an `dimension`x`dimension` matrix into blocks of `block_size`x`block_size` cells.
///
/// Blocks are returned in row-major order: (0,0), (0,1), …, (0,last), (1,0), … Blocks in the
/// last block row and column are clipped to the matrix edge, so their dimensions may be
/// smaller than `block_size`. A block size larger than the matrix yields a single block.
///
/// The result depends only on the arguments, so partitioning the same matrix twice yields the
/// same sequence of blocks.
///
/// # Errors
///
/// Returns [`Error::InvalidDimension`] if `dimension` is zero and [`Error::InvalidBlockSize`]
/// if `block_size` is zero.
///
/// # Example
///
/// ```
/// use block_matmul::partition;
///
/// let blocks = partition(5, 2).unwrap();
///
/// assert_eq!(blocks.len(), 9);
/// assert_eq!(blocks[2].cols(), 4..5);
/// ```
pub fn partition(dimension: usize, block_size: usize) -> Result<Vec<Block>> {
    if dimension == 0 {
        return Err(Error::InvalidDimension);
    }

    if block_size == 0 {
        return Err(Error::InvalidBlockSize);
    }

    let per_side = blocks_per_side(dimension, block_size);
    let mut blocks = Vec::with_capacity(block_count(dimension, block_size));

    for grid_row in 0..per_side {
        for grid_col in 0..per_side {
            blocks.push(Block {
                index: blocks.len(),
                grid_row,
                grid_col,
                rows: clipped_range(grid_row, block_size, dimension),
                cols: clipped_range(grid_col, block_size, dimension),
            });
        }
    }

    Ok(blocks)
}

#[expect(
    clippy::arithmetic_side_effects,
    reason = "grid_index < ceil(dimension / block_size), so start never exceeds dimension"
)]
fn clipped_range(grid_index: usize, block_size: usize, dimension: usize) -> Range<usize> {
    let start = grid_index * block_size;
    let end = start.saturating_add(block_size).min(dimension);

    start..end
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn rejects_zero_dimension() {
        assert!(matches!(partition(0, 4), Err(Error::InvalidDimension)));
    }

    #[test]
    fn rejects_zero_block_size() {
        assert!(matches!(partition(4, 0), Err(Error::InvalidBlockSize)));
    }

    #[test]
    fn row_major_order() {
        let blocks = partition(4, 2).unwrap();

        let positions: Vec<_> = blocks.iter().map(Block::grid_position).collect();
        assert_eq!(positions, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);

        for (expected_index, block) in blocks.iter().enumerate() {
            assert_eq!(block.index(), expected_index);
        }
    }

    #[test]
    fn last_row_and_column_are_clipped() {
        let blocks = partition(5, 2).unwrap();

        assert_eq!(blocks.len(), 9);

        let corner = blocks.last().unwrap();
        assert_eq!(corner.rows(), 4..5);
        assert_eq!(corner.cols(), 4..5);
        assert_eq!(corner.cell_count(), 1);

        let edge = &blocks[5];
        assert_eq!(edge.grid_position(), (1, 2));
        assert_eq!(edge.height(), 2);
        assert_eq!(edge.width(), 1);
    }

    #[test]
    fn oversized_block_yields_single_block() {
        let blocks = partition(3, 10).unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].rows(), 0..3);
        assert_eq!(blocks[0].cols(), 0..3);
    }

    #[test]
    fn blocks_tile_matrix_without_overlap_or_gap() {
        for dimension in 1..=12 {
            for block_size in 1..=dimension {
                let blocks = partition(dimension, block_size).unwrap();
                assert_eq!(blocks.len(), block_count(dimension, block_size));

                let mut covered = HashSet::new();
                for block in &blocks {
                    for row in block.rows() {
                        for col in block.cols() {
                            assert!(
                                covered.insert((row, col)),
                                "cell ({row}, {col}) covered twice for n={dimension} bs={block_size}"
                            );
                        }
                    }
                }

                assert_eq!(covered.len(), dimension * dimension);
            }
        }
    }

    #[test]
    fn partition_is_deterministic() {
        assert_eq!(partition(17, 3).unwrap(), partition(17, 3).unwrap());
    }

    #[test]
    fn contains_respects_half_open_ranges() {
        let blocks = partition(4, 2).unwrap();
        let block = &blocks[3];

        assert!(block.contains(2, 2));
        assert!(block.contains(3, 3));
        assert!(!block.contains(1, 3));
        assert!(!block.contains(3, 4));
    }

    #[test]
    fn counts_match_ceiling_division() {
        assert_eq!(blocks_per_side(80, 8), 10);
        assert_eq!(blocks_per_side(80, 3), 27);
        assert_eq!(block_count(80, 3), 729);
        assert_eq!(block_count(1, 1), 1);
    }
}
