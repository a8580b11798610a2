#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Block-partitioned concurrent multiplication of square integer matrices.
//!
//! The output matrix C = A·B is split into a grid of rectangular blocks. Each block is an
//! independent unit of work: a worker computes it into a local buffer and commits the buffer
//! into C. Because blocks never overlap, the order in which workers finish does not affect the
//! result.
//!
//! How blocks reach the workers is selected by a [`Strategy`]:
//!
//! * [`Strategy::Channel`] - a bounded queue fed by the calling thread.
//! * [`Strategy::Semaphore`] - a counting semaphore guarding a shared list of pending blocks.
//! * [`Strategy::Cursor`] - a shared cursor that workers fetch and increment.
//! * [`Strategy::ThreadPerBlock`] - a dedicated thread for every block.
//!
//! All strategies compute the same product. The [`Bench`] harness times each of them over a
//! sweep of block sizes and verifies every product against a single-threaded reference.
//!
//! # Example
//!
//! ```
//! use block_matmul::{Distributor, Matrix, MatrixStore, MultiplyJob, Strategy};
//! use new_zealand::nz;
//!
//! let a = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();
//! let b = Matrix::from_rows(vec![vec![5, 6], vec![7, 8]]).unwrap();
//! let store = MatrixStore::from_matrices(a, b).unwrap();
//!
//! for strategy in Strategy::all() {
//!     MultiplyJob::new(&store, 1)
//!         .run(&Distributor::new(strategy, nz!(2)))
//!         .unwrap();
//!
//!     assert_eq!(store.output().row(0), &[19, 22]);
//!     assert_eq!(store.output().row(1), &[43, 50]);
//! }
//! ```
//!
//! # Logging
//!
//! The crate emits `tracing` events: one `info` event per benchmark trial, `debug` events when
//! a distribution starts and ends and `trace` events for every block executed and committed.
//! Install a subscriber to see them.

mod bench;
mod block;
mod distributor;
mod error;
mod executor;
mod matrix;
mod reference;
mod semaphore;
mod worker_pool;

pub use bench::*;
pub use block::*;
pub use distributor::*;
pub use error::*;
pub use executor::*;
pub use matrix::*;
pub use reference::*;
