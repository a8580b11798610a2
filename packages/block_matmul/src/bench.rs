//! Benchmark harness: seeds inputs once, then times every (strategy, block size) combination
//! and checks each product against the reference.

use std::fmt::{self, Display};
use std::num::NonZero;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use new_zealand::nz;
use tracing::{debug, error, info, warn};

use crate::{
    CommitMode, DistributionReport, Distributor, Error, KBlocking, Matrix, MatrixStore, MultiplyJob, Result,
    Strategy, block_count, compute_reference, first_mismatch, hardware_concurrency, verify,
};

/// Matrix dimension used when none is configured.
pub const DEFAULT_DIMENSION: NonZero<usize> = nz!(80);

/// Range input values are drawn from when none is configured.
pub const DEFAULT_VALUE_RANGE: RangeInclusive<i64> = 1..=20;

/// Block sizes swept when none are configured. Sizes larger than the matrix are skipped.
pub const DEFAULT_BLOCK_SIZES: &[usize] = &[1, 2, 4, 5, 8, 10, 20, 40, 80];

/// Parameters of a benchmark sweep.
///
/// # Example
///
/// ```
/// use block_matmul::{Bench, BenchConfig, Strategy};
///
/// let config = BenchConfig::default()
///     .dimension(12)
///     .block_sizes(vec![3, 5])
///     .strategies(vec![Strategy::Cursor])
///     .workers(2)
///     .rng_seed(7);
///
/// let report = Bench::new(config).unwrap().run().unwrap();
///
/// assert_eq!(report.trials().len(), 2);
/// assert!(report.all_valid());
/// ```
#[derive(Clone, Debug)]
pub struct BenchConfig {
    dimension: usize,
    value_range: RangeInclusive<i64>,
    block_sizes: Option<Vec<usize>>,
    workers: Option<usize>,
    strategies: Vec<Strategy>,
    rng_seed: Option<u64>,
    commit_mode: CommitMode,
    k_blocking: KBlocking,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION.get(),
            value_range: DEFAULT_VALUE_RANGE,
            block_sizes: None,
            workers: None,
            strategies: Strategy::all().to_vec(),
            rng_seed: None,
            commit_mode: CommitMode::default(),
            k_blocking: KBlocking::default(),
        }
    }
}

impl BenchConfig {
    /// Sets the dimension N of the square input matrices.
    #[must_use]
    pub fn dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Sets the inclusive range input values are drawn from.
    #[must_use]
    pub fn value_range(mut self, value_range: RangeInclusive<i64>) -> Self {
        self.value_range = value_range;
        self
    }

    /// Sets the block sizes to sweep, in order.
    #[must_use]
    pub fn block_sizes(mut self, block_sizes: Vec<usize>) -> Self {
        self.block_sizes = Some(block_sizes);
        self
    }

    /// Sets the worker count. Defaults to the number of processors available to the process.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Sets the strategies to sweep, in order. Defaults to every strategy.
    #[must_use]
    pub fn strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Sets the seed for the input matrices. Defaults to a random seed, which is logged.
    #[must_use]
    pub fn rng_seed(mut self, rng_seed: u64) -> Self {
        self.rng_seed = Some(rng_seed);
        self
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

    fn resolve_block_sizes(&self) -> Vec<usize> {
        self.block_sizes.clone().unwrap_or_else(|| {
            DEFAULT_BLOCK_SIZES
                .iter()
                .copied()
                .filter(|&block_size| block_size <= self.dimension)
                .collect()
        })
    }
}

/// A validated benchmark: seeded inputs, their reference product and the sweep to run.
#[derive(Debug)]
pub struct Bench {
    store: MatrixStore,
    reference: Matrix,
    rng_seed: u64,
    block_sizes: Vec<usize>,
    workers: NonZero<usize>,
    strategies: Vec<Strategy>,
    commit_mode: CommitMode,
    k_blocking: KBlocking,
}

impl Bench {
    /// Validates the configuration, seeds the inputs and computes the reference product.
    ///
    /// Nothing is multiplied concurrently until [`run()`][Self::run] is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimension`], [`Error::InvalidBlockSize`],
    /// [`Error::InvalidWorkerCount`] or [`Error::InvalidValueRange`] if the corresponding
    /// setting is out of range. An empty list of block sizes is an invalid block size.
    /// Returns [`Error::ProductOverflow`] if the value range is wide enough for a cell of the
    /// product to overflow `i64`.
    pub fn new(config: BenchConfig) -> Result<Self> {
        let dimension = NonZero::new(config.dimension).ok_or(Error::InvalidDimension)?;

        let block_sizes = config.resolve_block_sizes();
        if block_sizes.is_empty() || block_sizes.contains(&0) {
            return Err(Error::InvalidBlockSize);
        }

        let workers = match config.workers {
            Some(workers) => NonZero::new(workers).ok_or(Error::InvalidWorkerCount)?,
            None => hardware_concurrency(),
        };

        let rng_seed = config.rng_seed.unwrap_or_else(rand::random);
        let store = MatrixStore::seed(dimension, config.value_range.clone(), rng_seed)?;

        info!(
            dimension = dimension.get(),
            min = config.value_range.start(),
            max = config.value_range.end(),
            rng_seed,
            "seeded input matrices"
        );

        let reference = compute_reference(store.a(), store.b())?;
        debug!(checksum = reference.checksum(), "computed reference product");

        Ok(Self {
            store,
            reference,
            rng_seed,
            block_sizes,
            workers,
            strategies: config.strategies,
            commit_mode: config.commit_mode,
            k_blocking: config.k_blocking,
        })
    }

    /// The seeded input matrices and the output of the most recent trial.
    #[must_use]
    pub fn store(&self) -> &MatrixStore {
        &self.store
    }

    /// The single-threaded reference product.
    #[must_use]
    pub fn reference(&self) -> &Matrix {
        &self.reference
    }

    /// The seed the inputs were generated from. Passing it back in reproduces the inputs.
    #[must_use]
    pub fn rng_seed(&self) -> u64 {
        self.rng_seed
    }

    /// Runs one trial per (strategy, block size) pair, strategies in the outer loop.
    ///
    /// A trial whose product differs from the reference, or whose workers panicked, is
    /// reported as invalid and the sweep continues.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerSpawn`] if worker threads cannot be started.
    pub fn run(&self) -> Result<SweepReport> {
        let mut trials = Vec::with_capacity(
            self.strategies
                .len()
                .saturating_mul(self.block_sizes.len()),
        );

        for &strategy in &self.strategies {
            for &block_size in &self.block_sizes {
                trials.push(self.run_trial(strategy, block_size)?);
            }
        }

        Ok(SweepReport {
            dimension: self.store.dimension(),
            rng_seed: self.rng_seed,
            trials,
        })
    }

    fn run_trial(&self, strategy: Strategy, block_size: usize) -> Result<TrialReport> {
        let distributor = Distributor::new(strategy, self.workers);
        let job = MultiplyJob::new(&self.store, block_size)
            .commit_mode(self.commit_mode)
            .k_blocking(self.k_blocking);

        let started = Instant::now();
        let outcome = job.run(&distributor);
        let elapsed = started.elapsed();

        self.finish_trial(strategy, block_size, outcome, elapsed)
    }

    /// Turns the outcome of a multiplication into a trial report, checking the output against
    /// the reference. Panicked workers make the trial invalid. Any other error ends the sweep.
    fn finish_trial(
        &self,
        strategy: Strategy,
        block_size: usize,
        outcome: Result<DistributionReport>,
        elapsed: Duration,
    ) -> Result<TrialReport> {
        let workers = match outcome {
            Ok(report) => report.workers(),
            Err(Error::WorkerPanicked { panicked, workers }) => {
                warn!(
                    %strategy,
                    block_size,
                    panicked,
                    workers,
                    "workers panicked, output is incomplete"
                );
                workers
            }
            Err(e) => {
                error!(
                    %strategy,
                    block_size,
                    error = %e,
                    "trial failed, abandoning the remaining trials"
                );
                return Err(e);
            }
        };

        let valid = self.check_output(strategy, block_size);

        let trial = TrialReport {
            strategy,
            block_size,
            block_count: block_count(self.store.dimension(), block_size),
            workers,
            elapsed,
            valid,
        };

        info!(
            %strategy,
            block_size,
            blocks = trial.block_count,
            workers,
            elapsed_micros = trial.elapsed_micros(),
            valid,
            "trial complete"
        );

        Ok(trial)
    }

    fn check_output(&self, strategy: Strategy, block_size: usize) -> bool {
        let output = self.store.output();

        if verify(&output, &self.reference) {
            return true;
        }

        if let Some(mismatch) = first_mismatch(&output, &self.reference) {
            warn!(
                %strategy,
                block_size,
                row = mismatch.row(),
                col = mismatch.col(),
                actual = mismatch.actual(),
                expected = mismatch.expected(),
                "product differs from reference"
            );
        }

        false
    }
}

/// Measurements of one (strategy, block size) trial.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TrialReport {
    strategy: Strategy,
    block_size: usize,
    block_count: usize,
    workers: usize,
    elapsed: Duration,
    valid: bool,
}

impl TrialReport {
    /// Strategy used to distribute blocks.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Side length of the blocks.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks the output was partitioned into.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Number of worker threads that took part.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Wall-clock time of the concurrent multiplication, excluding verification.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Wall-clock time in whole microseconds.
    #[must_use]
    pub fn elapsed_micros(&self) -> u128 {
        self.elapsed.as_micros()
    }

    /// Whether the product matched the reference.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.valid
    }
}

/// Results of a full sweep. `Display` renders one table per strategy.
#[derive(Clone, Debug)]
pub struct SweepReport {
    dimension: usize,
    rng_seed: u64,
    trials: Vec<TrialReport>,
}

impl SweepReport {
    /// Dimension of the multiplied matrices.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Seed the inputs were generated from.
    #[must_use]
    pub fn rng_seed(&self) -> u64 {
        self.rng_seed
    }

    /// Every trial, in the order it ran.
    #[must_use]
    pub fn trials(&self) -> &[TrialReport] {
        &self.trials
    }

    /// Whether every trial produced the reference product.
    #[must_use]
    pub fn all_valid(&self) -> bool {
        self.trials.iter().all(TrialReport::valid)
    }
}

impl Display for SweepReport {
    #[cfg_attr(test, mutants::skip)] // Layout is checked by eye; content is tested via trials().
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{dimension}x{dimension} matrices, seed {seed}",
            dimension = self.dimension,
            seed = self.rng_seed
        )?;

        let mut current_strategy = None;

        for trial in &self.trials {
            if current_strategy != Some(trial.strategy) {
                current_strategy = Some(trial.strategy);

                writeln!(f)?;
                writeln!(f, "Strategy: {}", trial.strategy)?;
                writeln!(
                    f,
                    "{:<15}{:<20}{:<20}{:<20}Is Valid",
                    "Block size", "Number of blocks", "Number of threads", "Time (microsec)"
                )?;
            }

            let validity = if trial.valid { "[OK]" } else { "[ERROR]" };

            writeln!(
                f,
                "{:<15}{:<20}{:<20}{:<20}{validity}",
                trial.block_size,
                trial.block_count,
                trial.workers,
                trial.elapsed_micros()
            )?;
        }

        Ok(())
    }
}
