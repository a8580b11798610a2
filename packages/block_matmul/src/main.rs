#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Command-line benchmark that times every work-distribution strategy over a sweep of block
//! sizes and checks each product against a single-threaded reference.
//!
//! Exits with a failure code if any trial produced a wrong product.

use std::io;
use std::num::NonZero;
use std::process::ExitCode;
use std::str::FromStr;

use argh::FromArgs;
use block_matmul::{
    Bench, BenchConfig, CommitMode, DEFAULT_DIMENSION, DEFAULT_VALUE_RANGE, Error, KBlocking,
    Strategy,
};
use tracing::error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Benchmarks block-partitioned concurrent matrix multiplication.
#[derive(FromArgs)]
struct Args {
    /// dimension N of the square input matrices (default 80)
    #[argh(option, short = 'n')]
    dimension: Option<usize>,

    /// comma-separated block sizes to sweep (default 1,2,4,5,8,10,20,40,80)
    #[argh(option)]
    block_sizes: Option<BlockSizeList>,

    /// number of worker threads (default: one per available processor)
    #[argh(option, short = 'w')]
    workers: Option<usize>,

    /// strategy to run: all, channel, channel:<capacity>, semaphore, cursor or
    /// thread-per-block (default all)
    #[argh(option, short = 's')]
    strategy: Option<StrategySelection>,

    /// smallest input value (default 1)
    #[argh(option)]
    min_value: Option<i64>,

    /// largest input value (default 20)
    #[argh(option)]
    max_value: Option<i64>,

    /// seed for the input matrices (default: random, printed in the report)
    #[argh(option)]
    seed: Option<u64>,

    /// width of the chunks the contraction dimension is walked in (default: the block size)
    #[argh(option)]
    k_width: Option<NonZero<usize>>,

    /// add computed blocks to the output instead of overwriting it
    #[argh(switch)]
    accumulate: bool,

    /// print the input matrices and their reference product
    #[argh(switch)]
    show_matrices: bool,

    /// log every block as it is executed and committed
    #[argh(switch, short = 'v')]
    verbose: bool,
}

#[derive(Debug)]
struct BlockSizeList(Vec<usize>);

impl FromStr for BlockSizeList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(|item| {
                item.trim()
                    .parse::<usize>()
                    .map_err(|e| format!("invalid block size '{item}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

#[derive(Debug)]
enum StrategySelection {
    All,
    One(Strategy),
}

impl FromStr for StrategySelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Self::All);
        }

        s.parse().map(Self::One)
    }
}

#[cfg_attr(test, mutants::skip)] // Process entry point.
fn main() -> ExitCode {
    let args: Args = argh::from_env();

    init_tracing(args.verbose);

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("at least one trial produced a product that differs from the reference");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "benchmark failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .init();
}

/// Runs the sweep and prints the report. Returns whether every trial was valid.
fn run(args: Args) -> Result<bool, Error> {
    let value_range = args.min_value.unwrap_or(*DEFAULT_VALUE_RANGE.start())
        ..=args.max_value.unwrap_or(*DEFAULT_VALUE_RANGE.end());

    let mut config = BenchConfig::default()
        .dimension(args.dimension.unwrap_or(DEFAULT_DIMENSION.get()))
        .value_range(value_range);

    if let Some(BlockSizeList(block_sizes)) = args.block_sizes {
        config = config.block_sizes(block_sizes);
    }

    if let Some(workers) = args.workers {
        config = config.workers(workers);
    }

    if let Some(StrategySelection::One(strategy)) = args.strategy {
        config = config.strategies(vec![strategy]);
    }

    if let Some(seed) = args.seed {
        config = config.rng_seed(seed);
    }

    if let Some(k_width) = args.k_width {
        config = config.k_blocking(KBlocking::Width(k_width));
    }

    if args.accumulate {
        config = config.commit_mode(CommitMode::Accumulate);
    }

    let bench = Bench::new(config)?;

    if args.show_matrices {
        println!("Matrix A:\n{}", bench.store().a());
        println!("Matrix B:\n{}", bench.store().b());
        println!("Reference product:\n{}", bench.reference());
    }

    let report = bench.run()?;
    println!("{report}");

    if args.show_matrices {
        println!("Product of the last trial:\n{}", bench.store().output());
    }

    Ok(report.all_valid())
}
