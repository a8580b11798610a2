//! Configuration errors and worker failures as seen through the public API.

use block_matmul::{
    Bench, BenchConfig, Distributor, Error, Matrix, MatrixStore, MultiplyJob, Strategy,
    partition,
};
use new_zealand::nz;
use testing::ExecutionLedger;

#[test]
fn zero_dimension_is_rejected() {
    assert!(matches!(partition(0, 1), Err(Error::InvalidDimension)));
    assert!(matches!(
        Matrix::from_rows(Vec::new()),
        Err(Error::InvalidDimension)
    ));
}

#[test]
fn zero_block_size_is_rejected_before_any_work() {
    let store = MatrixStore::seed(nz!(4), 1..=20, 1).unwrap();
    let distributor = Distributor::new(Strategy::ThreadPerBlock, nz!(2));

    let result = MultiplyJob::new(&store, 0).run(&distributor);

    assert!(matches!(result, Err(Error::InvalidBlockSize)));
    assert!(store.output().as_slice().iter().all(|&value| value == 0));
}

#[test]
fn mismatched_inputs_are_rejected() {
    let result = MatrixStore::from_matrices(
        Matrix::from_rows(vec![vec![1]]).unwrap(),
        Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap(),
    );

    assert!(matches!(
        result,
        Err(Error::DimensionMismatch { left: 1, right: 2 })
    ));
}

#[test]
fn zero_workers_are_rejected_by_the_harness() {
    let result = Bench::new(BenchConfig::default().dimension(4).workers(0));

    assert!(matches!(result, Err(Error::InvalidWorkerCount)));
}

#[test]
fn panicking_block_is_reported_and_others_still_run() {
    testing::with_watchdog(|| {
        let blocks = partition(8, 2).unwrap();

        for strategy in Strategy::all() {
            let ledger = ExecutionLedger::new(blocks.len());

            let result = Distributor::new(strategy, nz!(4)).run(&blocks, |block| {
                ledger.record(block.index());

                assert!(block.index() != 7, "deliberate failure in block 7");
            });

            match result {
                Err(Error::WorkerPanicked { panicked, .. }) => assert_eq!(panicked, 1),
                other => panic!("{strategy}: expected a worker panic, got {other:?}"),
            }

            // No block was skipped or repeated, including the failed one.
            ledger.assert_each_executed_once();
        }
    });
}

#[test]
fn harness_sweep_with_every_strategy_is_valid() {
    testing::with_watchdog(|| {
        let config = BenchConfig::default()
            .dimension(20)
            .block_sizes(vec![1, 2, 4, 5, 8, 10, 20])
            .workers(4)
            .rng_seed(80);

        let report = Bench::new(config).unwrap().run().unwrap();

        assert_eq!(report.trials().len(), 28);
        assert!(report.all_valid());
        assert!(report.trials().iter().all(|trial| trial.valid()));
    });
}
