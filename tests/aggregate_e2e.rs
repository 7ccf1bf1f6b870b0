//! End-to-end scenarios for the aggregation primitives.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chassis::{barrier, sequence, CollectingSink, Deferred, Fault, FailureSink};
use common::init_test_logging;

fn quiet_cells(count: usize) -> (Vec<Deferred<i32>>, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let cells = (0..count)
        .map(|_| Deferred::with_sink(Arc::clone(&sink) as Arc<dyn FailureSink>))
        .collect();
    (cells, sink)
}

#[test]
fn barrier_completes_after_every_upstream_is_terminal() {
    init_test_logging();
    let (cells, _sink) = quiet_cells(3);
    let done = barrier(&cells);

    cells[0].succeed(1);
    cells[1].fail(Fault::user("e"));
    assert!(!done.is_completed());
    cells[2].succeed(3);

    assert!(done.is_successful());
}

#[test]
fn sequence_takes_the_first_failure_and_ignores_the_rest() {
    init_test_logging();
    let (cells, _sink) = quiet_cells(3);
    let all = sequence(&cells);
    all.do_not_log_errors();

    cells[1].fail(Fault::user("e"));
    cells[0].succeed(1);
    cells[2].succeed(3);

    assert!(all.is_failed());
    assert_eq!(all.failure().expect("no failure").message(), "e");
    assert_eq!(all.peek(), None);
}

#[test]
fn sequence_preserves_input_order_across_threads() {
    init_test_logging();
    let (cells, _sink) = quiet_cells(4);
    let all = sequence(&cells);

    let handles: Vec<_> = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let cell = cell.clone();
            thread::spawn(move || {
                // Stagger completions in reverse order.
                thread::sleep(Duration::from_millis(5 * (4 - i) as u64));
                cell.succeed(i as i32 * 10);
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("producer panicked");
    }

    assert!(all.wait(Duration::from_secs(5)));
    let values = all.peek();
    chassis::assert_with_log!(
        values == Some(vec![0, 10, 20, 30]),
        "sequence preserves input order",
        Some(vec![0, 10, 20, 30]),
        values
    );
}

#[test]
fn empty_aggregates_complete_immediately() {
    init_test_logging();
    assert_eq!(sequence::<i32>(&[]).peek(), Some(Vec::new()));
    assert!(barrier::<i32>(&[]).is_successful());
}

#[test]
fn aggregating_already_completed_cells() {
    init_test_logging();
    let cells = [Deferred::succeeded(1), Deferred::succeeded(2)];
    assert_eq!(sequence(&cells).peek(), Some(vec![1, 2]));
    assert!(barrier(&cells).is_successful());
}

#[test]
fn upstream_failures_are_observed_by_the_aggregate_not_logged() {
    init_test_logging();
    let (cells, sink) = quiet_cells(2);
    let all = sequence(&cells);
    all.on_failure(|_| {});

    cells[0].fail(Fault::user("quiet"));
    cells[1].succeed(2);

    // The aggregator registered handlers on each upstream and a consumer
    // watched the aggregate, so nothing reaches the sink.
    assert_eq!(sink.report_count(), 0);
}

#[test]
fn waiting_on_a_barrier_from_another_thread() {
    init_test_logging();
    let (cells, _sink) = quiet_cells(2);
    let done = barrier(&cells);

    let producers: Vec<_> = cells
        .iter()
        .map(|cell| {
            let cell = cell.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                cell.succeed(0);
            })
        })
        .collect();

    assert!(done.wait(Duration::from_secs(5)));
    for producer in producers {
        producer.join().expect("producer panicked");
    }
}
