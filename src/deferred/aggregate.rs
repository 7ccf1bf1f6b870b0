//! Aggregation over many deferred values: sequences and barriers.
//!
//! Both primitives are folds over completion: each upstream gets a handler
//! that records its outcome into shared state, and the decisive transition
//! completes the aggregate cell. No scheduling is involved and upstream
//! cells are never cancelled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::deferred::cell::Deferred;
use crate::deferred::handler::CompletionHandler;
use crate::error::{Fault, FaultKind, Result};

/// Returns a cell that succeeds with the upstream values in input order
/// once every upstream succeeds, and fails with the earliest-observed
/// failure otherwise.
///
/// Remaining upstreams are not cancelled; their eventual completion is
/// ignored by the aggregate, though each upstream's own failure-logging
/// policy still applies. An empty slice yields an immediately-successful
/// cell holding an empty list.
#[must_use]
pub fn sequence<V>(cells: &[Deferred<V>]) -> Deferred<Vec<V>>
where
    V: Clone + Send + Sync + 'static,
{
    let aggregate = match cells.first() {
        Some(first) => Deferred::with_sink(first.sink_handle()),
        None => Deferred::new(),
    };
    if cells.is_empty() {
        aggregate.succeed(Vec::new());
        return aggregate;
    }

    let state = Arc::new(Mutex::new(SequenceState {
        slots: (0..cells.len()).map(|_| None).collect(),
        remaining: cells.len(),
        failed: false,
    }));
    for (index, cell) in cells.iter().enumerate() {
        cell.on_complete(SequenceMember {
            index,
            state: Arc::clone(&state),
            aggregate: aggregate.clone(),
        });
    }
    aggregate
}

/// Returns a cell that completes successfully (with no payload) once every
/// upstream has reached a terminal state, success or failure alike.
///
/// An empty slice yields an immediately-completed cell.
#[must_use]
pub fn barrier<V>(cells: &[Deferred<V>]) -> Deferred<()>
where
    V: Send + Sync + 'static,
{
    let aggregate = match cells.first() {
        Some(first) => Deferred::with_sink(first.sink_handle()),
        None => Deferred::new(),
    };
    if cells.is_empty() {
        aggregate.succeed(());
        return aggregate;
    }

    let remaining = Arc::new(AtomicUsize::new(cells.len()));
    for cell in cells {
        cell.on_complete(BarrierMember {
            remaining: Arc::clone(&remaining),
            aggregate: aggregate.clone(),
        });
    }
    aggregate
}

struct SequenceState<V> {
    slots: Vec<Option<V>>,
    remaining: usize,
    failed: bool,
}

struct SequenceMember<V> {
    index: usize,
    state: Arc<Mutex<SequenceState<V>>>,
    aggregate: Deferred<Vec<V>>,
}

impl<V> CompletionHandler<V> for SequenceMember<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn on_success(self: Box<Self>, value: &V) -> Result<()> {
        let values = {
            let mut state = self.state.lock();
            if state.failed {
                return Ok(());
            }
            state.slots[self.index] = Some(value.clone());
            state.remaining -= 1;
            if state.remaining > 0 {
                return Ok(());
            }
            let Some(values) = state
                .slots
                .iter_mut()
                .map(Option::take)
                .collect::<Option<Vec<V>>>()
            else {
                return Err(Fault::new(
                    FaultKind::Internal,
                    "sequence slot empty at completion",
                ));
            };
            values
        };
        // Complete outside the state lock; aggregate handlers may run
        // arbitrary code.
        self.aggregate.succeed(values);
        Ok(())
    }

    fn on_failure(self: Box<Self>, fault: &Fault) -> Result<()> {
        let decisive = {
            let mut state = self.state.lock();
            if state.failed {
                false
            } else {
                state.failed = true;
                true
            }
        };
        if decisive {
            self.aggregate.fail(fault.clone());
        } else {
            // A later failure lost the tie-break; deliberately dropped.
            self.aggregate.sink_handle().ignore(fault);
        }
        Ok(())
    }
}

struct BarrierMember {
    remaining: Arc<AtomicUsize>,
    aggregate: Deferred<()>,
}

impl BarrierMember {
    fn arrive(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.aggregate.succeed(());
        }
    }
}

impl<V> CompletionHandler<V> for BarrierMember {
    fn on_success(self: Box<Self>, _value: &V) -> Result<()> {
        self.arrive();
        Ok(())
    }

    fn on_failure(self: Box<Self>, _fault: &Fault) -> Result<()> {
        self.arrive();
        Ok(())
    }
}
