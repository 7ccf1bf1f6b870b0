//! Composition operators: derive new cells from an upstream cell.
//!
//! Each operator wires a small named handler onto the receiver. The handler
//! owns the derived cell (never the other way around), so dropping a derived
//! cell early cannot create a cycle: the upstream completes into a cell
//! nobody observes and the handler is released with it.
//!
//! All operators propagate failure; the cause is cloned, which shares the
//! handled latch, so a cause already reported upstream is not reported again
//! by the derived cell.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::deferred::cell::Deferred;
use crate::deferred::handler::CompletionHandler;
use crate::error::{Fault, FaultKind, Result};

impl<V: Send + Sync + 'static> Deferred<V> {
    /// Derives a cell holding the mapped value.
    ///
    /// The derived cell fails if this cell fails or if the mapper panics.
    #[must_use]
    pub fn transform<X, F>(&self, mapper: F) -> Deferred<X>
    where
        X: Send + Sync + 'static,
        F: FnOnce(&V) -> X + Send + 'static,
    {
        let derived = Deferred::with_sink(self.sink_handle());
        self.on_complete(Transform {
            mapper,
            derived: derived.clone(),
        });
        derived
    }

    /// Derives a cell from a mapper that itself yields a deferred value.
    ///
    /// The cell returned by the mapper is chained into the derived cell, so
    /// failures propagate across both steps. A panicking mapper fails the
    /// derived cell directly.
    #[must_use]
    pub fn flat_transform<X, F>(&self, mapper: F) -> Deferred<X>
    where
        X: Clone + Send + Sync + 'static,
        F: FnOnce(&V) -> Deferred<X> + Send + 'static,
    {
        let derived = Deferred::with_sink(self.sink_handle());
        self.on_complete(FlatTransform {
            mapper,
            derived: derived.clone(),
        });
        derived
    }

    /// Wires both the success and the failure path of this cell into
    /// `target`.
    pub fn chain(&self, target: &Deferred<V>)
    where
        V: Clone,
    {
        self.on_complete(Chain {
            target: target.clone(),
        });
    }

    /// Like [`chain`], transforming the success value with `mapper` on the
    /// way. A panicking mapper fails the target.
    ///
    /// [`chain`]: Deferred::chain
    pub fn map_chain<X, F>(&self, target: &Deferred<X>, mapper: F)
    where
        X: Send + Sync + 'static,
        F: FnOnce(&V) -> X + Send + 'static,
    {
        self.on_complete(MapChain {
            mapper,
            target: target.clone(),
        });
    }

    /// Forwards failures to `target` while handing successful values to
    /// `on_value` for side effects; an error from `on_value` fails the
    /// target. Returns the receiver for fluent chaining.
    pub fn fail_chain<X, F>(&self, target: &Deferred<X>, on_value: F) -> &Self
    where
        X: Send + Sync + 'static,
        F: FnOnce(&V) -> Result<()> + Send + 'static,
    {
        self.on_complete(FailChain {
            on_value,
            target: target.clone(),
        })
    }
}

struct Transform<X, F> {
    mapper: F,
    derived: Deferred<X>,
}

impl<V, X, F> CompletionHandler<V> for Transform<X, F>
where
    V: Send + Sync + 'static,
    X: Send + Sync + 'static,
    F: FnOnce(&V) -> X + Send,
{
    fn on_success(self: Box<Self>, value: &V) -> Result<()> {
        let Self { mapper, derived } = *self;
        match catch_unwind(AssertUnwindSafe(move || mapper(value))) {
            Ok(mapped) => derived.succeed(mapped),
            Err(payload) => {
                derived.fail(Fault::from_panic(FaultKind::MapperFault, payload.as_ref()));
            }
        }
        Ok(())
    }

    fn on_failure(self: Box<Self>, fault: &Fault) -> Result<()> {
        self.derived.fail(fault.clone());
        Ok(())
    }
}

struct FlatTransform<X, F> {
    mapper: F,
    derived: Deferred<X>,
}

impl<V, X, F> CompletionHandler<V> for FlatTransform<X, F>
where
    V: Send + Sync + 'static,
    X: Clone + Send + Sync + 'static,
    F: FnOnce(&V) -> Deferred<X> + Send,
{
    fn on_success(self: Box<Self>, value: &V) -> Result<()> {
        let Self { mapper, derived } = *self;
        match catch_unwind(AssertUnwindSafe(move || mapper(value))) {
            Ok(inner) => inner.chain(&derived),
            Err(payload) => {
                derived.fail(Fault::from_panic(FaultKind::MapperFault, payload.as_ref()));
            }
        }
        Ok(())
    }

    fn on_failure(self: Box<Self>, fault: &Fault) -> Result<()> {
        self.derived.fail(fault.clone());
        Ok(())
    }
}

struct Chain<V> {
    target: Deferred<V>,
}

impl<V> CompletionHandler<V> for Chain<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn on_success(self: Box<Self>, value: &V) -> Result<()> {
        self.target.succeed(value.clone());
        Ok(())
    }

    fn on_failure(self: Box<Self>, fault: &Fault) -> Result<()> {
        self.target.fail(fault.clone());
        Ok(())
    }
}

struct MapChain<X, F> {
    mapper: F,
    target: Deferred<X>,
}

impl<V, X, F> CompletionHandler<V> for MapChain<X, F>
where
    V: Send + Sync + 'static,
    X: Send + Sync + 'static,
    F: FnOnce(&V) -> X + Send,
{
    fn on_success(self: Box<Self>, value: &V) -> Result<()> {
        let Self { mapper, target } = *self;
        match catch_unwind(AssertUnwindSafe(move || mapper(value))) {
            Ok(mapped) => target.succeed(mapped),
            Err(payload) => {
                target.fail(Fault::from_panic(FaultKind::MapperFault, payload.as_ref()));
            }
        }
        Ok(())
    }

    fn on_failure(self: Box<Self>, fault: &Fault) -> Result<()> {
        self.target.fail(fault.clone());
        Ok(())
    }
}

struct FailChain<X, F> {
    on_value: F,
    target: Deferred<X>,
}

impl<V, X, F> CompletionHandler<V> for FailChain<X, F>
where
    V: Send + Sync + 'static,
    X: Send + Sync + 'static,
    F: FnOnce(&V) -> Result<()> + Send,
{
    fn on_success(self: Box<Self>, value: &V) -> Result<()> {
        let Self { on_value, target } = *self;
        match catch_unwind(AssertUnwindSafe(move || on_value(value))) {
            Ok(Ok(())) => {}
            Ok(Err(fault)) => target.fail(fault),
            Err(payload) => {
                target.fail(Fault::from_panic(FaultKind::HandlerFault, payload.as_ref()));
            }
        }
        Ok(())
    }

    fn on_failure(self: Box<Self>, fault: &Fault) -> Result<()> {
        self.target.fail(fault.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CollectingSink, FailureSink};
    use crate::test_utils::init_test_logging;
    use std::sync::Arc;

    fn quiet_cell<V: Send + Sync + 'static>() -> (Deferred<V>, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let cell = Deferred::with_sink(Arc::clone(&sink) as Arc<dyn FailureSink>);
        (cell, sink)
    }

    #[test]
    fn transform_maps_the_value() {
        init_test_logging();
        let cell: Deferred<i32> = Deferred::new();
        let doubled = cell.transform(|v| v * 2);

        cell.succeed(21);
        assert_eq!(doubled.peek(), Some(42));
        assert!(cell.is_successful());
    }

    #[test]
    fn transform_on_completed_cell_fires_immediately() {
        init_test_logging();
        let cell = Deferred::succeeded(10);
        let shifted = cell.transform(|v| v + 1);
        assert_eq!(shifted.peek(), Some(11));
    }

    #[test]
    fn transform_propagates_failure_verbatim() {
        init_test_logging();
        let (cell, _sink) = quiet_cell::<i32>();
        let derived = cell.transform(|v| v * 2);
        derived.do_not_log_errors();

        cell.fail(Fault::user("boom"));
        assert!(derived.is_failed());
        assert_eq!(derived.peek(), None);
        assert_eq!(derived.failure().expect("no failure").message(), "boom");
    }

    #[test]
    fn panicking_mapper_fails_the_derived_cell_only() {
        init_test_logging();
        let (cell, _sink) = quiet_cell::<i32>();
        let derived: Deferred<i32> = cell.transform(|_| panic!("mapper exploded"));
        derived.do_not_log_errors();

        cell.succeed(5);
        assert!(cell.is_successful());
        assert_eq!(cell.peek(), Some(5));
        let fault = derived.failure().expect("derived should fail");
        assert_eq!(fault.kind(), FaultKind::MapperFault);
        assert_eq!(fault.message(), "mapper exploded");
    }

    #[test]
    fn flat_transform_chains_the_inner_cell() {
        init_test_logging();
        let cell: Deferred<i32> = Deferred::new();
        let derived = cell.flat_transform(|v| Deferred::succeeded(v.to_string()));

        cell.succeed(7);
        assert_eq!(derived.peek(), Some("7".to_string()));
    }

    #[test]
    fn flat_transform_with_pending_inner_cell() {
        init_test_logging();
        let cell: Deferred<i32> = Deferred::new();
        let inner: Deferred<i32> = Deferred::new();
        let inner_for_mapper = inner.clone();
        let derived = cell.flat_transform(move |_| inner_for_mapper.clone());

        cell.succeed(1);
        assert!(!derived.is_completed());

        inner.succeed(99);
        assert_eq!(derived.peek(), Some(99));
    }

    #[test]
    fn flat_transform_propagates_upstream_failure() {
        init_test_logging();
        let (cell, _sink) = quiet_cell::<i32>();
        let derived = cell.flat_transform(|v| Deferred::succeeded(*v));
        derived.do_not_log_errors();

        cell.fail(Fault::user("upstream"));
        assert_eq!(derived.failure().expect("no failure").message(), "upstream");
    }

    #[test]
    fn flat_transform_propagates_inner_failure() {
        init_test_logging();
        let (cell, _sink) = quiet_cell::<i32>();
        let derived: Deferred<i32> =
            cell.flat_transform(|_| Deferred::failed(Fault::user("inner")));
        derived.do_not_log_errors();

        cell.succeed(1);
        assert_eq!(derived.failure().expect("no failure").message(), "inner");
    }

    #[test]
    fn chain_forwards_both_paths() {
        init_test_logging();
        let cell: Deferred<i32> = Deferred::new();
        let target: Deferred<i32> = Deferred::new();
        cell.chain(&target);
        cell.succeed(11);
        assert_eq!(target.peek(), Some(11));

        let (failing, _sink) = quiet_cell::<i32>();
        let failed_target: Deferred<i32> = Deferred::new();
        failed_target.do_not_log_errors();
        failing.chain(&failed_target);
        failing.fail(Fault::user("boom"));
        assert!(failed_target.is_failed());
    }

    #[test]
    fn map_chain_transforms_into_the_target() {
        init_test_logging();
        let cell: Deferred<i32> = Deferred::new();
        let target: Deferred<String> = Deferred::new();
        cell.map_chain(&target, |v| format!("value={v}"));

        cell.succeed(8);
        assert_eq!(target.peek(), Some("value=8".to_string()));
    }

    #[test]
    fn map_chain_mapper_panic_fails_the_target() {
        init_test_logging();
        let cell: Deferred<i32> = Deferred::new();
        let (target, _sink) = quiet_cell::<String>();
        target.do_not_log_errors();
        cell.map_chain(&target, |_| -> String { panic!("mapper exploded") });

        cell.succeed(8);
        assert_eq!(
            target.failure().expect("no failure").kind(),
            FaultKind::MapperFault
        );
    }

    #[test]
    fn fail_chain_feeds_values_and_forwards_failures() {
        init_test_logging();
        let cell: Deferred<i32> = Deferred::new();
        let target: Deferred<String> = Deferred::new();
        target.do_not_log_errors();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&seen);
        cell.fail_chain(&target, move |v| {
            *slot.lock() = Some(*v);
            Ok(())
        });

        cell.succeed(13);
        assert_eq!(*seen.lock(), Some(13));
        // Success is consumed by the callback, not forwarded.
        assert!(!target.is_completed());
    }

    #[test]
    fn fail_chain_error_fails_the_target() {
        init_test_logging();
        let cell: Deferred<i32> = Deferred::new();
        let target: Deferred<String> = Deferred::new();
        target.do_not_log_errors();
        cell.fail_chain(&target, |_| Err(Fault::user("side effect failed")));

        cell.succeed(13);
        assert_eq!(
            target.failure().expect("no failure").message(),
            "side effect failed"
        );
    }

    #[test]
    fn fail_chain_forwards_upstream_failure() {
        init_test_logging();
        let (cell, _sink) = quiet_cell::<i32>();
        let target: Deferred<String> = Deferred::new();
        target.do_not_log_errors();
        cell.fail_chain(&target, |_| Ok(()));

        cell.fail(Fault::user("upstream"));
        assert_eq!(target.failure().expect("no failure").message(), "upstream");
    }
}
