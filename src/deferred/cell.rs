//! The deferred value cell: state machine, handler dispatch, blocking wait.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::deferred::handler::CompletionHandler;
use crate::error::{Fault, FaultKind, Result};
use crate::sink::{self, FailureSink};

/// Initial capacity of a cell's handler list.
///
/// Most cells see at most a completion handler and one derived wiring.
pub(crate) const DEFAULT_HANDLER_CAPACITY: usize = 2;

/// The terminal outcome of a cell.
enum Settled<V> {
    Succeeded(V),
    Failed(Fault),
}

struct Inner<V> {
    /// Written exactly once; the slot itself enforces single assignment.
    outcome: OnceLock<Settled<V>>,
    /// Pending handlers. `None` once captured by the completing thread;
    /// a registrant observing `None` invokes its handler synchronously.
    handlers: Mutex<Option<Vec<Box<dyn CompletionHandler<V>>>>>,
    /// When set, a transition to failed routes the cause to the sink.
    /// Cleared by handler registration and by `do_not_log_errors`.
    log_errors: AtomicBool,
    sink: Arc<dyn FailureSink>,
}

/// A value computed by another task or thread.
///
/// This is the rendezvous object for non-blocking communication between
/// threads: a value that is not immediately available is handed out as a
/// pending `Deferred`, which is later either fulfilled via [`succeed`] or
/// supplied with a cause via [`fail`]. Consumers attach
/// [`CompletionHandler`]s, derive new cells through the composition
/// operators, or park on [`wait`].
///
/// Handles are cheap to clone and share one cell. The cell completes
/// exactly once; a second completion never replaces the outcome and is
/// reported to the failure sink.
///
/// ```
/// use chassis::Deferred;
///
/// let cell = Deferred::new();
/// let doubled = cell.transform(|v: &i32| v * 2);
/// cell.succeed(21);
/// assert_eq!(doubled.peek(), Some(42));
/// ```
///
/// [`succeed`]: Deferred::succeed
/// [`fail`]: Deferred::fail
/// [`wait`]: Deferred::wait
pub struct Deferred<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for Deferred<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for Deferred<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.inner.outcome.get() {
            None => "Pending",
            Some(Settled::Succeeded(_)) => "Succeeded",
            Some(Settled::Failed(_)) => "Failed",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

impl<V: Send + Sync + 'static> Default for Deferred<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync + 'static> Deferred<V> {
    /// Creates a new pending cell bound to the process-scope failure sink.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(sink::process_sink(), DEFAULT_HANDLER_CAPACITY)
    }

    /// Creates a new pending cell bound to the given failure sink.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn FailureSink>) -> Self {
        Self::with_parts(sink, DEFAULT_HANDLER_CAPACITY)
    }

    /// Creates a new pending cell with room for `capacity` handlers.
    #[must_use]
    pub fn with_handler_capacity(capacity: usize) -> Self {
        Self::with_parts(sink::process_sink(), capacity)
    }

    fn with_parts(sink: Arc<dyn FailureSink>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                outcome: OnceLock::new(),
                handlers: Mutex::new(Some(Vec::with_capacity(capacity))),
                log_errors: AtomicBool::new(true),
                sink,
            }),
        }
    }

    /// Creates a cell that is already completed with `value`.
    #[must_use]
    pub fn succeeded(value: V) -> Self {
        let cell = Self::new();
        cell.succeed(value);
        cell
    }

    /// Creates a cell that is already failed with `fault`.
    ///
    /// The failure counts as observed by the creator and is not routed to
    /// the sink.
    #[must_use]
    pub fn failed(fault: Fault) -> Self {
        let cell = Self::new();
        cell.do_not_log_errors();
        cell.fail(fault);
        cell
    }

    /// Marks the cell as successfully completed with the given value.
    ///
    /// Registered handlers are invoked in registration order on the calling
    /// thread. Completing an already-completed cell never alters the
    /// outcome; the violation is reported to the failure sink.
    pub fn succeed(&self, value: V) {
        if self.complete(Settled::Succeeded(value)).is_err() {
            self.inner.sink.report(&Fault::new(
                FaultKind::DoubleCompletion,
                "attempted to complete an already-completed deferred value",
            ));
        }
    }

    /// Marks the cell as failed with the given cause.
    ///
    /// If no handler has been attached (and [`do_not_log_errors`] was not
    /// called), the cause is routed to the failure sink before dispatch.
    /// Failing an already-completed cell never alters the outcome; the
    /// violation is reported to the failure sink with the rejected cause
    /// attached.
    ///
    /// [`do_not_log_errors`]: Deferred::do_not_log_errors
    pub fn fail(&self, fault: Fault) {
        if let Err(Settled::Failed(rejected)) = self.complete(Settled::Failed(fault)) {
            self.inner.sink.report(
                &Fault::new(
                    FaultKind::DoubleCompletion,
                    "attempted to fail an already-completed deferred value",
                )
                .with_source(rejected),
            );
        }
    }

    fn complete(&self, settled: Settled<V>) -> core::result::Result<(), Settled<V>> {
        self.inner.outcome.set(settled)?;
        // The slot was just written and is never cleared.
        let settled = self
            .inner
            .outcome
            .get()
            .expect("outcome slot empty after set");

        if let Settled::Failed(fault) = settled {
            if self.inner.log_errors.load(Ordering::Acquire) {
                self.inner.sink.report(fault);
            } else if self.inner.sink.is_fine_enabled() && !fault.is_handled() {
                self.inner.sink.fine(fault);
            }
        }

        // Capture-and-clear: after this point registrants see the drained
        // marker and invoke synchronously instead of appending.
        let drained = self.inner.handlers.lock().take();
        if let Some(handlers) = drained {
            for handler in handlers {
                self.invoke(handler, settled);
            }
        }
        Ok(())
    }

    /// Runs one handler against the terminal outcome, isolating faults.
    fn invoke(&self, handler: Box<dyn CompletionHandler<V>>, settled: &Settled<V>) {
        let outcome = match settled {
            Settled::Succeeded(value) => {
                catch_unwind(AssertUnwindSafe(move || handler.on_success(value)))
            }
            Settled::Failed(fault) => {
                catch_unwind(AssertUnwindSafe(move || handler.on_failure(fault)))
            }
        };
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(fault)) => self.inner.sink.report(&fault),
            Err(payload) => self
                .inner
                .sink
                .report(&Fault::from_panic(FaultKind::HandlerFault, payload.as_ref())),
        }
    }

    /// Returns the value if the cell succeeded, without blocking.
    #[must_use]
    pub fn peek(&self) -> Option<V>
    where
        V: Clone,
    {
        match self.inner.outcome.get() {
            Some(Settled::Succeeded(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Returns the cause if the cell failed.
    #[must_use]
    pub fn failure(&self) -> Option<Fault> {
        match self.inner.outcome.get() {
            Some(Settled::Failed(fault)) => Some(fault.clone()),
            _ => None,
        }
    }

    /// Returns true once the cell has succeeded or failed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    /// Returns true if the cell completed successfully.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        matches!(self.inner.outcome.get(), Some(Settled::Succeeded(_)))
    }

    /// Returns true if the cell failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.inner.outcome.get(), Some(Settled::Failed(_)))
    }

    /// Registers a completion handler.
    ///
    /// While the cell is pending the handler is appended (clearing the
    /// error-logging latch: someone is now watching). On a completed cell
    /// the handler is invoked synchronously on the calling thread before
    /// this method returns — including when registration happens from
    /// inside another handler's dispatch.
    pub fn on_complete<H>(&self, handler: H) -> &Self
    where
        H: CompletionHandler<V> + 'static,
    {
        let boxed: Box<dyn CompletionHandler<V>> = Box::new(handler);
        let late = {
            let mut guard = self.inner.handlers.lock();
            match guard.as_mut() {
                Some(pending) => {
                    pending.push(boxed);
                    self.inner.log_errors.store(false, Ordering::Release);
                    None
                }
                None => Some(boxed),
            }
        };
        if let Some(handler) = late {
            let settled = self
                .inner
                .outcome
                .get()
                .expect("handler list drained before the outcome settled");
            self.invoke(handler, settled);
        }
        self
    }

    /// Registers a callback for the success path only.
    ///
    /// The callback only ever runs once the cell is terminal, so a panic
    /// inside it cannot alter the cell; the fault is routed to the sink.
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&V) + Send + 'static,
    {
        self.on_complete(OnSuccess { callback })
    }

    /// Registers a callback for the failure path only.
    ///
    /// Attaching a failure observer clears the error-logging latch even if
    /// the cell turns out to complete successfully.
    pub fn on_failure<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Fault) + Send + 'static,
    {
        self.inner.log_errors.store(false, Ordering::Release);
        self.on_complete(OnFailure { callback })
    }

    /// Disables failure logging even if no handler is ever attached.
    pub fn do_not_log_errors(&self) -> &Self {
        self.inner.log_errors.store(false, Ordering::Release);
        self
    }

    /// Registers a failure handler that routes the cause to the given sink.
    pub fn handle_errors(&self, sink: Arc<dyn FailureSink>) -> &Self {
        self.on_failure(move |fault| sink.report(fault))
    }

    /// Blocks the calling thread until the cell completes or `timeout`
    /// elapses, returning whether the cell is completed.
    ///
    /// The cause of a failed cell is never propagated here; inspect
    /// [`failure`] afterwards.
    ///
    /// [`failure`]: Deferred::failure
    #[allow(clippy::must_use_candidate)]
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_completed() {
            return true;
        }

        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        self.on_complete(SignalHandler {
            signal: Arc::clone(&signal),
        });

        let deadline = Instant::now().checked_add(timeout);
        let (flag, condvar) = &*signal;
        let mut completed = flag.lock();
        while !*completed {
            // The cell may have completed between registration and parking;
            // re-check before blocking so the wakeup cannot be lost.
            if self.is_completed() {
                break;
            }
            match deadline {
                Some(deadline) => {
                    if condvar.wait_until(&mut completed, deadline).timed_out() {
                        break;
                    }
                }
                None => condvar.wait(&mut completed),
            }
        }
        drop(completed);
        self.is_completed()
    }

    /// The sink this cell reports to; derived cells inherit it.
    pub(crate) fn sink_handle(&self) -> Arc<dyn FailureSink> {
        Arc::clone(&self.inner.sink)
    }
}

/// Success-only callback adapter. Panics are caught by the dispatcher and
/// routed to the sink; the cell is already terminal by then.
struct OnSuccess<F> {
    callback: F,
}

impl<V, F> CompletionHandler<V> for OnSuccess<F>
where
    F: FnOnce(&V) + Send,
{
    fn on_success(self: Box<Self>, value: &V) -> Result<()> {
        (self.callback)(value);
        Ok(())
    }

    fn on_failure(self: Box<Self>, _fault: &Fault) -> Result<()> {
        Ok(())
    }
}

/// Failure-only callback adapter. Panics are caught by the dispatcher.
struct OnFailure<F> {
    callback: F,
}

impl<V, F> CompletionHandler<V> for OnFailure<F>
where
    F: FnOnce(&Fault) + Send,
{
    fn on_success(self: Box<Self>, _value: &V) -> Result<()> {
        Ok(())
    }

    fn on_failure(self: Box<Self>, fault: &Fault) -> Result<()> {
        (self.callback)(fault);
        Ok(())
    }
}

/// Wakes a parked waiter on either completion branch.
struct SignalHandler {
    signal: Arc<(Mutex<bool>, Condvar)>,
}

impl SignalHandler {
    fn raise(&self) {
        let (flag, condvar) = &*self.signal;
        let mut completed = flag.lock();
        *completed = true;
        condvar.notify_all();
    }
}

impl<V> CompletionHandler<V> for SignalHandler {
    fn on_success(self: Box<Self>, _value: &V) -> Result<()> {
        self.raise();
        Ok(())
    }

    fn on_failure(self: Box<Self>, _fault: &Fault) -> Result<()> {
        self.raise();
        Ok(())
    }
}
