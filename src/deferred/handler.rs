//! Completion handlers: the callback pair attached to a deferred value.

use crate::error::{Fault, Result};

/// A callback pair notified exactly once when a deferred value completes.
///
/// Exactly one of the two methods is invoked, with either the success value
/// or the failure cause. Both consume the handler, which is what makes the
/// exactly-once contract structural: a dispatched handler no longer exists.
///
/// Returning an `Err` from either method routes the fault to the cell's
/// failure sink; it never alters the (already terminal) cell. Panics inside
/// a handler are caught by the dispatcher and routed the same way, so a
/// faulting handler cannot prevent later handlers from running.
///
/// # Threading
///
/// Handlers registered before completion run on whichever thread completes
/// the cell; handlers registered after completion run synchronously on the
/// registering thread. Implementations must not assume either.
pub trait CompletionHandler<V>: Send {
    /// Invoked when the cell succeeds.
    ///
    /// # Errors
    ///
    /// An error is routed to the cell's failure sink.
    fn on_success(self: Box<Self>, value: &V) -> Result<()>;

    /// Invoked when the cell fails.
    ///
    /// # Errors
    ///
    /// An error is routed to the cell's failure sink.
    fn on_failure(self: Box<Self>, fault: &Fault) -> Result<()>;
}
