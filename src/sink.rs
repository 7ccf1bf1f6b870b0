//! The failure sink: the boundary hook for unhandled failures.
//!
//! A deferred value that fails while nobody has registered a handler routes
//! its cause here, as do faults raised by completion handlers during
//! dispatch. The sink honors the fault's handled latch so that a single
//! cause flowing through a chain of cells is reported at most once.
//!
//! The process-scope sink defaults to [`TracingSink`] and can be replaced
//! via [`install`] (typically from `Setup::boot`). Individual cells may
//! carry their own sink, which is how tests assert on reporting behavior
//! without global state.

use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::error::Fault;

/// Receives unhandled failures and handler faults.
///
/// Implementations must be thread-safe; dispatch may report from whichever
/// thread completes a cell.
pub trait FailureSink: Send + Sync {
    /// Reports an unhandled failure.
    ///
    /// Implementations mark the fault handled and skip causes that are
    /// already handled, so a cause is reported at most once no matter how
    /// many cells it flows through.
    fn report(&self, fault: &Fault);

    /// Returns true if fine-grained (verbose) records are wanted.
    ///
    /// Used to avoid constructing diagnostic payloads when disabled.
    fn is_fine_enabled(&self) -> bool {
        false
    }

    /// Emits a fine-grained record for a failure that some consumer is
    /// expected to observe.
    fn fine(&self, fault: &Fault) {
        let _ = fault;
    }

    /// Swallows a benign condition without logging.
    fn ignore(&self, fault: &Fault) {
        let _ = fault;
    }
}

/// The default sink, routing reports to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    /// Creates a new tracing-backed sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FailureSink for TracingSink {
    fn report(&self, fault: &Fault) {
        if fault.mark_handled() {
            tracing::error!(kind = ?fault.kind(), %fault, "unhandled deferred failure");
        }
    }

    fn is_fine_enabled(&self) -> bool {
        tracing::enabled!(tracing::Level::DEBUG)
    }

    fn fine(&self, fault: &Fault) {
        if fault.mark_handled() {
            tracing::debug!(kind = ?fault.kind(), %fault, "deferred failure awaiting observer");
        }
    }

    fn ignore(&self, _fault: &Fault) {}
}

/// A sink that accumulates reports, for tests and embedders that want to
/// inspect failures programmatically.
#[derive(Debug, Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<Fault>>,
    fine_records: Mutex<Vec<Fault>>,
    fine_enabled: bool,
}

impl CollectingSink {
    /// Creates a collecting sink with the fine-grained path disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collecting sink that also records fine-grained entries.
    #[must_use]
    pub fn with_fine_enabled() -> Self {
        Self {
            fine_enabled: true,
            ..Self::default()
        }
    }

    /// Returns the reported faults, in arrival order.
    #[must_use]
    pub fn reports(&self) -> Vec<Fault> {
        self.reports.lock().clone()
    }

    /// Returns the number of reported faults.
    #[must_use]
    pub fn report_count(&self) -> usize {
        self.reports.lock().len()
    }

    /// Returns the fine-grained records, in arrival order.
    #[must_use]
    pub fn fine_records(&self) -> Vec<Fault> {
        self.fine_records.lock().clone()
    }
}

impl FailureSink for CollectingSink {
    fn report(&self, fault: &Fault) {
        if fault.mark_handled() {
            self.reports.lock().push(fault.clone());
        }
    }

    fn is_fine_enabled(&self) -> bool {
        self.fine_enabled
    }

    fn fine(&self, fault: &Fault) {
        if fault.mark_handled() {
            self.fine_records.lock().push(fault.clone());
        }
    }
}

static PROCESS_SINK: OnceLock<RwLock<Arc<dyn FailureSink>>> = OnceLock::new();

fn slot() -> &'static RwLock<Arc<dyn FailureSink>> {
    PROCESS_SINK.get_or_init(|| RwLock::new(Arc::new(TracingSink::new())))
}

/// Installs the process-scope failure sink.
///
/// Cells capture the process sink at construction, so installation should
/// happen during bootstrap, before deferred values are created.
pub fn install(sink: Arc<dyn FailureSink>) {
    *slot().write() = sink;
}

/// Returns the current process-scope failure sink.
#[must_use]
pub fn process_sink() -> Arc<dyn FailureSink> {
    Arc::clone(&slot().read())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_records_reports() {
        let sink = CollectingSink::new();
        let fault = Fault::user("boom");

        sink.report(&fault);
        assert_eq!(sink.report_count(), 1);
        assert_eq!(sink.reports()[0].message(), "boom");
        assert!(fault.is_handled());
    }

    #[test]
    fn handled_faults_are_not_reported_twice() {
        let sink = CollectingSink::new();
        let fault = Fault::user("boom");

        sink.report(&fault);
        sink.report(&fault.clone());
        assert_eq!(sink.report_count(), 1);
    }

    #[test]
    fn fine_records_respect_the_probe() {
        let quiet = CollectingSink::new();
        assert!(!quiet.is_fine_enabled());

        let verbose = CollectingSink::with_fine_enabled();
        assert!(verbose.is_fine_enabled());
        verbose.fine(&Fault::user("pending"));
        assert_eq!(verbose.fine_records().len(), 1);
    }

    #[test]
    fn process_sink_is_replaceable() {
        let collecting = Arc::new(CollectingSink::new());
        install(Arc::clone(&collecting) as Arc<dyn FailureSink>);

        process_sink().report(&Fault::user("routed"));
        // Other tests may race on the process sink, so look for our fault
        // rather than asserting an exact count.
        assert!(collecting.reports().iter().any(|f| f.message() == "routed"));

        install(Arc::new(TracingSink::new()));
    }
}
