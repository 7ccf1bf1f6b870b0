//! Failure causes for deferred computations.
//!
//! A [`Fault`] is the cause carried by a failed deferred value. Faults are
//! cheap to clone (the payload is shared) and carry a *handled* latch that is
//! visible through every clone: once a fault has been reported to the failure
//! sink, the same cause flowing through chained cells is not reported again.

use core::fmt;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The kind of failure, by origin rather than by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Business failure supplied by a producer via `fail`.
    User,
    /// A completion handler faulted (returned an error or panicked) during
    /// dispatch.
    HandlerFault,
    /// A transformation mapper faulted while deriving a new value.
    MapperFault,
    /// A producer attempted to complete an already-completed cell.
    DoubleCompletion,
    /// Internal invariant violation (bug).
    Internal,
}

#[derive(Debug)]
struct FaultInner {
    kind: FaultKind,
    message: String,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    handled: AtomicBool,
}

impl FaultInner {
    /// Copy of the shared payload, preserving the current handled state.
    fn detached_copy(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            context: self.context.clone(),
            source: self.source.clone(),
            handled: AtomicBool::new(self.handled.load(Ordering::Acquire)),
        }
    }
}

/// The failure cause of a deferred value.
///
/// Clones share the payload and the handled latch, so marking one clone as
/// handled marks them all.
#[derive(Debug, Clone)]
pub struct Fault {
    inner: Arc<FaultInner>,
}

impl Fault {
    /// Creates a new fault with the given kind and message.
    #[must_use]
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(FaultInner {
                kind,
                message: message.into(),
                context: None,
                source: None,
                handled: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a business failure, the common case for `fail`.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(FaultKind::User, message)
    }

    /// Creates a fault from a caught panic payload.
    #[must_use]
    pub fn from_panic(kind: FaultKind, payload: &(dyn Any + Send)) -> Self {
        Self::new(kind, panic_message(payload))
    }

    /// Returns the fault kind.
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        self.inner.kind
    }

    /// Returns the fault message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Adds context text to the fault.
    #[must_use]
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let mut inner = Arc::try_unwrap(self.inner)
            .unwrap_or_else(|shared| shared.detached_copy());
        inner.context = Some(context.into());
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let mut inner = Arc::try_unwrap(self.inner)
            .unwrap_or_else(|shared| shared.detached_copy());
        inner.source = Some(Arc::new(source));
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns true once this fault has been reported to a failure sink.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.inner.handled.load(Ordering::Acquire)
    }

    /// Marks this fault as handled.
    ///
    /// Returns `true` if this call performed the marking, `false` if the
    /// fault was already handled. Sinks use the return value to report each
    /// cause at most once.
    pub fn mark_handled(&self) -> bool {
        !self.inner.handled.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.inner.kind, self.inner.message)?;
        if let Some(context) = &self.inner.context {
            write!(f, " ({context})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extracts a printable message from a panic payload.
#[must_use]
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// A specialized Result type for completion handlers and chassis operations.
pub type Result<T> = core::result::Result<T, Fault>;
