//! Deferred values: the asynchronous completion primitive.
//!
//! A [`Deferred`] is a single-assignment cell for a value computed by
//! another task or thread. Producers complete it exactly once via
//! [`Deferred::succeed`] or [`Deferred::fail`]; consumers attach
//! [`CompletionHandler`]s, derive new cells through the composition
//! operators (`transform`, `flat_transform`, `chain`, `map_chain`,
//! `fail_chain`), park on [`Deferred::wait`], or aggregate many cells with
//! [`sequence`] and [`barrier`].
//!
//! # Guarantees
//!
//! - The outcome is assigned at most once; a second completion is rejected
//!   and reported to the failure sink.
//! - Every registered handler is invoked exactly once, in registration
//!   order, with either the value or the cause.
//! - A handler registered after completion runs synchronously on the
//!   registering thread before registration returns.
//! - A faulting handler never corrupts the cell and never prevents later
//!   handlers from running; its fault is routed to the failure sink.
//!
//! The cell owns no threads: completion runs handlers on the completing
//! thread, and the only blocking operation is [`Deferred::wait`].

mod aggregate;
mod cell;
mod combinator;
mod handler;

pub use aggregate::{barrier, sequence};
pub use cell::Deferred;
pub use handler::CompletionHandler;

pub(crate) use cell::DEFAULT_HANDLER_CAPACITY;
