//! Chassis: a general-purpose application kernel.
//!
//! The chassis provides framework bootstrap, layered configuration,
//! logging wiring, and — as its core — the **deferred value**: a
//! thread-safe, single-assignment container for a value computed by
//! another task or thread.
//!
//! # Core Guarantees
//!
//! - **Single assignment**: a cell completes exactly once; a second
//!   completion is rejected and reported, never applied
//! - **Exactly-once dispatch**: every registered handler runs once, in
//!   registration order, on either the success or the failure branch
//! - **Late registration is synchronous**: a handler attached to a
//!   completed cell runs on the registering thread before registration
//!   returns
//! - **Fault isolation**: a faulting handler is routed to the failure
//!   sink and never prevents later handlers from running
//! - **No owned threads**: the cell is a rendezvous object for whatever
//!   executors the host embeds; only [`Deferred::wait`] blocks
//!
//! # Module Structure
//!
//! - [`deferred`]: the deferred value, composition operators, and the
//!   [`sequence`]/[`barrier`] aggregators
//! - [`error`]: the [`Fault`] failure cause and its handled latch
//! - [`sink`]: the [`FailureSink`] boundary hook for unhandled failures
//! - [`config`]: layered configuration (defaults, TOML file, `CHASSIS_*`
//!   environment overrides)
//! - [`setup`]: bootstrap — mode selection, logging wiring, sink
//!   installation
//! - [`test_utils`]: logging and assertion helpers shared by tests
//!
//! # Example
//!
//! ```
//! use chassis::{Deferred, Fault};
//!
//! let price: Deferred<u32> = Deferred::new();
//! let with_tax = price.transform(|cents| cents + cents / 5);
//! with_tax.on_success(|total| println!("pay {total} cents"));
//!
//! price.succeed(500);
//! assert_eq!(with_tax.peek(), Some(600));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod deferred;
pub mod error;
pub mod setup;
pub mod sink;
pub mod test_utils;

pub use config::{ChassisConfig, ConfigError, LogLevel};
pub use deferred::{barrier, sequence, CompletionHandler, Deferred};
pub use error::{Fault, FaultKind, Result};
pub use setup::{Chassis, Mode, Setup};
pub use sink::{CollectingSink, FailureSink, TracingSink};
