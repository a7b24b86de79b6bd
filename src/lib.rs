#![doc = include_str!("../README.md")]

/// Catch boundaries that receive intercepted terminations
pub mod boundary;
/// Multi-iteration harness driver and the optional harness `main`
pub mod driver;
/// Resolving and calling a target's renamed `main`
pub mod entry;
/// Errors from setting up a run
mod error;
/// Exports for driving the shim from a C or C++ harness via FFI
pub mod exports;
/// Pre-include header that renames main and redirects exit
pub mod header;
/// Interposed termination primitives
mod hooks;
/// Runtime configuration options for the driver
pub mod options;
/// The value carried from an intercepted call to its boundary
mod termination;

pub use boundary::{catch_termination, set_unguarded_policy, UnguardedPolicy};
pub use entry::{Args, EntryPoint, Signature};
pub use error::{Error, Result};
pub use hooks::{noexit_exit, terminate};
pub use termination::{capture_backtrace, set_capture_backtrace, Outcome, Primitive, Termination};

#[cfg(feature = "hook_exit")]
pub use hooks::exit;
#[cfg(feature = "hook__exit")]
pub use hooks::_exit;
#[cfg(feature = "hook__Exit")]
pub use hooks::_Exit;
