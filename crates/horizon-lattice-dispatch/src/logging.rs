//! Logging facilities for Horizon Lattice dispatch.
//!
//! Everything in this crate is instrumented with the `tracing` crate. Nothing
//! is printed unless the application installs a subscriber:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("horizon_lattice_dispatch::queue=debug")
//!         .init();
//! }
//! ```
//!
//! Listener invocation itself is never logged per call; only structural
//! events (insert fallbacks, counter wrap-around, queue batches, automatic
//! removals) are reported, mostly at `trace` level.

/// Span names used throughout the dispatch crate.
pub mod span_names {
    /// Synchronous dispatch of one event.
    pub const DISPATCH: &str = "horizon_lattice::dispatch";
    /// Draining a batch of queued events.
    pub const PROCESS: &str = "horizon_lattice::process";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Crate-wide target.
    pub const CORE: &str = "horizon_lattice_dispatch";
    /// Callback list target.
    pub const CALLBACK_LIST: &str = "horizon_lattice_dispatch::callback_list";
    /// Event dispatcher target.
    pub const DISPATCHER: &str = "horizon_lattice_dispatch::dispatcher";
    /// Event queue target.
    pub const QUEUE: &str = "horizon_lattice_dispatch::queue";
    /// Listener remover target.
    pub const REMOVER: &str = "horizon_lattice_dispatch::remover";
}

/// A guard that keeps a performance span entered until dropped.
///
/// ```
/// use horizon_lattice_dispatch::logging::{span_names, PerfSpan};
///
/// {
///     let _span = PerfSpan::new(span_names::PROCESS);
///     // expensive work
/// }
/// ```
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create and enter a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::trace_span!(target: "horizon_lattice_dispatch::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

/// Trace-level log with the crate target.
#[macro_export]
macro_rules! dispatch_trace {
    (target: $target:expr, $($arg:tt)*) => {
        tracing::trace!(target: $target, $($arg)*)
    };
    ($($arg:tt)*) => {
        tracing::trace!(target: "horizon_lattice_dispatch", $($arg)*)
    };
}

/// Debug-level log with the crate target.
#[macro_export]
macro_rules! dispatch_debug {
    (target: $target:expr, $($arg:tt)*) => {
        tracing::debug!(target: $target, $($arg)*)
    };
    ($($arg:tt)*) => {
        tracing::debug!(target: "horizon_lattice_dispatch", $($arg)*)
    };
}

/// Warn-level log with the crate target.
#[macro_export]
macro_rules! dispatch_warn {
    (target: $target:expr, $($arg:tt)*) => {
        tracing::warn!(target: $target, $($arg)*)
    };
    ($($arg:tt)*) => {
        tracing::warn!(target: "horizon_lattice_dispatch", $($arg)*)
    };
}
