//! Loop observer trait for progress reporting and tracing.

use lsim_core::{EventId, SimTime};

/// Callbacks invoked by [`Environment::run_observed`][crate::Environment::run_observed].
///
/// All methods have default no-op implementations so implementors only need to
/// override what they care about.
///
/// # Example — step counter
///
/// ```rust,ignore
/// struct Counter(u64);
///
/// impl EnvObserver for Counter {
///     fn on_step(&mut self, _now: SimTime, _event: EventId) {
///         self.0 += 1;
///     }
/// }
/// ```
pub trait EnvObserver {
    /// Called after each processed event, with the clock at its time.
    fn on_step(&mut self, _now: SimTime, _event: EventId) {}

    /// Called once when the run returns normally.
    fn on_run_end(&mut self, _now: SimTime) {}
}

/// An [`EnvObserver`] that does nothing.
pub struct NoopObserver;

impl EnvObserver for NoopObserver {}
