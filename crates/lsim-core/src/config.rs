//! Simulation time and run configuration.
//!
//! # Time model
//!
//! Virtual time is a non-negative `f64` number of seconds.  Unlike a tick
//! counter it is continuous: a sailing leg of 1 234.5 s ends exactly at
//! `now + 1234.5`.  The event loop never decreases it.

use crate::{LsimError, LsimResult};

/// Virtual time in seconds since the epoch of the run.
pub type SimTime = f64;

/// Top-level simulation configuration.
///
/// Typically deserialised from a JSON/TOML file by the application (with the
/// `serde` feature) and handed to `Environment::with_config`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SimConfig {
    /// Virtual time at which the loop starts.  Default: 0.
    pub start_time: SimTime,

    /// Stop the run before processing any event at or after this time.
    /// `None` runs until the event queue drains.
    pub until: Option<SimTime>,

    /// Two objects are "at" the same place when their geodesic distance is
    /// at most this many metres.  Default: 100.
    pub location_tolerance_m: f64,

    /// `max_iterations` of a `While` activity that does not set one.
    /// Default: 1 000 000.
    pub default_max_iterations: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start_time:             0.0,
            until:                  None,
            location_tolerance_m:   100.0,
            default_max_iterations: 1_000_000,
        }
    }
}

impl SimConfig {
    /// Reject configurations the kernel cannot honour.
    pub fn validate(&self) -> LsimResult<()> {
        if !self.start_time.is_finite() || self.start_time < 0.0 {
            return Err(LsimError::Config(format!(
                "start_time must be a finite non-negative number, got {}",
                self.start_time
            )));
        }
        if let Some(until) = self.until {
            if until.is_nan() || until < self.start_time {
                return Err(LsimError::Config(format!(
                    "until ({until}) precedes start_time ({})",
                    self.start_time
                )));
            }
        }
        if !(self.location_tolerance_m >= 0.0) {
            return Err(LsimError::Config(format!(
                "location_tolerance_m must be non-negative, got {}",
                self.location_tolerance_m
            )));
        }
        if self.default_max_iterations == 0 {
            return Err(LsimError::Config("default_max_iterations must be at least 1".into()));
        }
        Ok(())
    }

    /// Break `t` into (day, hour, minute) components for human-readable logs.
    pub fn elapsed_dhm(t: SimTime) -> (u64, u32, u32) {
        let total_secs = t.max(0.0) as u64;
        let days = total_secs / 86_400;
        let hours = ((total_secs % 86_400) / 3_600) as u32;
        let minutes = ((total_secs % 3_600) / 60) as u32;
        (days, hours, minutes)
    }
}
