//! Pre/post-process hooks attached to activities.
//!
//! Plug-ins run inside the activity's process between its `START` and `STOP`
//! records, in ascending priority order.  Each hook may await kernel events
//! and write records through [`Activity::log_state`].

use lsim_core::{LsimError, LsimResult, SimTime};
use lsim_engine::LocalBoxFuture;

use crate::activity::Activity;
use crate::logbook::{ActivityLabel, ActivityState};

/// A hook around an activity's body.
///
/// Both hooks default to doing nothing.  A hook error is reported as
/// `LsimError::Plugin` carrying [`name`](Plugin::name).
pub trait Plugin {
    fn name(&self) -> &str;

    /// Runs after `START`, before the body.
    fn pre_process<'a>(
        &'a self,
        _activity:   &'a Activity,
        _start_time: SimTime,
    ) -> LocalBoxFuture<'a, LsimResult<()>> {
        Box::pin(std::future::ready(Ok(())))
    }

    /// Runs after the body, before `STOP`.
    fn post_process<'a>(
        &'a self,
        _activity:   &'a Activity,
        _start_time: SimTime,
    ) -> LocalBoxFuture<'a, LsimResult<()>> {
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Extends an activity by a percentage of the time it took so far.
#[derive(Clone, Debug)]
pub struct DelayPlugin {
    percentage: f64,
}

impl DelayPlugin {
    pub fn new(percentage: f64) -> LsimResult<Self> {
        if !percentage.is_finite() || percentage < 0.0 {
            return Err(LsimError::Config(format!(
                "delay percentage must be finite and non-negative, got {percentage}"
            )));
        }
        Ok(Self { percentage })
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }
}

impl Plugin for DelayPlugin {
    fn name(&self) -> &str {
        "delay"
    }

    fn post_process<'a>(
        &'a self,
        activity:   &'a Activity,
        start_time: SimTime,
    ) -> LocalBoxFuture<'a, LsimResult<()>> {
        Box::pin(async move {
            let env = activity.env();
            let delay = self.percentage / 100.0 * (env.now() - start_time);
            if delay <= 0.0 {
                return Ok(());
            }
            let label = Some(ActivityLabel::plugin(self.name()));
            activity.log_state(ActivityState::WaitStart, label.clone());
            env.timeout(delay)?.await;
            activity.log_state(ActivityState::WaitStop, label);
            Ok(())
        })
    }
}
