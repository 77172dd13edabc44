use lsim_core::{LsimResult, SimTime};

use super::Activity;

/// Hold the process for a fixed time.
pub(super) async fn body(activity: &Activity, duration: SimTime) -> LsimResult<()> {
    activity.env().timeout(duration)?.await;
    Ok(())
}
