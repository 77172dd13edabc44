use lsim_core::LsimResult;
use lsim_engine::EventValue;

use super::{Activity, Composite};
use crate::logbook::{ActivityLabel, ActivityState};

/// Release every child at once; STOP records follow completion order.
pub(super) async fn body(activity: &Activity, composite: &Composite) -> LsimResult<()> {
    let env = activity.env();
    composite.start_event()?.succeed(EventValue::Empty)?;

    let mut pending = Vec::with_capacity(composite.sub_activities().len());
    for child in composite.sub_activities() {
        activity.log_state(ActivityState::Start, Some(ActivityLabel::subprocess(child.id())));
        pending.push((child.id(), child.done_event()?));
    }

    while !pending.is_empty() {
        env.any_of(pending.iter().map(|(_, done)| done.clone()).collect()).await;
        let (finished, rest): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|(_, done)| done.is_processed());
        for (id, _) in finished {
            activity.log_state(ActivityState::Stop, Some(ActivityLabel::subprocess(id)));
        }
        pending = rest;
    }
    Ok(())
}
