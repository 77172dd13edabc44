use lsim_core::LsimResult;
use lsim_engine::EventValue;

use super::{Activity, Composite};
use crate::logbook::{ActivityLabel, ActivityState};

pub(super) async fn body(activity: &Activity, composite: &Composite) -> LsimResult<()> {
    run_in_order(activity, composite).await
}

/// Release the first child and follow the children to completion, logging
/// a labelled START/STOP pair per child.
pub(super) async fn run_in_order(activity: &Activity, composite: &Composite) -> LsimResult<()> {
    composite.start_event()?.succeed(EventValue::Empty)?;
    for child in composite.sub_activities() {
        let label = ActivityLabel::subprocess(child.id());
        activity.log_state(ActivityState::Start, Some(label.clone()));
        child.done_event()?.await;
        activity.log_state(ActivityState::Stop, Some(label));
    }
    Ok(())
}
