use tracing::info;

use lsim_core::LsimResult;

use super::{Activity, WhileSpec, sequential};
use crate::registrar::register_processes;

/// Run the body until the condition holds at the loop head.
///
/// The condition is evaluated once on entry, so a condition that fired
/// during an iteration still ends the loop.  Each head also asks whether it
/// holds now, which sees the latest run of re-registered activities without
/// creating events.  Every iteration after the first re-registers the body.
pub(super) async fn body(activity: &Activity, spec: &WhileSpec) -> LsimResult<()> {
    let env = activity.env();
    let registry = activity.registry();
    let entry_condition = spec.condition.evaluate(env, registry)?;

    let mut iteration = 0u64;
    loop {
        if entry_condition.is_triggered() || spec.condition.holds(env, registry)? {
            break;
        }
        if iteration >= spec.max_iterations {
            info!(
                activity = activity.name(),
                iterations = iteration,
                "max_iterations reached, stopping loop"
            );
            break;
        }
        if iteration > 0 {
            spec.body.arm_sequence(env);
            register_processes(spec.body.sub_activities())?;
        }
        sequential::run_in_order(activity, &spec.body).await?;
        iteration += 1;
    }
    Ok(())
}
