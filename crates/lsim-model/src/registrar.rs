//! Registering a forest of activities in dependency order.
//!
//! An activity can only be registered once everything its start
//! expressions depend on has a main process.  The dependencies are:
//!
//! | Edge                          | Reason                                     |
//! |-------------------------------|--------------------------------------------|
//! | composite → child             | the composite wires the child's start      |
//! | previous sibling → next       | in Sequential/While, `done(previous)`      |
//! | referenced activity → holder  | `ActivityDone` inside a `start_event`      |
//!
//! Ties are broken by the depth-first pre-order position, so registration
//! is deterministic.  Whatever is left once no activity is ready sits on a
//! cycle and is reported as `RegistrationCycle`.

use std::collections::BTreeSet;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use lsim_core::{ActivityId, LsimError, LsimResult};

use crate::activity::Activity;

/// Register `roots` and every activity beneath them.
///
/// Earlier registrations of the same activities are forgotten first, so
/// calling this again (as a `While` does per iteration) starts a new run.
pub fn register_processes(roots: &[Rc<Activity>]) -> LsimResult<()> {
    let all = closure(roots);

    let mut names: FxHashMap<&str, ActivityId> = FxHashMap::default();
    for activity in &all {
        if names.insert(activity.name(), activity.id()).is_some() {
            return Err(LsimError::DuplicateName(activity.name().to_owned()));
        }
    }
    for activity in &all {
        activity.registry().clear_main(activity.id());
    }

    let n = all.len();
    let index: FxHashMap<ActivityId, usize> =
        all.iter().enumerate().map(|(i, a)| (a.id(), i)).collect();

    // prerequisites[i]: activities that must be registered before `i`.
    let mut prerequisites: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, activity) in all.iter().enumerate() {
        let sub = activity.sub_activities();
        for child in sub {
            if let Some(&c) = index.get(&child.id()) {
                prerequisites[c].push(i);
            }
        }
        if activity.kind().runs_in_sequence() {
            for pair in sub.windows(2) {
                if let (Some(&prev), Some(&next)) =
                    (index.get(&pair[0].id()), index.get(&pair[1].id()))
                {
                    prerequisites[next].push(prev);
                }
            }
        }
        if let Some(expr) = activity.start_event() {
            for reference in expr.referenced_activities() {
                let ids = activity.registry().resolve(&reference);
                if ids.is_empty() {
                    return Err(LsimError::UnknownActivity(reference.to_string()));
                }
                prerequisites[i].extend(ids.iter().filter_map(|id| index.get(id).copied()));
            }
        }
    }

    let mut missing: Vec<usize> = prerequisites.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, before) in prerequisites.iter().enumerate() {
        for &p in before {
            dependents[p].push(i);
        }
    }

    debug!(activities = n, "registering activities");
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| missing[i] == 0).collect();
    let mut registered = 0;
    while let Some(i) = ready.pop_first() {
        all[i].register()?;
        registered += 1;
        for &d in &dependents[i] {
            missing[d] -= 1;
            if missing[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if registered < n {
        let stuck = (0..n)
            .filter(|&i| missing[i] > 0)
            .map(|i| all[i].name().to_owned())
            .collect();
        return Err(LsimError::RegistrationCycle(stuck));
    }
    Ok(())
}

/// Depth-first pre-order over `roots` and their descendants, each once.
fn closure(roots: &[Rc<Activity>]) -> Vec<Rc<Activity>> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    let mut stack: Vec<Rc<Activity>> = roots.iter().rev().cloned().collect();
    while let Some(activity) = stack.pop() {
        if !seen.insert(activity.id()) {
            continue;
        }
        stack.extend(activity.sub_activities().iter().rev().cloned());
        out.push(activity);
    }
    out
}
