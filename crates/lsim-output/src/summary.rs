//! Post-run summaries.

use std::rc::Rc;

use serde_json::Value;

use lsim_core::SimTime;
use lsim_model::{Entity, Logbook};

/// Snapshots of `entities`, in order.
pub fn snapshot_json(entities: &[Rc<Entity>]) -> Value {
    Value::Array(entities.iter().map(|e| e.snapshot()).collect())
}

/// Fraction of `[0, horizon]` covered by the unlabelled `START`/`STOP` spans
/// of `logbook`.  Overlapping spans count once.  0 for an empty horizon.
pub fn utilisation(logbook: &Logbook, horizon: SimTime) -> f64 {
    if !(horizon > 0.0) {
        return 0.0;
    }
    let mut spans: Vec<(SimTime, SimTime)> = logbook
        .spans()
        .into_iter()
        .filter(|s| s.label.is_none())
        .map(|s| (s.start.max(0.0), s.stop.min(horizon)))
        .filter(|(start, stop)| stop > start)
        .collect();
    spans.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut busy = 0.0;
    let mut open: Option<(SimTime, SimTime)> = None;
    for (start, stop) in spans {
        match open {
            Some((s, e)) if start <= e => open = Some((s, e.max(stop))),
            Some((s, e)) => {
                busy += e - s;
                open = Some((start, stop));
            }
            None => open = Some((start, stop)),
        }
    }
    if let Some((s, e)) = open {
        busy += e - s;
    }
    busy / horizon
}
