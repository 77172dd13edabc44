//! JSON snapshots of entities and activity trees.
//!
//! Entity snapshot shape (capabilities the entity lacks are omitted):
//!
//! ```text
//! {"id": UUID, "name": STR,
//!  "geometry":  {"x": LON, "y": LAT},
//!  "container": {SLOT: {"capacity": NUM, "level": NUM}, ...},
//!  "resource":  {"nr_resources": INT, "in_use": INT, "queued": INT}}
//! ```

use serde_json::{Map, Value, json};

use crate::activity::{Activity, ActivityKind};
use crate::entity::Entity;

impl Entity {
    pub fn snapshot(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".into(), json!(self.id().to_string()));
        out.insert("name".into(), json!(self.name()));
        if let Ok(point) = self.geometry() {
            out.insert("geometry".into(), json!({ "x": point.x, "y": point.y }));
        }
        if let Ok(container) = self.container() {
            let slots: Map<String, Value> = container
                .snapshot()
                .into_iter()
                .map(|(slot, s)| (slot, json!({ "capacity": s.capacity, "level": s.level })))
                .collect();
            out.insert("container".into(), Value::Object(slots));
        }
        if let Ok(resource) = self.resource() {
            out.insert(
                "resource".into(),
                json!({
                    "nr_resources": resource.capacity(),
                    "in_use": resource.count(),
                    "queued": resource.queue_len(),
                }),
            );
        }
        Value::Object(out)
    }
}

impl Activity {
    /// The activity and its sub-activities, recursively.
    pub fn snapshot(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".into(), json!(self.id().to_string()));
        out.insert("name".into(), json!(self.name()));
        out.insert("type".into(), json!(self.kind().type_name()));
        match self.kind() {
            ActivityKind::Basic { duration } => {
                out.insert("duration".into(), json!(duration));
            }
            ActivityKind::Move(spec) => {
                out.insert("mover".into(), json!(spec.mover.name()));
                out.insert("destination".into(), json!(spec.destination.name()));
            }
            ActivityKind::ShiftAmount(spec) => {
                out.insert("processor".into(), json!(spec.processor.name()));
                out.insert("origin".into(), json!(spec.origin.name()));
                out.insert("destination".into(), json!(spec.destination.name()));
                out.insert("amount".into(), json!(spec.amount));
            }
            ActivityKind::While(spec) => {
                out.insert("max_iterations".into(), json!(spec.max_iterations()));
            }
            ActivityKind::Sequential(_) | ActivityKind::Parallel(_) => {}
        }
        let sub: Vec<Value> = self.sub_activities().iter().map(|a| a.snapshot()).collect();
        if !sub.is_empty() {
            out.insert("sub_processes".into(), Value::Array(sub));
        }
        out.insert("done".into(), json!(self.is_done()));
        Value::Object(out)
    }
}
