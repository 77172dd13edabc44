//! Plain data row types written by output backends.

use serde_json::{Map, Value};

use lsim_core::SimTime;
use lsim_model::LogRecord;

/// One v1 logbook record, flattened for tabular output.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    /// Name of the object whose logbook held the record.
    pub object:         String,
    pub t:              SimTime,
    pub activity_id:    String,
    pub activity_state: &'static str,
    /// `kind:reference`, empty for unlabelled records.
    pub activity_label: String,
    pub x:              Option<f64>,
    pub y:              Option<f64>,
    /// Container levels as a JSON object, `{}` without a container.
    pub levels:         String,
}

impl LogRow {
    pub fn from_record(object: &str, record: &LogRecord) -> Self {
        let levels: Map<String, Value> = record
            .object_state
            .levels
            .iter()
            .map(|(slot, level)| (slot.clone(), Value::from(*level)))
            .collect();
        Self {
            object:         object.to_owned(),
            t:              record.t,
            activity_id:    record.activity_id.to_string(),
            activity_state: record.activity_state.as_str(),
            activity_label: record.activity_label.as_ref().map(ToString::to_string).unwrap_or_default(),
            x:              record.object_state.geometry.map(|g| g.x),
            y:              record.object_state.geometry.map(|g| g.y),
            levels:         Value::Object(levels).to_string(),
        }
    }
}

/// The level of one container slot after it changed.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelRow {
    pub t:      SimTime,
    pub object: String,
    pub slot:   String,
    pub level:  f64,
}
