//! Append-only activity logbooks.
//!
//! Two record formats are kept side by side:
//!
//! | Format | Written by       | Fields                                              |
//! |--------|------------------|-----------------------------------------------------|
//! | v1     | `log_entry_v1`   | t, activity id, activity state, object state, label |
//! | v0     | `log_entry_v0`   | free-text message, t, numeric value, geometry       |
//!
//! Activities only write v1 records.  v0 is available for user code that
//! wants to annotate an object's history.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::fmt;

use lsim_core::{ActivityId, GeoPoint, SimTime};

// ── Record types ──────────────────────────────────────────────────────────────

/// Lifecycle marker of a v1 record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum ActivityState {
    Start,
    Stop,
    WaitStart,
    WaitStop,
    Unknown,
}

impl ActivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityState::Start     => "START",
            ActivityState::Stop      => "STOP",
            ActivityState::WaitStart => "WAIT_START",
            ActivityState::WaitStop  => "WAIT_STOP",
            ActivityState::Unknown   => "UNKNOWN",
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a labelled record refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LabelKind {
    /// A child of a composite activity.
    Subprocess,
    /// A pre/post-process plug-in.
    Plugin,
}

/// Optional qualifier of a v1 record: `{type, ref}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActivityLabel {
    pub kind:      LabelKind,
    pub reference: String,
}

impl ActivityLabel {
    pub fn subprocess(child: ActivityId) -> Self {
        Self { kind: LabelKind::Subprocess, reference: child.to_string() }
    }

    pub fn plugin(name: &str) -> Self {
        Self { kind: LabelKind::Plugin, reference: name.to_owned() }
    }
}

impl fmt::Display for ActivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            LabelKind::Subprocess => "subprocess",
            LabelKind::Plugin => "plugin",
        };
        write!(f, "{kind}:{}", self.reference)
    }
}

/// State of the logging object when a record was written.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectState {
    pub geometry: Option<GeoPoint>,
    /// Level per logical container slot.
    pub levels:   BTreeMap<String, f64>,
}

/// A v1 record.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogRecord {
    pub t:              SimTime,
    pub activity_id:    ActivityId,
    pub activity_state: ActivityState,
    pub object_state:   ObjectState,
    pub activity_label: Option<ActivityLabel>,
}

/// A v0 record.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LegacyRecord {
    pub message:  String,
    pub t:        SimTime,
    pub value:    f64,
    pub geometry: Option<GeoPoint>,
}

/// A matched opening/closing pair of records.
#[derive(Clone, Debug, PartialEq)]
pub struct Span {
    pub activity_id: ActivityId,
    pub label:       Option<ActivityLabel>,
    pub start:       SimTime,
    pub stop:        SimTime,
}

impl Span {
    #[inline]
    pub fn duration(&self) -> SimTime {
        self.stop - self.start
    }
}

// ── Logbook ───────────────────────────────────────────────────────────────────

/// Append-only list of records owned by one loggable object.
#[derive(Debug, Default)]
pub struct Logbook {
    records: RefCell<Vec<LogRecord>>,
    legacy:  RefCell<Vec<LegacyRecord>>,
}

impl Logbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_entry_v1(
        &self,
        t:              SimTime,
        activity_id:    ActivityId,
        activity_state: ActivityState,
        object_state:   ObjectState,
        activity_label: Option<ActivityLabel>,
    ) {
        self.records.borrow_mut().push(LogRecord {
            t,
            activity_id,
            activity_state,
            object_state,
            activity_label,
        });
    }

    pub fn log_entry_v0(&self, message: &str, t: SimTime, value: f64, geometry: Option<GeoPoint>) {
        self.legacy.borrow_mut().push(LegacyRecord {
            message: message.to_owned(),
            t,
            value,
            geometry,
        });
    }

    pub fn records(&self) -> Ref<'_, Vec<LogRecord>> {
        self.records.borrow()
    }

    pub fn legacy(&self) -> Ref<'_, Vec<LegacyRecord>> {
        self.legacy.borrow()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    /// Unlabelled records of `activity` in `state`.
    pub fn count(&self, activity: ActivityId, state: ActivityState) -> usize {
        self.records
            .borrow()
            .iter()
            .filter(|r| {
                r.activity_id == activity && r.activity_state == state && r.activity_label.is_none()
            })
            .count()
    }

    /// Time of the first unlabelled record of `activity` in `state`.
    pub fn first_time(&self, activity: ActivityId, state: ActivityState) -> Option<SimTime> {
        self.records
            .borrow()
            .iter()
            .find(|r| {
                r.activity_id == activity && r.activity_state == state && r.activity_label.is_none()
            })
            .map(|r| r.t)
    }

    /// Time of the last unlabelled record of `activity` in `state`.
    pub fn last_time(&self, activity: ActivityId, state: ActivityState) -> Option<SimTime> {
        self.records
            .borrow()
            .iter()
            .rev()
            .find(|r| {
                r.activity_id == activity && r.activity_state == state && r.activity_label.is_none()
            })
            .map(|r| r.t)
    }

    /// `START`/`STOP` pairs, matched per (activity, label), in closing order.
    pub fn spans(&self) -> Vec<Span> {
        self.pair(ActivityState::Start, ActivityState::Stop)
    }

    /// `WAIT_START`/`WAIT_STOP` pairs.
    pub fn wait_spans(&self) -> Vec<Span> {
        self.pair(ActivityState::WaitStart, ActivityState::WaitStop)
    }

    fn pair(&self, open: ActivityState, close: ActivityState) -> Vec<Span> {
        let mut pending: Vec<&LogRecord> = Vec::new();
        let mut spans = Vec::new();
        let records = self.records.borrow();
        for r in records.iter() {
            if r.activity_state == open {
                pending.push(r);
            } else if r.activity_state == close {
                let matching = pending.iter().rposition(|o| {
                    o.activity_id == r.activity_id && o.activity_label == r.activity_label
                });
                if let Some(pos) = matching {
                    let o = pending.remove(pos);
                    spans.push(Span {
                        activity_id: r.activity_id,
                        label:       r.activity_label.clone(),
                        start:       o.t,
                        stop:        r.t,
                    });
                }
            }
        }
        spans
    }
}

// ── Loggable ──────────────────────────────────────────────────────────────────

/// An object with a logbook.
pub trait Loggable {
    fn logbook(&self) -> &Logbook;

    /// Snapshot stored with every v1 record.
    fn object_state(&self) -> ObjectState {
        ObjectState::default()
    }

    fn log_entry(
        &self,
        t:        SimTime,
        activity: ActivityId,
        state:    ActivityState,
        label:    Option<ActivityLabel>,
    ) {
        self.logbook().log_entry_v1(t, activity, state, self.object_state(), label);
    }
}
