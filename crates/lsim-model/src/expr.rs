//! Start-condition expressions.
//!
//! An [`Expr`] is a closed tree that evaluates to one kernel [`Event`].  The
//! JSON form accepted by [`Expr::from_json`]:
//!
//! ```text
//! expr := [expr, ...]                                   -- all of
//!       | {"and": [expr, ...]}                          -- all of
//!       | {"or":  [expr, ...]}                          -- any of
//!       | {"type": "container", "concept": NAME,
//!          "state": "full"|"empty"|"gt"|"ge"|"lt"|"le",
//!          "level": NUMBER?, "id_": SLOT?}
//!       | {"type": "activity", "state": "done",
//!          "name": NAME} | {..., "id": UUID}
//!       | {"type": "time", "start_time": NUMBER}
//! ```

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use lsim_core::{ActivityId, LsimError, LsimResult, SimTime};
use lsim_engine::{DEFAULT_SLOT, EPSILON, Environment, Event, LevelOp};

use crate::entity::Entity;
use crate::registry::Registry;

/// Concept name → entity, used to resolve `"concept"` fields.
pub type Concepts = FxHashMap<String, Rc<Entity>>;

/// Reference to an activity by id and/or name.  The id wins when it is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityRef {
    pub id:   Option<ActivityId>,
    pub name: Option<String>,
}

impl ActivityRef {
    pub fn by_id(id: ActivityId) -> Self {
        Self { id: Some(id), name: None }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self { id: None, name: Some(name.into()) }
    }
}

impl fmt::Display for ActivityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.name) {
            (Some(id), Some(name)) => write!(f, "{name:?} ({id})"),
            (Some(id), None) => write!(f, "{id}"),
            (None, Some(name)) => write!(f, "{name:?}"),
            (None, None) => f.write_str("<empty reference>"),
        }
    }
}

/// Predicate of a container expression.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LevelState {
    Full,
    Empty,
    Compare(LevelOp),
}

impl LevelState {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(LevelState::Full),
            "empty" => Some(LevelState::Empty),
            other => LevelOp::parse(other).map(LevelState::Compare),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Expr {
    /// An event built by hand.
    Event(Event),
    All(Vec<Expr>),
    Any(Vec<Expr>),
    Container {
        entity: Rc<Entity>,
        state:  LevelState,
        level:  Option<f64>,
        slot:   String,
    },
    /// Done when every matching activity's main process has finished.
    ActivityDone(ActivityRef),
    /// Absolute start time.
    Time { start_time: SimTime },
}

impl Expr {
    // ── Constructors ──────────────────────────────────────────────────────

    pub fn full(entity: &Rc<Entity>) -> Self {
        Self::Container {
            entity: Rc::clone(entity),
            state:  LevelState::Full,
            level:  None,
            slot:   DEFAULT_SLOT.to_owned(),
        }
    }

    pub fn empty(entity: &Rc<Entity>) -> Self {
        Self::Container {
            entity: Rc::clone(entity),
            state:  LevelState::Empty,
            level:  None,
            slot:   DEFAULT_SLOT.to_owned(),
        }
    }

    pub fn level(entity: &Rc<Entity>, op: LevelOp, level: f64, slot: &str) -> Self {
        Self::Container {
            entity: Rc::clone(entity),
            state:  LevelState::Compare(op),
            level:  Some(level),
            slot:   slot.to_owned(),
        }
    }

    pub fn done(name: impl Into<String>) -> Self {
        Self::ActivityDone(ActivityRef::by_name(name))
    }

    pub fn done_id(id: ActivityId) -> Self {
        Self::ActivityDone(ActivityRef::by_id(id))
    }

    pub fn time(start_time: SimTime) -> Self {
        Self::Time { start_time }
    }

    // ── Evaluation ────────────────────────────────────────────────────────

    /// Build the event this expression stands for, at the current time.
    pub fn evaluate(&self, env: &Environment, registry: &Registry) -> LsimResult<Event> {
        match self {
            Expr::Event(e) => Ok(e.clone()),
            Expr::All(items) => Ok(env.all_of(Self::evaluate_all(items, env, registry)?)),
            Expr::Any(items) => Ok(env.any_of(Self::evaluate_all(items, env, registry)?)),
            Expr::Container { entity, state, level, slot } => {
                let (op, threshold) = Self::predicate(entity, *state, *level, slot)?;
                entity.container()?.container_event(slot, threshold, op)
            }
            Expr::ActivityDone(r) => {
                let events = Self::resolve_registered(r, registry)?
                    .into_iter()
                    .filter_map(|id| registry.main(id).map(|p| p.done().clone()))
                    .collect();
                Ok(env.all_of(events))
            }
            Expr::Time { start_time } => env.timeout((start_time - env.now()).max(0.0)),
        }
    }

    fn evaluate_all(items: &[Expr], env: &Environment, registry: &Registry) -> LsimResult<Vec<Event>> {
        items.iter().map(|e| e.evaluate(env, registry)).collect()
    }

    /// Whether the expression is satisfied right now.
    ///
    /// Agrees with [`evaluate`](Self::evaluate) at any instant: `All([e])`
    /// holds exactly when `e` does.  Creates no events.
    pub fn holds(&self, env: &Environment, registry: &Registry) -> LsimResult<bool> {
        match self {
            Expr::Event(e) => Ok(e.is_triggered()),
            Expr::All(items) => {
                for e in items {
                    if !e.holds(env, registry)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expr::Any(items) => {
                for e in items {
                    if e.holds(env, registry)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expr::Container { entity, state, level, slot } => {
                let container = entity.container()?;
                let current = container.level(slot)?;
                let (op, threshold) = Self::predicate(entity, *state, *level, slot)?;
                Ok(op.holds(current, threshold))
            }
            Expr::ActivityDone(r) => {
                for id in Self::resolve_registered(r, registry)? {
                    let done = registry.main(id).is_some_and(|p| p.done().is_triggered());
                    if !done {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expr::Time { start_time } => Ok(env.now() >= start_time - EPSILON),
        }
    }

    /// Fail now for what [`evaluate`](Self::evaluate) would reject later:
    /// unknown or unregistered activities and malformed container predicates.
    pub fn check(&self, registry: &Registry) -> LsimResult<()> {
        match self {
            Expr::All(items) | Expr::Any(items) => {
                items.iter().try_for_each(|e| e.check(registry))
            }
            Expr::Container { entity, state, level, slot } => {
                let (_, threshold) = Self::predicate(entity, *state, *level, slot)?;
                let capacity = entity.container()?.capacity(slot)?;
                if threshold.is_nan() || threshold < -EPSILON || threshold > capacity + EPSILON {
                    return Err(LsimError::LevelOutOfRange {
                        slot: slot.clone(),
                        level: threshold,
                        capacity,
                    });
                }
                Ok(())
            }
            Expr::ActivityDone(r) => Self::resolve_registered(r, registry).map(|_| ()),
            Expr::Event(_) | Expr::Time { .. } => Ok(()),
        }
    }

    /// Comparison and threshold of a container expression.
    fn predicate(
        entity: &Entity,
        state:  LevelState,
        level:  Option<f64>,
        slot:   &str,
    ) -> LsimResult<(LevelOp, f64)> {
        match (state, level) {
            (LevelState::Full, _) => Ok((LevelOp::Ge, entity.container()?.capacity(slot)?)),
            (LevelState::Empty, _) => Ok((LevelOp::Le, 0.0)),
            (LevelState::Compare(op), Some(level)) => Ok((op, level)),
            (LevelState::Compare(op), None) => Err(LsimError::Config(format!(
                "container expression on {} with state {op} needs a level",
                entity.name()
            ))),
        }
    }

    fn resolve_registered(r: &ActivityRef, registry: &Registry) -> LsimResult<Vec<ActivityId>> {
        let ids = registry.resolve(r);
        if ids.is_empty() {
            return Err(LsimError::UnknownActivity(r.to_string()));
        }
        for &id in &ids {
            if registry.main(id).is_none() {
                return Err(LsimError::NotRegistered(
                    registry.name_of(id).unwrap_or_else(|| id.to_string()),
                ));
            }
        }
        Ok(ids)
    }

    /// Every activity reference in the tree, depth first.
    pub fn referenced_activities(&self) -> Vec<ActivityRef> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs(&self, out: &mut Vec<ActivityRef>) {
        match self {
            Expr::All(items) | Expr::Any(items) => {
                for e in items {
                    e.collect_refs(out);
                }
            }
            Expr::ActivityDone(r) => out.push(r.clone()),
            Expr::Event(_) | Expr::Container { .. } | Expr::Time { .. } => {}
        }
    }

    // ── JSON ──────────────────────────────────────────────────────────────

    /// Parse the JSON grammar in the module docs.
    pub fn from_json(value: &Value, concepts: &Concepts) -> LsimResult<Self> {
        match value {
            Value::Array(items) => Ok(Expr::All(Self::parse_list(items, concepts)?)),
            Value::Object(map) => {
                if let Some(items) = map.get("and") {
                    return Ok(Expr::All(Self::parse_list(expect_array(items, "and")?, concepts)?));
                }
                if let Some(items) = map.get("or") {
                    return Ok(Expr::Any(Self::parse_list(expect_array(items, "or")?, concepts)?));
                }
                let kind = map.get("type").and_then(Value::as_str).unwrap_or_default();
                match kind {
                    "container" => {
                        let concept = map
                            .get("concept")
                            .and_then(Value::as_str)
                            .ok_or_else(|| bad(value, "container expression needs a concept"))?;
                        let entity = concepts
                            .get(concept)
                            .cloned()
                            .ok_or_else(|| bad(value, "unknown concept"))?;
                        let state = map
                            .get("state")
                            .and_then(Value::as_str)
                            .and_then(LevelState::parse)
                            .ok_or_else(|| bad(value, "unknown container state"))?;
                        let level = map.get("level").and_then(Value::as_f64);
                        let slot = map
                            .get("id_")
                            .and_then(Value::as_str)
                            .unwrap_or(DEFAULT_SLOT)
                            .to_owned();
                        Ok(Expr::Container { entity, state, level, slot })
                    }
                    "activity" => {
                        if map.get("state").and_then(Value::as_str) != Some("done") {
                            return Err(bad(value, "activity expressions support only state \"done\""));
                        }
                        let id = match map.get("id").and_then(Value::as_str) {
                            Some(s) => Some(
                                ActivityId::parse(s).map_err(|_| bad(value, "malformed activity id"))?,
                            ),
                            None => None,
                        };
                        let name = map.get("name").and_then(Value::as_str).map(str::to_owned);
                        if id.is_none() && name.is_none() {
                            return Err(bad(value, "activity expression needs a name or an id"));
                        }
                        Ok(Expr::ActivityDone(ActivityRef { id, name }))
                    }
                    "time" => {
                        let start_time = map
                            .get("start_time")
                            .and_then(Value::as_f64)
                            .ok_or_else(|| bad(value, "time expression needs start_time"))?;
                        Ok(Expr::Time { start_time })
                    }
                    _ => Err(bad(value, "unknown expression type")),
                }
            }
            _ => Err(bad(value, "expected an array or an object")),
        }
    }

    fn parse_list(items: &[Value], concepts: &Concepts) -> LsimResult<Vec<Expr>> {
        items.iter().map(|v| Self::from_json(v, concepts)).collect()
    }
}

fn expect_array<'a>(value: &'a Value, key: &str) -> LsimResult<&'a [Value]> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| bad(value, &format!("\"{key}\" must hold a list")))
}

fn bad(value: &Value, why: &str) -> LsimError {
    LsimError::Config(format!("{why}: {value}"))
}
