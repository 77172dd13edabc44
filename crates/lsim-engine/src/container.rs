//! Multi-slot container with FIFO put/get queues and level-predicated events.
//!
//! Each logical slot `s` is created together with a reservation twin
//! `s_reservations` of the same capacity.  The twin is an ordinary slot: the
//! kernel never consults it when serving `put`/`get` on `s`.  Callers use it
//! to book future flows (reserve first, consume later).
//!
//! # Level events
//!
//! `container_event(slot, level, op)` hands out one shared event per
//! `(slot, level, op)` key.  After every served put or get on a slot all
//! satisfied keys of that slot are triggered once and removed, so a level
//! passed through while several queued flows are served still counts.  The
//! next request for the same key creates a fresh event.
//!
//! | op   | satisfied when          |
//! |------|-------------------------|
//! | `gt` | `level >  threshold`    |
//! | `ge` | `level >= threshold`    |
//! | `lt` | `level <  threshold`    |
//! | `le` | `level <= threshold`    |
//!
//! All comparisons allow an absolute slack of [`EPSILON`].

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use lsim_core::{ContainerId, LsimError, LsimResult};

use crate::environment::Environment;
use crate::event::{Event, EventValue};

/// Slot used when a caller does not name one.
pub const DEFAULT_SLOT: &str = "default";

/// Absolute tolerance for level comparisons.
pub const EPSILON: f64 = 1e-9;

/// Name of the reservation twin of `slot`.
pub fn reservation_slot(slot: &str) -> String {
    format!("{slot}_reservations")
}

// ── LevelOp ───────────────────────────────────────────────────────────────────

/// Comparison used by a level event.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LevelOp {
    Gt,
    Ge,
    Lt,
    Le,
}

impl LevelOp {
    /// Does `level` satisfy `self` against `threshold`?
    pub fn holds(self, level: f64, threshold: f64) -> bool {
        match self {
            LevelOp::Gt => level - threshold > EPSILON,
            LevelOp::Ge => level >= threshold - EPSILON,
            LevelOp::Lt => threshold - level > EPSILON,
            LevelOp::Le => level <= threshold + EPSILON,
        }
    }

    /// Parse the lowercase form (`"gt"`, `"ge"`, `"lt"`, `"le"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gt" => Some(LevelOp::Gt),
            "ge" => Some(LevelOp::Ge),
            "lt" => Some(LevelOp::Lt),
            "le" => Some(LevelOp::Le),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LevelOp::Gt => "gt",
            LevelOp::Ge => "ge",
            LevelOp::Lt => "lt",
            LevelOp::Le => "le",
        }
    }
}

impl fmt::Display for LevelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capacity and level of one slot at one instant.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotLevel {
    pub capacity: f64,
    pub level:    f64,
}

// ── Internal state ────────────────────────────────────────────────────────────

#[derive(Copy, Clone)]
enum Flow {
    Put,
    Get,
}

struct Slot {
    capacity: f64,
    level:    f64,
    twin:     bool,
    puts:     VecDeque<(f64, Event)>,
    gets:     VecDeque<(f64, Event)>,
}

impl Slot {
    fn new(capacity: f64, level: f64, twin: bool) -> Self {
        Self { capacity, level, twin, puts: VecDeque::new(), gets: VecDeque::new() }
    }

    /// Serve queue heads until neither can proceed.  The level after each
    /// served head is pushed to `levels`.
    fn settle(&mut self, fired: &mut Vec<(Event, EventValue)>, levels: &mut Vec<f64>) {
        loop {
            let mut progressed = false;

            let put_head = self.puts.front().map(|(amount, _)| *amount);
            if let Some(amount) = put_head.filter(|a| self.level + a <= self.capacity + EPSILON) {
                if let Some((_, event)) = self.puts.pop_front() {
                    self.level = (self.level + amount).min(self.capacity);
                    fired.push((event, EventValue::Number(amount)));
                    levels.push(self.level);
                    progressed = true;
                }
            }

            let get_head = self.gets.front().map(|(amount, _)| *amount);
            if let Some(amount) = get_head.filter(|a| self.level - a >= -EPSILON) {
                if let Some((_, event)) = self.gets.pop_front() {
                    self.level = (self.level - amount).max(0.0);
                    fired.push((event, EventValue::Number(amount)));
                    levels.push(self.level);
                    progressed = true;
                }
            }

            if !progressed {
                break;
            }
        }
    }
}

type WatchKey = (String, u64, LevelOp);

#[derive(Default)]
struct ContainerState {
    slots:   BTreeMap<String, Slot>,
    watches: BTreeMap<WatchKey, Event>,
}

impl ContainerState {
    /// Remove and return every watch on `slot` satisfied by `level`.
    fn drain_watches(&mut self, slot: &str, level: f64, fired: &mut Vec<(Event, EventValue)>) {
        let lo = (slot.to_owned(), 0, LevelOp::Gt);
        let hi = (slot.to_owned(), u64::MAX, LevelOp::Le);
        let due: Vec<WatchKey> = self
            .watches
            .range(lo..=hi)
            .filter(|((_, bits, op), _)| op.holds(level, f64::from_bits(*bits)))
            .map(|(key, _)| key.clone())
            .collect();
        for key in due {
            if let Some(event) = self.watches.remove(&key) {
                fired.push((event, EventValue::Number(level)));
            }
        }
    }
}

struct ContainerInner {
    id:             ContainerId,
    env:            Environment,
    store_capacity: Option<usize>,
    state:          RefCell<ContainerState>,
}

// ── Container ─────────────────────────────────────────────────────────────────

/// A bag of named, bounded, continuous stocks.  Clones share state.
#[derive(Clone)]
pub struct Container {
    inner: Rc<ContainerInner>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("slots", &self.snapshot())
            .finish()
    }
}

impl Container {
    /// A container with the single slot [`DEFAULT_SLOT`].
    pub fn new(env: &Environment, capacity: f64, level: f64) -> LsimResult<Self> {
        let c = Self::build(env, None);
        c.init_slot(DEFAULT_SLOT, capacity, level)?;
        Ok(c)
    }

    /// An empty container accepting at most `store_capacity` logical slots.
    pub fn multi(env: &Environment, store_capacity: usize) -> Self {
        Self::build(env, Some(store_capacity))
    }

    fn build(env: &Environment, store_capacity: Option<usize>) -> Self {
        Self {
            inner: Rc::new(ContainerInner {
                id: env.next_container_id(),
                env: env.clone(),
                store_capacity,
                state: RefCell::new(ContainerState::default()),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    /// Create `slot` and its reservation twin.
    pub fn init_slot(&self, slot: &str, capacity: f64, level: f64) -> LsimResult<()> {
        if !capacity.is_finite() || capacity < 0.0 {
            return Err(LsimError::Config(format!(
                "slot {slot:?}: capacity must be finite and non-negative, got {capacity}"
            )));
        }
        if level.is_nan() || level < 0.0 || level > capacity {
            return Err(LsimError::LevelOutOfRange { slot: slot.to_owned(), level, capacity });
        }

        let twin = reservation_slot(slot);
        let mut st = self.inner.state.borrow_mut();
        if st.slots.contains_key(slot) || st.slots.contains_key(&twin) {
            return Err(LsimError::Config(format!("slot {slot:?} already exists")));
        }
        if let Some(max) = self.inner.store_capacity {
            let used = st.slots.values().filter(|s| !s.twin).count();
            if used >= max {
                return Err(LsimError::Config(format!(
                    "container holds at most {max} slots; cannot add {slot:?}"
                )));
            }
        }
        st.slots.insert(slot.to_owned(), Slot::new(capacity, level, false));
        st.slots.insert(twin, Slot::new(capacity, level, true));
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────────

    /// Logical slot names (reservation twins excluded), sorted.
    pub fn slots(&self) -> Vec<String> {
        let st = self.inner.state.borrow();
        st.slots.iter().filter(|(_, s)| !s.twin).map(|(name, _)| name.clone()).collect()
    }

    pub fn has_slot(&self, slot: &str) -> bool {
        self.inner.state.borrow().slots.contains_key(slot)
    }

    pub fn level(&self, slot: &str) -> LsimResult<f64> {
        self.with_slot(slot, |s| s.level)
    }

    pub fn capacity(&self, slot: &str) -> LsimResult<f64> {
        self.with_slot(slot, |s| s.capacity)
    }

    /// Number of `(puts, gets)` waiting on `slot`.
    pub fn waiting(&self, slot: &str) -> LsimResult<(usize, usize)> {
        self.with_slot(slot, |s| (s.puts.len(), s.gets.len()))
    }

    fn with_slot<T>(&self, slot: &str, f: impl FnOnce(&Slot) -> T) -> LsimResult<T> {
        let st = self.inner.state.borrow();
        st.slots.get(slot).map(f).ok_or_else(|| LsimError::UnknownSlot(slot.to_owned()))
    }

    /// `{slot: {capacity, level}}` for every logical slot.
    pub fn snapshot(&self) -> BTreeMap<String, SlotLevel> {
        let st = self.inner.state.borrow();
        st.slots
            .iter()
            .filter(|(_, s)| !s.twin)
            .map(|(name, s)| (name.clone(), SlotLevel { capacity: s.capacity, level: s.level }))
            .collect()
    }

    // ── Mutations ─────────────────────────────────────────────────────────

    /// Add `amount` to `slot`.  The event triggers once the amount fits,
    /// after earlier waiting puts on the same slot.
    pub fn put(&self, amount: f64, slot: &str) -> LsimResult<Event> {
        self.enqueue(Flow::Put, amount, slot)
    }

    /// Take `amount` from `slot`.  The event triggers once the slot holds
    /// enough, after earlier waiting gets on the same slot.
    pub fn get(&self, amount: f64, slot: &str) -> LsimResult<Event> {
        self.enqueue(Flow::Get, amount, slot)
    }

    fn enqueue(&self, flow: Flow, amount: f64, slot: &str) -> LsimResult<Event> {
        let event = self.inner.env.event();
        let mut fired = Vec::new();
        {
            let mut guard = self.inner.state.borrow_mut();
            let st = &mut *guard;
            let s = st
                .slots
                .get_mut(slot)
                .ok_or_else(|| LsimError::UnknownSlot(slot.to_owned()))?;
            if !amount.is_finite() || amount < 0.0 || amount > s.capacity + EPSILON {
                return Err(LsimError::Invariant(format!(
                    "amount {amount} can never be served by slot {slot:?} (capacity {})",
                    s.capacity
                )));
            }
            match flow {
                Flow::Put => s.puts.push_back((amount, event.clone())),
                Flow::Get => s.gets.push_back((amount, event.clone())),
            }
            let mut levels = Vec::new();
            s.settle(&mut fired, &mut levels);
            // Every served head is a mutation of its own.
            for level in levels {
                st.drain_watches(slot, level, &mut fired);
            }
        }
        for (ev, value) in fired {
            ev.succeed(value)?;
        }
        Ok(event)
    }

    // ── Level events ──────────────────────────────────────────────────────

    /// Shared event that triggers once `op` holds for the level of `slot`.
    ///
    /// Already triggered when the predicate holds now.  A `level` outside
    /// `[0, capacity]` is a configuration error.
    pub fn container_event(&self, slot: &str, level: f64, op: LevelOp) -> LsimResult<Event> {
        let watched = {
            let mut st = self.inner.state.borrow_mut();
            let (current, capacity) = st
                .slots
                .get(slot)
                .map(|s| (s.level, s.capacity))
                .ok_or_else(|| LsimError::UnknownSlot(slot.to_owned()))?;
            if level.is_nan() || level < -EPSILON || level > capacity + EPSILON {
                return Err(LsimError::LevelOutOfRange {
                    slot: slot.to_owned(),
                    level,
                    capacity,
                });
            }
            let level = level.clamp(0.0, capacity);
            if op.holds(current, level) {
                Err(current)
            } else {
                let key = (slot.to_owned(), level.to_bits(), op);
                let env = &self.inner.env;
                Ok(st.watches.entry(key).or_insert_with(|| env.event()).clone())
            }
        };
        match watched {
            Ok(event) => Ok(event),
            Err(current) => {
                let event = self.inner.env.event();
                event.succeed(EventValue::Number(current))?;
                Ok(event)
            }
        }
    }

    /// Triggers when `slot` is empty.
    pub fn get_empty_event(&self, slot: &str) -> LsimResult<Event> {
        self.container_event(slot, 0.0, LevelOp::Le)
    }

    /// Triggers when `slot` is full.
    pub fn get_full_event(&self, slot: &str) -> LsimResult<Event> {
        let capacity = self.capacity(slot)?;
        self.container_event(slot, capacity, LevelOp::Ge)
    }

    /// Triggers when `slot` holds at least `amount`.
    pub fn get_available(&self, slot: &str, amount: f64) -> LsimResult<Event> {
        self.container_event(slot, amount, LevelOp::Ge)
    }

    /// Triggers when `slot` has room for `amount`.
    pub fn get_room(&self, slot: &str, amount: f64) -> LsimResult<Event> {
        let capacity = self.capacity(slot)?;
        self.container_event(slot, capacity - amount, LevelOp::Le)
    }
}
