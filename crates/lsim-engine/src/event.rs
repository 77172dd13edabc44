//! One-shot events, their values, and the `AllOf` / `AnyOf` conditions.
//!
//! An event moves through three states and never back:
//!
//! | State       | Meaning                                                    |
//! |-------------|------------------------------------------------------------|
//! | `Pending`   | created, no value yet                                      |
//! | `Triggered` | value set and queued; callbacks not yet run                |
//! | `Processed` | popped by the loop; callbacks ran in registration order    |

use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use tracing::warn;

use lsim_core::{EventId, LsimError, LsimResult, ProcessId, SimTime};

use crate::environment::{Core, Environment};
use crate::process;

// ── EventValue ────────────────────────────────────────────────────────────────

/// The value an event carries once triggered.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum EventValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    /// Values of a condition's processed members, in member order.
    Members(Vec<(EventId, EventValue)>),
}

impl EventValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            EventValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn members(&self) -> &[(EventId, EventValue)] {
        match self {
            EventValue::Members(m) => m,
            _ => &[],
        }
    }
}

// ── Event ─────────────────────────────────────────────────────────────────────

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Status {
    Pending,
    Triggered,
    Processed,
}

pub(crate) enum Callback {
    /// Poll the process again.
    Resume(ProcessId),
    Call(Box<dyn FnOnce(&Event)>),
}

struct EventState {
    status:    Status,
    value:     EventValue,
    callbacks: Vec<Callback>,
}

struct EventInner {
    id:    EventId,
    core:  Weak<Core>,
    state: RefCell<EventState>,
}

/// A one-shot occurrence.  Clones share the same underlying event.
///
/// `.await` an event inside a process to suspend until the loop processes it;
/// the await yields the event's value.
#[derive(Clone)]
pub struct Event {
    inner: Rc<EventInner>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.borrow();
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("status", &st.status)
            .field("value", &st.value)
            .finish()
    }
}

impl Event {
    pub(crate) fn new(env: &Environment) -> Self {
        Self {
            inner: Rc::new(EventInner {
                id:    env.core.next_event_id(),
                core:  Rc::downgrade(&env.core),
                state: RefCell::new(EventState {
                    status:    Status::Pending,
                    value:     EventValue::Empty,
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> EventId {
        self.inner.id
    }

    /// `true` once a value has been set (queued or processed).
    pub fn is_triggered(&self) -> bool {
        self.inner.state.borrow().status != Status::Pending
    }

    /// `true` once the loop has run this event's callbacks.
    pub fn is_processed(&self) -> bool {
        self.inner.state.borrow().status == Status::Processed
    }

    /// Number of callbacks waiting for the loop to process this event.
    pub fn pending_callbacks(&self) -> usize {
        self.inner.state.borrow().callbacks.len()
    }

    /// The value, once triggered.
    pub fn value(&self) -> Option<EventValue> {
        let st = self.inner.state.borrow();
        (st.status != Status::Pending).then(|| st.value.clone())
    }

    /// `true` when both handles refer to the same event.
    pub fn ptr_eq(&self, other: &Event) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Trigger now with `value`.  Fails with `AlreadyTriggered` on a second call.
    pub fn succeed(&self, value: EventValue) -> LsimResult<()> {
        self.trigger_in(0.0, value)
    }

    pub(crate) fn trigger_in(&self, delay: SimTime, value: EventValue) -> LsimResult<()> {
        {
            let mut st = self.inner.state.borrow_mut();
            if st.status != Status::Pending {
                return Err(LsimError::AlreadyTriggered(self.inner.id));
            }
            st.status = Status::Triggered;
            st.value = value;
        }
        let core = self
            .inner
            .core
            .upgrade()
            .ok_or_else(|| LsimError::Invariant("environment dropped".into()))?;
        core.schedule(self.clone(), delay);
        Ok(())
    }

    /// Run `f` when the loop processes this event, or right away if it
    /// already has.
    pub fn on_processed(&self, f: impl FnOnce(&Event) + 'static) {
        if self.is_processed() {
            f(self);
        } else {
            self.push(Callback::Call(Box::new(f)));
        }
    }

    pub(crate) fn add_resume(&self, pid: ProcessId) {
        self.push(Callback::Resume(pid));
    }

    fn push(&self, cb: Callback) {
        self.inner.state.borrow_mut().callbacks.push(cb);
    }

    /// Mark processed, then run the callbacks in registration order.
    pub(crate) fn fire(&self, core: &Rc<Core>) {
        let callbacks = {
            let mut st = self.inner.state.borrow_mut();
            st.status = Status::Processed;
            std::mem::take(&mut st.callbacks)
        };
        for cb in callbacks {
            match cb {
                Callback::Resume(pid) => process::resume(core, pid),
                Callback::Call(f) => f(self),
            }
        }
    }
}

// ── Awaiting ──────────────────────────────────────────────────────────────────

/// Future returned by awaiting an [`Event`].
pub struct Wait {
    event:      Event,
    registered: bool,
}

impl Future for Wait {
    type Output = EventValue;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<EventValue> {
        if self.event.is_processed() {
            return Poll::Ready(self.event.value().unwrap_or_default());
        }
        if !self.registered {
            let active = self.event.inner.core.upgrade().and_then(|c| c.active.get());
            match active {
                Some(pid) => {
                    self.event.add_resume(pid);
                    self.registered = true;
                }
                None => warn!(
                    event = %self.event.id(),
                    "event awaited outside a process; it will never resume"
                ),
            }
        }
        Poll::Pending
    }
}

impl IntoFuture for Event {
    type Output = EventValue;
    type IntoFuture = Wait;

    fn into_future(self) -> Wait {
        Wait { event: self, registered: false }
    }
}

impl IntoFuture for &Event {
    type Output = EventValue;
    type IntoFuture = Wait;

    fn into_future(self) -> Wait {
        Wait { event: self.clone(), registered: false }
    }
}

// ── Conditions ────────────────────────────────────────────────────────────────

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Quorum {
    All,
    Any,
}

pub(crate) fn condition(env: &Environment, members: Vec<Event>, quorum: Quorum) -> Event {
    let out = env.event();
    if members.is_empty() {
        if quorum == Quorum::All {
            // A fresh event cannot already be triggered.
            let _ = out.succeed(EventValue::Members(Vec::new()));
        }
        return out;
    }

    let members = Rc::new(members);
    for m in members.iter().filter(|m| !m.is_processed()) {
        let (out, members) = (out.clone(), Rc::clone(&members));
        m.push(Callback::Call(Box::new(move |_: &Event| check(&out, &members, quorum))));
    }
    check(&out, &members, quorum);
    out
}

fn check(out: &Event, members: &[Event], quorum: Quorum) {
    if out.is_triggered() {
        return;
    }
    let done = members.iter().filter(|m| m.is_processed()).count();
    let met = match quorum {
        Quorum::All => done == members.len(),
        Quorum::Any => done > 0,
    };
    if met {
        let values = members
            .iter()
            .filter(|m| m.is_processed())
            .map(|m| (m.id(), m.value().unwrap_or_default()))
            .collect();
        let _ = out.succeed(EventValue::Members(values));
    }
}
