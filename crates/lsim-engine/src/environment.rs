//! The simulation environment: virtual clock, event queue and process table.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{error, trace};

use lsim_core::{
    ContainerId, EventId, LsimError, LsimResult, ProcessId, RequestId, ResourceId, SimConfig,
    SimTime,
};

use crate::event::{Event, EventValue, Quorum, condition};
use crate::observer::{EnvObserver, NoopObserver};
use crate::process::{self, Process, ProcessSlot};

// ── Queue entry ───────────────────────────────────────────────────────────────

/// An event waiting in the queue to be processed at `at`.
///
/// Ordered so that `BinaryHeap` (a max-heap) pops the smallest `(at, seq)`.
pub(crate) struct Scheduled {
    pub(crate) at:    SimTime,
    pub(crate) seq:   u64,
    pub(crate) event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.total_cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

// ── Shared kernel state ───────────────────────────────────────────────────────

/// Per-id-kind monotonic counters.
#[derive(Default)]
struct Counters {
    seq:       Cell<u64>,
    event:     Cell<u64>,
    process:   Cell<u64>,
    resource:  Cell<u64>,
    request:   Cell<u64>,
    container: Cell<u64>,
}

fn bump(cell: &Cell<u64>) -> u64 {
    let n = cell.get();
    cell.set(n + 1);
    n
}

pub(crate) struct Core {
    pub(crate) now:       Cell<SimTime>,
    counters:             Counters,
    pub(crate) queue:     RefCell<BinaryHeap<Scheduled>>,
    pub(crate) processes: RefCell<FxHashMap<ProcessId, ProcessSlot>>,
    /// The process currently being polled, if any.
    pub(crate) active:    Cell<Option<ProcessId>>,
    failure:              RefCell<Option<LsimError>>,
    steps:                Cell<u64>,
    pub(crate) config:    SimConfig,
}

impl Core {
    /// Queue `event` for processing `delay` seconds from now.
    pub(crate) fn schedule(&self, event: Event, delay: SimTime) {
        let seq = bump(&self.counters.seq);
        let at = self.now.get() + delay;
        self.queue.borrow_mut().push(Scheduled { at, seq, event });
    }

    /// Record a process failure.  Only the first failure is kept.
    pub(crate) fn fail(&self, pid: ProcessId, err: LsimError) {
        error!(process = %pid, t = self.now.get(), error = %err, "process failed; aborting run");
        let mut slot = self.failure.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub(crate) fn next_event_id(&self) -> EventId {
        EventId(bump(&self.counters.event))
    }
}

// ── Environment ───────────────────────────────────────────────────────────────

/// Handle to a simulation.  Cheap to clone; all clones share one clock.
///
/// The environment is single-threaded (`!Send`): every process, resource and
/// container of a run lives on the thread that created the environment.
#[derive(Clone)]
pub struct Environment {
    pub(crate) core: Rc<Core>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("now", &self.now())
            .field("queued", &self.core.queue.borrow().len())
            .field("processes", &self.core.processes.borrow().len())
            .finish()
    }
}

impl Environment {
    /// A fresh environment with the default configuration (`now = 0`).
    pub fn new() -> Self {
        Self::build(SimConfig::default())
    }

    /// A fresh environment whose clock starts at `config.start_time`.
    pub fn with_config(config: SimConfig) -> LsimResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SimConfig) -> Self {
        Self {
            core: Rc::new(Core {
                now:       Cell::new(config.start_time),
                counters:  Counters::default(),
                queue:     RefCell::new(BinaryHeap::new()),
                processes: RefCell::new(FxHashMap::default()),
                active:    Cell::new(None),
                failure:   RefCell::new(None),
                steps:     Cell::new(0),
                config,
            }),
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────

    /// Current virtual time.
    #[inline]
    pub fn now(&self) -> SimTime {
        self.core.now.get()
    }

    pub fn config(&self) -> &SimConfig {
        &self.core.config
    }

    /// Time of the next queued event, if any.
    pub fn peek(&self) -> Option<SimTime> {
        self.core.queue.borrow().peek().map(|s| s.at)
    }

    /// The process being polled right now (`None` outside any process).
    pub fn active_process(&self) -> Option<ProcessId> {
        self.core.active.get()
    }

    /// Number of spawned processes that have not finished.
    pub fn live_processes(&self) -> usize {
        self.core.processes.borrow().len()
    }

    /// Number of events processed so far.
    pub fn steps(&self) -> u64 {
        self.core.steps.get()
    }

    /// `true` when both handles refer to the same simulation.
    pub fn same_as(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    // ── Event construction ────────────────────────────────────────────────

    /// A new pending event.
    pub fn event(&self) -> Event {
        Event::new(self)
    }

    /// An event that triggers `delay` seconds from now with an empty value.
    pub fn timeout(&self, delay: SimTime) -> LsimResult<Event> {
        self.timeout_with(delay, EventValue::Empty)
    }

    /// An event that triggers `delay` seconds from now carrying `value`.
    pub fn timeout_with(&self, delay: SimTime, value: EventValue) -> LsimResult<Event> {
        if !(delay >= 0.0) || !delay.is_finite() {
            return Err(LsimError::NegativeTimeout(delay));
        }
        let event = self.event();
        event.trigger_in(delay, value)?;
        Ok(event)
    }

    /// Triggers once every member has been processed.  Triggers immediately
    /// for an empty list.
    pub fn all_of(&self, events: Vec<Event>) -> Event {
        condition(self, events, Quorum::All)
    }

    /// Triggers once any member has been processed.  Never triggers for an
    /// empty list.
    pub fn any_of(&self, events: Vec<Event>) -> Event {
        condition(self, events, Quorum::Any)
    }

    /// Spawn `future` as a process.  It first runs when the loop processes
    /// its initialisation event, scheduled at `now`.
    pub fn process<F>(&self, future: F) -> Process
    where
        F: Future<Output = LsimResult<EventValue>> + 'static,
    {
        process::spawn(self, future)
    }

    // ── Loop ──────────────────────────────────────────────────────────────

    /// Process exactly one event.  Returns `Ok(false)` when the queue is empty.
    pub fn step(&self) -> LsimResult<bool> {
        self.step_inner().map(|fired| fired.is_some())
    }

    fn step_inner(&self) -> LsimResult<Option<EventId>> {
        let next = self.core.queue.borrow_mut().pop();
        let Some(Scheduled { at, event, .. }) = next else {
            return Ok(None);
        };
        if at > self.core.now.get() {
            self.core.now.set(at);
        }
        trace!(t = at, event = %event.id(), "step");
        event.fire(&self.core);
        self.core.steps.set(self.core.steps.get() + 1);

        match self.core.failure.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(Some(event.id())),
        }
    }

    /// Run until the queue drains or the next event is at or after `until`.
    ///
    /// With a finite `until`, the clock is left at exactly `until`.
    pub fn run(&self, until: Option<SimTime>) -> LsimResult<()> {
        self.run_observed(until, &mut NoopObserver)
    }

    /// Run until `config.until`.
    pub fn run_configured(&self) -> LsimResult<()> {
        self.run(self.core.config.until)
    }

    /// [`run`](Self::run) with observer callbacks after every step.
    pub fn run_observed<O: EnvObserver>(
        &self,
        until:    Option<SimTime>,
        observer: &mut O,
    ) -> LsimResult<()> {
        if let Some(u) = until {
            if u.is_nan() || u < self.now() {
                return Err(LsimError::Config(format!(
                    "until ({u}) must not lie before now ({})",
                    self.now()
                )));
            }
        }
        loop {
            let Some(t) = self.peek() else { break };
            if until.is_some_and(|u| t >= u) {
                break;
            }
            if let Some(id) = self.step_inner()? {
                observer.on_step(self.now(), id);
            }
        }
        if let Some(u) = until.filter(|u| u.is_finite()) {
            self.core.now.set(u);
        }
        observer.on_run_end(self.now());
        Ok(())
    }

    /// Step until `event` has been processed and return its value.
    pub fn run_until(&self, event: &Event) -> LsimResult<EventValue> {
        while !event.is_processed() {
            if !self.step()? {
                return Err(LsimError::Invariant(format!(
                    "queue drained before {} triggered",
                    event.id()
                )));
            }
        }
        Ok(event.value().unwrap_or_default())
    }

    /// Drop every suspended process and queued event.
    ///
    /// Processes hold handles to the environment, so a finished run keeps its
    /// object graph alive until this is called.
    pub fn close(&self) {
        let processes = std::mem::take(&mut *self.core.processes.borrow_mut());
        drop(processes);
        let queue = std::mem::take(&mut *self.core.queue.borrow_mut());
        drop(queue);
    }

    // ── Id allocation ─────────────────────────────────────────────────────

    pub(crate) fn next_process_id(&self) -> ProcessId {
        ProcessId(bump(&self.core.counters.process))
    }

    pub(crate) fn next_resource_id(&self) -> ResourceId {
        ResourceId(bump(&self.core.counters.resource))
    }

    pub(crate) fn next_request_id(&self) -> RequestId {
        RequestId(bump(&self.core.counters.request))
    }

    pub(crate) fn next_container_id(&self) -> ContainerId {
        ContainerId(bump(&self.core.counters.container))
    }
}
