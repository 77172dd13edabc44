//! The activity tree.
//!
//! # Lifecycle
//!
//! ```text
//! built ──register()──▶ delayed ──parent + start_event──▶ running ──▶ done
//! ```
//!
//! `register()` wires a composite's children, books a shift's reservation,
//! checks that the start expressions refer to registered activities and
//! spawns the activity's process.  The
//! process:
//!
//! 1. awaits the parent's sequencing event, then evaluates and awaits its
//!    own `start_event` until it holds on resumption (a wait longer than
//!    zero on the latter is logged as a WAIT pair);
//! 2. acquires what the kind needs (mover, processor, sites);
//! 3. logs `START`, runs pre-process plug-ins, the body, post-process
//!    plug-ins, logs `STOP` (also when a plug-in or the body fails);
//! 4. releases resources not listed in `keep_resources`.
//!
//! The process's *done* event is the activity's completion signal.

mod basic;
mod parallel;
mod sequential;
mod shift;
mod travel;
mod while_loop;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use lsim_core::{ActivityId, LsimError, LsimResult, ResourceId, SimTime};
use lsim_engine::{Environment, Event, EventValue, LocalBoxFuture, Process, Request, Resource};

use crate::entity::Entity;
use crate::expr::Expr;
use crate::logbook::{ActivityLabel, ActivityState, Logbook, Loggable};
use crate::plugin::Plugin;
use crate::registry::Registry;

pub use shift::{Phase, ShiftSpec};
pub use travel::MoveSpec;

// ── Resource tokens ───────────────────────────────────────────────────────────

/// A granted (or queued) request together with the resource it was made on.
#[derive(Clone, Debug)]
pub struct HeldResource {
    pub resource: Resource,
    pub request:  Request,
}

/// Requests held by one or more activities, keyed by resource.
///
/// Activities built with the same map reuse each other's kept requests
/// instead of queueing again.
pub type ResourceTokens = Rc<RefCell<FxHashMap<ResourceId, HeldResource>>>;

// ── Kinds ─────────────────────────────────────────────────────────────────────

/// Children of a composite plus the event that releases the first of them.
pub struct Composite {
    sub:   Vec<Rc<Activity>>,
    start: RefCell<Option<Event>>,
}

impl Composite {
    fn new(sub: Vec<Rc<Activity>>) -> Self {
        Self { sub, start: RefCell::new(None) }
    }

    pub fn sub_activities(&self) -> &[Rc<Activity>] {
        &self.sub
    }

    /// New start event; the first child waits for it, every later child for
    /// its predecessor.
    pub(crate) fn arm_sequence(&self, env: &Environment) -> Event {
        let start = env.event();
        for (i, child) in self.sub.iter().enumerate() {
            let parent = match i {
                0 => Expr::Event(start.clone()),
                _ => Expr::done_id(self.sub[i - 1].id()),
            };
            child.set_start_event_parent(Some(parent));
        }
        *self.start.borrow_mut() = Some(start.clone());
        start
    }

    /// New start event shared by every child.
    pub(crate) fn arm_parallel(&self, env: &Environment) -> Event {
        let start = env.event();
        for child in &self.sub {
            child.set_start_event_parent(Some(Expr::Event(start.clone())));
        }
        *self.start.borrow_mut() = Some(start.clone());
        start
    }

    fn start_event(&self) -> LsimResult<Event> {
        self.start
            .borrow()
            .clone()
            .ok_or_else(|| LsimError::Invariant("composite ran before it was registered".into()))
    }
}

/// Loop body, stop condition and iteration bound of a `While`.
pub struct WhileSpec {
    body:           Composite,
    condition:      Expr,
    max_iterations: u64,
}

impl WhileSpec {
    pub fn condition(&self) -> &Expr {
        &self.condition
    }

    pub fn max_iterations(&self) -> u64 {
        self.max_iterations
    }
}

/// What an activity does.
pub enum ActivityKind {
    Basic { duration: SimTime },
    Move(MoveSpec),
    ShiftAmount(ShiftSpec),
    Sequential(Composite),
    Parallel(Composite),
    While(WhileSpec),
}

impl ActivityKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActivityKind::Basic { .. } => "BasicActivity",
            ActivityKind::Move(_) => "MoveActivity",
            ActivityKind::ShiftAmount(_) => "ShiftAmountActivity",
            ActivityKind::Sequential(_) => "SequentialActivity",
            ActivityKind::Parallel(_) => "ParallelActivity",
            ActivityKind::While(_) => "WhileActivity",
        }
    }

    pub fn sub_activities(&self) -> &[Rc<Activity>] {
        match self {
            ActivityKind::Sequential(c) | ActivityKind::Parallel(c) => c.sub_activities(),
            ActivityKind::While(w) => w.body.sub_activities(),
            _ => &[],
        }
    }

    /// `true` when children run one after the other.
    pub fn runs_in_sequence(&self) -> bool {
        matches!(self, ActivityKind::Sequential(_) | ActivityKind::While(_))
    }
}

/// What the acquisition phase hands to the body.
enum Staged {
    Ready,
    Shift { amount: f64 },
}

// ── Activity ──────────────────────────────────────────────────────────────────

pub struct Activity {
    id:                  ActivityId,
    name:                String,
    env:                 Environment,
    registry:            Registry,
    log:                 Logbook,
    start_event:         Option<Expr>,
    start_event_parent:  RefCell<Option<Expr>>,
    requested_resources: ResourceTokens,
    keep_resources:      Vec<ResourceId>,
    additional_logs:     Vec<Rc<Entity>>,
    plugins:             Vec<(i32, Rc<dyn Plugin>)>,
    kind:                ActivityKind,
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind.type_name())
            .field("sub_processes", &self.kind.sub_activities().len())
            .finish_non_exhaustive()
    }
}

impl Loggable for Activity {
    fn logbook(&self) -> &Logbook {
        &self.log
    }
}

impl Activity {
    // ── Accessors ─────────────────────────────────────────────────────────

    #[inline]
    pub fn id(&self) -> ActivityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn log(&self) -> &Logbook {
        &self.log
    }

    pub fn kind(&self) -> &ActivityKind {
        &self.kind
    }

    pub fn sub_activities(&self) -> &[Rc<Activity>] {
        self.kind.sub_activities()
    }

    pub fn start_event(&self) -> Option<&Expr> {
        self.start_event.as_ref()
    }

    pub fn requested_resources(&self) -> &ResourceTokens {
        &self.requested_resources
    }

    pub fn keep_resources(&self) -> &[ResourceId] {
        &self.keep_resources
    }

    pub fn additional_logs(&self) -> &[Rc<Entity>] {
        &self.additional_logs
    }

    pub(crate) fn set_start_event_parent(&self, parent: Option<Expr>) {
        *self.start_event_parent.borrow_mut() = parent;
    }

    /// The main process of the latest registration.
    pub fn main_process(&self) -> Option<Process> {
        self.registry.main(self.id)
    }

    /// The done event of the latest registration.
    pub fn done_event(&self) -> LsimResult<Event> {
        self.main_process()
            .map(|p| p.done().clone())
            .ok_or_else(|| LsimError::NotRegistered(self.name.clone()))
    }

    pub fn is_done(&self) -> bool {
        self.main_process().is_some_and(|p| p.done().is_processed())
    }

    // ── Logging ───────────────────────────────────────────────────────────

    /// Record `state` now on this activity and on every additional log.
    pub fn log_state(&self, state: ActivityState, label: Option<ActivityLabel>) {
        self.log_state_at(self.env.now(), state, label);
    }

    pub fn log_state_at(&self, t: SimTime, state: ActivityState, label: Option<ActivityLabel>) {
        self.log_entry(t, self.id, state, label.clone());
        for entity in &self.additional_logs {
            entity.log_entry(t, self.id, state, label.clone());
        }
    }

    // ── Registration ──────────────────────────────────────────────────────

    /// Prepare this activity for one execution and spawn its process.
    ///
    /// Activities referenced by the start expressions must be registered
    /// first; [`register_processes`](crate::register_processes) takes care
    /// of the order.
    pub fn register(self: &Rc<Self>) -> LsimResult<()> {
        match &self.kind {
            ActivityKind::Sequential(c) => {
                c.arm_sequence(&self.env);
            }
            ActivityKind::While(w) => {
                w.body.arm_sequence(&self.env);
            }
            ActivityKind::Parallel(c) => {
                c.arm_parallel(&self.env);
            }
            ActivityKind::ShiftAmount(spec) => shift::make_container_reservation(self, spec)?,
            ActivityKind::Basic { .. } | ActivityKind::Move(_) => {}
        }

        let parent = self
            .start_event_parent
            .borrow()
            .as_ref()
            .map(|e| e.evaluate(&self.env, &self.registry))
            .transpose()?;
        if let Some(expr) = &self.start_event {
            expr.check(&self.registry)?;
        }

        let process = self.env.process(Rc::clone(self).delayed_main(parent));
        debug!(
            activity = %self.name,
            id = %self.id,
            process = %process.id(),
            t = self.env.now(),
            "activity registered"
        );
        self.registry.set_main(self.id, process);
        Ok(())
    }

    async fn delayed_main(self: Rc<Self>, parent: Option<Event>) -> LsimResult<EventValue> {
        if let Some(parent) = parent {
            parent.await;
        }
        if let Some(expr) = &self.start_event {
            let waiting_since = self.env.now();
            // A level can drop again between triggering and resuming.
            loop {
                expr.evaluate(&self.env, &self.registry)?.await;
                if expr.holds(&self.env, &self.registry)? {
                    break;
                }
            }
            if self.env.now() > waiting_since {
                self.log_state_at(waiting_since, ActivityState::WaitStart, None);
                self.log_state(ActivityState::WaitStop, None);
            }
        }
        self.main_process_function().await?;
        Ok(EventValue::Empty)
    }

    fn main_process_function(self: Rc<Self>) -> LocalBoxFuture<'static, LsimResult<()>> {
        Box::pin(async move {
            let staged = self.stage().await?;
            let start = self.env.now();
            self.log_state(ActivityState::Start, None);
            let outcome = self.run_body(start, staged).await;
            self.log_state(ActivityState::Stop, None);
            outcome?;
            self.release_used()
        })
    }

    async fn run_body(&self, start: SimTime, staged: Staged) -> LsimResult<()> {
        self.run_hooks(true, start).await?;
        self.body(staged).await?;
        self.run_hooks(false, start).await
    }

    async fn run_hooks(&self, pre: bool, start: SimTime) -> LsimResult<()> {
        for (_, plugin) in &self.plugins {
            let outcome = if pre {
                plugin.pre_process(self, start).await
            } else {
                plugin.post_process(self, start).await
            };
            outcome.map_err(|source| LsimError::Plugin {
                plugin: plugin.name().to_owned(),
                source: Box::new(source),
            })?;
        }
        Ok(())
    }

    async fn stage(&self) -> LsimResult<Staged> {
        match &self.kind {
            ActivityKind::Move(spec) => {
                travel::stage(self, spec).await?;
                Ok(Staged::Ready)
            }
            ActivityKind::ShiftAmount(spec) => {
                let amount = shift::stage(self, spec).await?;
                Ok(Staged::Shift { amount })
            }
            _ => Ok(Staged::Ready),
        }
    }

    fn body<'a>(&'a self, staged: Staged) -> LocalBoxFuture<'a, LsimResult<()>> {
        Box::pin(async move {
            match (&self.kind, staged) {
                (ActivityKind::Basic { duration }, _) => basic::body(self, *duration).await,
                (ActivityKind::Move(spec), _) => travel::body(self, spec).await,
                (ActivityKind::ShiftAmount(spec), Staged::Shift { amount }) => {
                    shift::body(self, spec, amount).await
                }
                (ActivityKind::ShiftAmount(_), Staged::Ready) => Err(LsimError::Invariant(
                    format!("{}: shift body reached without an amount", self.name),
                )),
                (ActivityKind::Sequential(c), _) => sequential::body(self, c).await,
                (ActivityKind::Parallel(c), _) => parallel::body(self, c).await,
                (ActivityKind::While(w), _) => while_loop::body(self, w).await,
            }
        })
    }

    // ── Resources ─────────────────────────────────────────────────────────

    /// Wait for a unit of `resource`.  Returns `true` when a new request was
    /// made, `false` when the token map already held one.
    pub(crate) async fn acquire(&self, resource: &Resource) -> bool {
        let held = self
            .requested_resources
            .borrow()
            .get(&resource.id())
            .map(|h| h.request.event.clone());
        if let Some(granted) = held {
            granted.await;
            return false;
        }
        let request = resource.request();
        let granted = request.event.clone();
        self.requested_resources
            .borrow_mut()
            .insert(resource.id(), HeldResource { resource: resource.clone(), request });
        granted.await;
        true
    }

    /// Hand back the request on `resource`, ignoring `keep_resources`.
    pub(crate) fn drop_request(&self, resource: &Resource) -> LsimResult<()> {
        let held = self.requested_resources.borrow_mut().remove(&resource.id());
        match held {
            Some(h) => h.resource.release(h.request.token),
            None => Ok(()),
        }
    }

    /// Release `resource` unless it is to be kept.
    pub(crate) fn release(&self, resource: &Resource) -> LsimResult<()> {
        if self.keep_resources.contains(&resource.id()) {
            return Ok(());
        }
        self.drop_request(resource)
    }

    fn release_used(&self) -> LsimResult<()> {
        match &self.kind {
            ActivityKind::Move(spec) => self.release(spec.mover.resource()?),
            ActivityKind::ShiftAmount(spec) => {
                self.release(spec.processor.resource()?)?;
                self.release(spec.origin.resource()?)?;
                self.release(spec.destination.resource()?)
            }
            _ => Ok(()),
        }
    }
}

// ── ActivityBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Activity`].  The terminal method picks the kind.
///
/// ```rust,ignore
/// let sail = ActivityBuilder::new(&env, &registry, "sailing empty")
///     .additional_log(Rc::clone(&vessel))
///     .travel(MoveSpec::new(&vessel, &from_site))?;
/// ```
pub struct ActivityBuilder {
    env:                 Environment,
    registry:            Registry,
    name:                String,
    id:                  Option<ActivityId>,
    start_event:         Option<Expr>,
    requested_resources: Option<ResourceTokens>,
    keep_resources:      Vec<ResourceId>,
    additional_logs:     Vec<Rc<Entity>>,
    plugins:             Vec<(i32, Rc<dyn Plugin>)>,
}

impl ActivityBuilder {
    pub fn new(env: &Environment, registry: &Registry, name: impl Into<String>) -> Self {
        Self {
            env:                 env.clone(),
            registry:            registry.clone(),
            name:                name.into(),
            id:                  None,
            start_event:         None,
            requested_resources: None,
            keep_resources:      Vec::new(),
            additional_logs:     Vec::new(),
            plugins:             Vec::new(),
        }
    }

    pub fn id(mut self, id: ActivityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn start_event(mut self, expr: Expr) -> Self {
        self.start_event = Some(expr);
        self
    }

    /// Share a token map with other activities.
    pub fn requested_resources(mut self, tokens: ResourceTokens) -> Self {
        self.requested_resources = Some(tokens);
        self
    }

    pub fn keep_resource(mut self, resource: &Resource) -> Self {
        self.keep_resources.push(resource.id());
        self
    }

    pub fn additional_log(mut self, entity: Rc<Entity>) -> Self {
        self.additional_logs.push(entity);
        self
    }

    /// Lower priorities run first; equal priorities keep insertion order.
    pub fn plugin(mut self, priority: i32, plugin: Rc<dyn Plugin>) -> Self {
        self.plugins.push((priority, plugin));
        self
    }

    // ── Terminal methods ──────────────────────────────────────────────────

    pub fn basic(self, duration: SimTime) -> LsimResult<Rc<Activity>> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(LsimError::Config(format!(
                "{}: duration must be finite and non-negative, got {duration}",
                self.name
            )));
        }
        self.finish(ActivityKind::Basic { duration })
    }

    pub fn travel(self, spec: MoveSpec) -> LsimResult<Rc<Activity>> {
        spec.validate(&self.name)?;
        self.finish(ActivityKind::Move(spec))
    }

    pub fn shift_amount(self, spec: ShiftSpec) -> LsimResult<Rc<Activity>> {
        spec.validate(&self.name)?;
        self.finish(ActivityKind::ShiftAmount(spec))
    }

    pub fn sequential(self, sub: Vec<Rc<Activity>>) -> LsimResult<Rc<Activity>> {
        self.check_children(&sub)?;
        self.finish(ActivityKind::Sequential(Composite::new(sub)))
    }

    pub fn parallel(self, sub: Vec<Rc<Activity>>) -> LsimResult<Rc<Activity>> {
        self.check_children(&sub)?;
        self.finish(ActivityKind::Parallel(Composite::new(sub)))
    }

    /// Repeat `sub` in sequence until `condition` holds at the loop head or
    /// `max_iterations` runs are done (default from the configuration).
    pub fn while_(
        self,
        sub:            Vec<Rc<Activity>>,
        condition:      Expr,
        max_iterations: Option<u64>,
    ) -> LsimResult<Rc<Activity>> {
        self.check_children(&sub)?;
        let max_iterations =
            max_iterations.unwrap_or(self.env.config().default_max_iterations);
        if max_iterations == 0 {
            return Err(LsimError::Config(format!(
                "{}: max_iterations must be at least 1",
                self.name
            )));
        }
        self.finish(ActivityKind::While(WhileSpec {
            body: Composite::new(sub),
            condition,
            max_iterations,
        }))
    }

    /// Run `sub` in sequence exactly `repetitions` times.
    pub fn repeat(mut self, sub: Vec<Rc<Activity>>, repetitions: u64) -> LsimResult<Rc<Activity>> {
        let id = *self.id.get_or_insert_with(ActivityId::new_v4);
        self.while_(sub, Expr::done_id(id), Some(repetitions))
    }

    fn check_children(&self, sub: &[Rc<Activity>]) -> LsimResult<()> {
        for child in sub {
            if !child.registry.same_as(&self.registry) || !child.env.same_as(&self.env) {
                return Err(LsimError::Config(format!(
                    "{}: child {:?} belongs to another environment or registry",
                    self.name, child.name
                )));
            }
        }
        Ok(())
    }

    fn finish(self, kind: ActivityKind) -> LsimResult<Rc<Activity>> {
        let id = self.id.unwrap_or_else(ActivityId::new_v4);
        if self.registry.contains(id) {
            return Err(LsimError::Config(format!("activity id {id} is already in use")));
        }
        let mut plugins = self.plugins;
        plugins.sort_by_key(|(priority, _)| *priority);

        let activity = Rc::new(Activity {
            id,
            name: self.name,
            env: self.env,
            registry: self.registry,
            log: Logbook::new(),
            start_event: self.start_event,
            start_event_parent: RefCell::new(None),
            requested_resources: self.requested_resources.unwrap_or_default(),
            keep_resources: self.keep_resources,
            additional_logs: self.additional_logs,
            plugins,
            kind,
        });
        activity.registry.add(id, &activity.name);
        debug!(activity = %activity.name, id = %id, kind = activity.kind.type_name(), "activity built");
        Ok(activity)
    }
}
