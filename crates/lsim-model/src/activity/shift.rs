//! Shifting an amount from one container to another.
//!
//! A shift first books its amount on the reservation twins of both slots
//! (at registration), so concurrent shifts cannot plan more than origin
//! holds or destination can take.  At run time it:
//!
//! 1. waits for the booking;
//! 2. takes the destination's resource, then fixes the amount;
//! 3. waits until origin has the amount and destination the room, takes the
//!    processor, checks the parties are co-located, takes origin's resource
//!    and re-checks the levels (retrying from 3 when they changed meanwhile);
//! 4. moves the material, taking `duration` or the processor's rate.
//!
//! Booked but unshifted amounts are handed back to the twins.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use lsim_core::{LsimError, LsimResult, SimTime};
use lsim_engine::{DEFAULT_SLOT, EPSILON, Event, LevelOp, reservation_slot};

use super::Activity;
use crate::entity::Entity;
use crate::logbook::ActivityState;

/// Which processor rate drives the duration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Rate of filling the destination.
    Loading,
    /// Rate of emptying the origin.
    Unloading,
}

/// Parties and amount of a shift.  Give either a `duration` or a `phase`.
#[derive(Debug)]
pub struct ShiftSpec {
    pub processor:   Rc<Entity>,
    pub origin:      Rc<Entity>,
    pub destination: Rc<Entity>,
    pub amount:      Option<f64>,
    pub duration:    Option<SimTime>,
    pub phase:       Option<Phase>,
    pub slot:        String,
    reserved:        Cell<f64>,
    reservation:     RefCell<Option<Event>>,
}

impl ShiftSpec {
    pub fn new(processor: &Rc<Entity>, origin: &Rc<Entity>, destination: &Rc<Entity>) -> Self {
        Self {
            processor:   Rc::clone(processor),
            origin:      Rc::clone(origin),
            destination: Rc::clone(destination),
            amount:      None,
            duration:    None,
            phase:       None,
            slot:        DEFAULT_SLOT.to_owned(),
            reserved:    Cell::new(0.0),
            reservation: RefCell::new(None),
        }
    }

    /// Shift exactly `amount`, waiting for it if necessary.
    pub fn amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn duration(mut self, duration: SimTime) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = slot.into();
        self
    }

    /// Amount booked by the latest registration.
    pub fn reserved_amount(&self) -> f64 {
        self.reserved.get()
    }

    pub(super) fn validate(&self, activity: &str) -> LsimResult<()> {
        match (self.duration, self.phase) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(LsimError::Config(format!(
                    "{activity}: give either a duration or a phase"
                )));
            }
            (Some(d), None) if !d.is_finite() || d < 0.0 => {
                return Err(LsimError::Config(format!(
                    "{activity}: duration must be finite and non-negative, got {d}"
                )));
            }
            (None, Some(_)) => {
                self.processor.processor()?;
            }
            (Some(_), None) => {}
        }
        if let Some(a) = self.amount {
            if !a.is_finite() || a <= 0.0 {
                return Err(LsimError::Config(format!(
                    "{activity}: amount must be positive, got {a}"
                )));
            }
        }
        self.processor.resource()?;
        self.origin.resource()?;
        self.destination.resource()?;
        self.origin.container()?.capacity(&self.slot)?;
        self.destination.container()?.capacity(&self.slot)?;
        Ok(())
    }
}

// ── Reservation ───────────────────────────────────────────────────────────────

/// Book the shift's amount on both reservation twins.
pub(super) fn make_container_reservation(activity: &Activity, spec: &ShiftSpec) -> LsimResult<()> {
    let origin = spec.origin.container()?;
    let destination = spec.destination.container()?;
    let twin = reservation_slot(&spec.slot);
    let origin_capacity = origin.capacity(&spec.slot)?;
    let destination_capacity = destination.capacity(&spec.slot)?;

    let reserved = match spec.amount {
        Some(amount) => {
            if amount > origin_capacity + EPSILON || amount > destination_capacity + EPSILON {
                return Err(LsimError::Precondition(format!(
                    "{}: amount {amount} exceeds a container capacity",
                    activity.name()
                )));
            }
            amount
        }
        None => {
            let full = origin_capacity.min(destination_capacity);
            let planned = origin
                .level(&twin)?
                .min(destination_capacity - destination.level(&twin)?);
            if planned > EPSILON { full.min(planned) } else { full }
        }
    };

    let taken = origin.get(reserved, &twin)?;
    let booked = destination.put(reserved, &twin)?;
    spec.reserved.set(reserved);
    *spec.reservation.borrow_mut() = Some(activity.env().all_of(vec![taken, booked]));
    trace!(activity = activity.name(), reserved, "shift reservation booked");
    Ok(())
}

// ── Acquisition ───────────────────────────────────────────────────────────────

/// Wait for the booking, the levels and the resources.  Returns the amount.
pub(super) async fn stage(activity: &Activity, spec: &ShiftSpec) -> LsimResult<f64> {
    let reservation = spec.reservation.borrow().clone();
    if let Some(booked) = reservation {
        booked.await;
    }
    let env = activity.env();
    let slot = spec.slot.as_str();
    let origin = spec.origin.container()?;
    let destination = spec.destination.container()?;
    let (processor_res, origin_res) = (spec.processor.resource()?, spec.origin.resource()?);

    activity.acquire(spec.destination.resource()?).await;
    let amount = determine_amount(activity, spec)?;

    loop {
        let stocked = origin.get_available(slot, amount)?;
        let room = destination.get_room(slot, amount)?;
        env.all_of(vec![stocked, room]).await;

        let processor_new = activity.acquire(processor_res).await;
        check_co_located(activity, spec)?;
        if !servable(spec, amount)? {
            if processor_new {
                activity.drop_request(processor_res)?;
            }
            continue;
        }

        let origin_new = activity.acquire(origin_res).await;
        if !servable(spec, amount)? {
            if origin_new {
                activity.drop_request(origin_res)?;
            }
            if processor_new {
                activity.drop_request(processor_res)?;
            }
            continue;
        }
        return Ok(amount);
    }
}

fn determine_amount(activity: &Activity, spec: &ShiftSpec) -> LsimResult<f64> {
    if let Some(amount) = spec.amount {
        return Ok(amount);
    }
    let origin = spec.origin.container()?;
    let destination = spec.destination.container()?;
    let room = destination.capacity(&spec.slot)? - destination.level(&spec.slot)?;
    let amount = spec.reserved.get().min(origin.level(&spec.slot)?).min(room);
    if amount <= EPSILON {
        return Err(LsimError::NoViableAmount { activity: activity.name().to_owned() });
    }
    Ok(amount)
}

/// Origin holds `amount` and destination has room for it.
fn servable(spec: &ShiftSpec, amount: f64) -> LsimResult<bool> {
    let origin = spec.origin.container()?;
    let destination = spec.destination.container()?;
    let capacity = destination.capacity(&spec.slot)?;
    Ok(LevelOp::Ge.holds(origin.level(&spec.slot)?, amount)
        && LevelOp::Le.holds(destination.level(&spec.slot)?, capacity - amount))
}

/// Processor and destination must be at origin.  Skipped for entities
/// without a location.
fn check_co_located(activity: &Activity, spec: &ShiftSpec) -> LsimResult<()> {
    let tolerance = activity.env().config().location_tolerance_m;
    for party in [&spec.processor, &spec.destination] {
        if !(party.has_geometry() && spec.origin.has_geometry()) {
            continue;
        }
        let distance = party.distance_to(&spec.origin)?;
        if distance > tolerance {
            return Err(LsimError::NotCoLocated {
                what:        party.name().to_owned(),
                site:        spec.origin.name().to_owned(),
                distance_m:  distance,
                tolerance_m: tolerance,
            });
        }
    }
    Ok(())
}

// ── Body ──────────────────────────────────────────────────────────────────────

pub(super) async fn body(activity: &Activity, spec: &ShiftSpec, amount: f64) -> LsimResult<()> {
    let env = activity.env();
    let slot = spec.slot.as_str();
    let origin = spec.origin.container()?;
    let destination = spec.destination.container()?;

    let duration = match (spec.duration, spec.phase) {
        (Some(d), _) => d,
        (None, Some(Phase::Loading)) => {
            spec.processor.processor()?.loading(&spec.destination, amount, slot)?
        }
        (None, Some(Phase::Unloading)) => {
            spec.processor.processor()?.unloading(&spec.origin, amount, slot)?
        }
        (None, None) => {
            return Err(LsimError::Invariant(format!(
                "{}: shift without duration or phase",
                activity.name()
            )));
        }
    };
    let twin = reservation_slot(slot);
    let unused = spec.reserved.get() - amount;

    let requested_at = env.now();
    origin.get(amount, slot)?.await;
    if unused > EPSILON {
        origin.put(unused, &twin)?;
    }
    if env.now() > requested_at {
        activity.log_state_at(requested_at, ActivityState::WaitStart, None);
        activity.log_state(ActivityState::WaitStop, None);
    }

    env.timeout(duration)?.await;

    destination.put(amount, slot)?.await;
    if unused > EPSILON {
        destination.get(unused, &twin)?;
    }
    trace!(activity = activity.name(), amount, t = env.now(), "shift done");
    Ok(())
}
