//! Unit tests for lsim-model.

use std::rc::Rc;

use serde_json::json;

use lsim_core::{ErrorKind, GeoPoint, LsimError, LsimResult, SimTime};
use lsim_engine::{
    DEFAULT_SLOT, Environment, EventValue, LevelOp, LocalBoxFuture, reservation_slot,
};

use crate::{
    Activity, ActivityBuilder, ActivityLabel, ActivityState, Concepts, DelayPlugin, Entity,
    EntityBuilder, Expr, LabelKind, Loggable, MoveSpec, Phase, Plugin, Processor, Rate, Registry,
    ShiftSpec, Speed, register_processes,
};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

fn model() -> (Environment, Registry) {
    (Environment::new(), Registry::new())
}

const QUAY: GeoPoint = GeoPoint { x: 4.18, y: 52.18 };
const DUMP: GeoPoint = GeoPoint { x: 4.25, y: 52.11 };

fn site(env: &Environment, name: &str, at: GeoPoint, capacity: f64, level: f64, nr: usize) -> Rc<Entity> {
    EntityBuilder::new(name)
        .at(at)
        .container(capacity, level)
        .resource(nr)
        .build(env)
        .unwrap()
}

fn level(entity: &Entity) -> f64 {
    entity.container().unwrap().level(DEFAULT_SLOT).unwrap()
}

fn basic(env: &Environment, registry: &Registry, name: &str, duration: SimTime) -> Rc<Activity> {
    ActivityBuilder::new(env, registry, name).basic(duration).unwrap()
}

/// Times of the records of `activity` in its own logbook carrying `state`
/// and a label of `kind`.
fn labelled(activity: &Activity, state: ActivityState, kind: LabelKind) -> Vec<SimTime> {
    activity
        .log()
        .records()
        .iter()
        .filter(|r| {
            r.activity_state == state && r.activity_label.as_ref().is_some_and(|l| l.kind == kind)
        })
        .map(|r| r.t)
        .collect()
}

struct FailingPlugin;

impl Plugin for FailingPlugin {
    fn name(&self) -> &str {
        "failing"
    }

    fn pre_process<'a>(
        &'a self,
        _activity:   &'a Activity,
        _start_time: SimTime,
    ) -> LocalBoxFuture<'a, LsimResult<()>> {
        Box::pin(async { Err::<(), _>(LsimError::Precondition("hook refused".into())) })
    }
}

// ── Basic, sequencing and start events ────────────────────────────────────────

#[cfg(test)]
mod basics {
    use super::*;

    #[test]
    fn basic_logs_start_and_stop() {
        let (env, registry) = model();
        let a = basic(&env, &registry, "wait", 12.5);
        register_processes(&[a.clone()]).unwrap();
        env.run(None).unwrap();

        assert_eq!(a.log().first_time(a.id(), ActivityState::Start), Some(0.0));
        assert_eq!(a.log().first_time(a.id(), ActivityState::Stop), Some(12.5));
        assert!(a.is_done());
        assert_eq!(env.now(), 12.5);
    }

    #[test]
    fn additional_logs_receive_the_records() {
        let (env, registry) = model();
        let vessel = site(&env, "vessel", QUAY, 10.0, 3.0, 1);
        let a = ActivityBuilder::new(&env, &registry, "idle")
            .additional_log(Rc::clone(&vessel))
            .basic(4.0)
            .unwrap();
        register_processes(&[a.clone()]).unwrap();
        env.run(None).unwrap();

        let records = vessel.logbook().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].activity_state, ActivityState::Stop);
        assert_eq!(records[1].object_state.levels.get(DEFAULT_SLOT), Some(&3.0));
        assert_eq!(records[1].object_state.geometry, Some(QUAY));
    }

    #[test]
    fn sequential_runs_children_back_to_back() {
        let (env, registry) = model();
        let a = basic(&env, &registry, "a", 3.0);
        let b = basic(&env, &registry, "b", 4.0);
        let seq = ActivityBuilder::new(&env, &registry, "seq")
            .sequential(vec![a.clone(), b.clone()])
            .unwrap();
        register_processes(&[seq.clone()]).unwrap();
        env.run(None).unwrap();

        assert_eq!(b.log().first_time(b.id(), ActivityState::Start), Some(3.0));
        assert_eq!(seq.log().first_time(seq.id(), ActivityState::Stop), Some(7.0));
        assert_eq!(labelled(&seq, ActivityState::Start, LabelKind::Subprocess), vec![0.0, 3.0]);
        assert_eq!(labelled(&seq, ActivityState::Stop, LabelKind::Subprocess), vec![3.0, 7.0]);
        let spans = seq.log().spans();
        assert!(spans.iter().any(|s| s.label == Some(ActivityLabel::subprocess(b.id()))
            && s.start == 3.0
            && s.stop == 7.0));
    }

    #[test]
    fn parallel_stops_follow_completion_order() {
        let (env, registry) = model();
        let slow = basic(&env, &registry, "slow", 9.0);
        let fast = basic(&env, &registry, "fast", 2.0);
        let par = ActivityBuilder::new(&env, &registry, "par")
            .parallel(vec![slow.clone(), fast.clone()])
            .unwrap();
        register_processes(&[par.clone()]).unwrap();
        env.run(None).unwrap();

        assert_eq!(labelled(&par, ActivityState::Start, LabelKind::Subprocess), vec![0.0, 0.0]);
        assert_eq!(labelled(&par, ActivityState::Stop, LabelKind::Subprocess), vec![2.0, 9.0]);
        let stops: Vec<_> = par
            .log()
            .records()
            .iter()
            .filter(|r| r.activity_state == ActivityState::Stop)
            .filter_map(|r| r.activity_label.clone())
            .collect();
        assert_eq!(stops[0], ActivityLabel::subprocess(fast.id()));
        assert_eq!(par.log().first_time(par.id(), ActivityState::Stop), Some(9.0));
    }

    #[test]
    fn time_start_event_logs_a_wait() {
        let (env, registry) = model();
        let a = ActivityBuilder::new(&env, &registry, "later")
            .start_event(Expr::time(100.0))
            .basic(5.0)
            .unwrap();
        register_processes(&[a.clone()]).unwrap();
        env.run(None).unwrap();

        let log = a.log();
        assert_eq!(log.first_time(a.id(), ActivityState::WaitStart), Some(0.0));
        assert_eq!(log.first_time(a.id(), ActivityState::WaitStop), Some(100.0));
        assert_eq!(log.first_time(a.id(), ActivityState::Start), Some(100.0));
        assert_eq!(log.first_time(a.id(), ActivityState::Stop), Some(105.0));
    }

    #[test]
    fn satisfied_start_event_logs_no_wait() {
        let (env, registry) = model();
        let a = ActivityBuilder::new(&env, &registry, "now")
            .start_event(Expr::time(0.0))
            .basic(1.0)
            .unwrap();
        register_processes(&[a.clone()]).unwrap();
        env.run(None).unwrap();
        assert_eq!(a.log().count(a.id(), ActivityState::WaitStart), 0);
        assert_eq!(a.log().count(a.id(), ActivityState::Start), 1);
    }

    #[test]
    fn done_reference_orders_top_level_activities() {
        let (env, registry) = model();
        let second = ActivityBuilder::new(&env, &registry, "second")
            .start_event(Expr::done("first"))
            .basic(2.0)
            .unwrap();
        let first = basic(&env, &registry, "first", 5.0);
        // Listed dependent-first: the registrar still registers "first" earlier.
        register_processes(&[second.clone(), first.clone()]).unwrap();
        env.run(None).unwrap();

        assert_eq!(second.log().first_time(second.id(), ActivityState::WaitStop), Some(5.0));
        assert_eq!(second.log().first_time(second.id(), ActivityState::Stop), Some(7.0));
    }

    #[test]
    fn start_event_is_judged_when_the_predecessor_finishes() {
        let (env, registry) = model();
        let stock = site(&env, "stock", QUAY, 10.0, 6.0, 1);
        let a = basic(&env, &registry, "a", 10.0);
        let b = ActivityBuilder::new(&env, &registry, "b")
            .start_event(Expr::level(&stock, LevelOp::Ge, 5.0, DEFAULT_SLOT))
            .basic(1.0)
            .unwrap();
        let seq = ActivityBuilder::new(&env, &registry, "seq")
            .sequential(vec![a, b.clone()])
            .unwrap();
        register_processes(&[seq]).unwrap();

        let (e, s) = (env.clone(), Rc::clone(&stock));
        env.process(async move {
            e.timeout(5.0)?.await;
            s.container()?.get(6.0, DEFAULT_SLOT)?.await;
            e.timeout(15.0)?.await;
            s.container()?.put(6.0, DEFAULT_SLOT)?.await;
            Ok(EventValue::Empty)
        });
        env.run(None).unwrap();

        // Satisfied at registration, but not once "a" is done.
        let log = b.log();
        assert_eq!(log.first_time(b.id(), ActivityState::WaitStart), Some(10.0));
        assert_eq!(log.first_time(b.id(), ActivityState::WaitStop), Some(20.0));
        assert_eq!(log.first_time(b.id(), ActivityState::Start), Some(20.0));
        assert_eq!(log.first_time(b.id(), ActivityState::Stop), Some(21.0));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let (env, registry) = model();
        let err = ActivityBuilder::new(&env, &registry, "bad").basic(-1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}

// ── Loops ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod loops {
    use super::*;

    #[test]
    fn while_stops_at_max_iterations() {
        let (env, registry) = model();
        let body = basic(&env, &registry, "body", 10.0);
        let never = env.event();
        let w = ActivityBuilder::new(&env, &registry, "loop")
            .while_(vec![body.clone()], Expr::Event(never), Some(3))
            .unwrap();
        register_processes(&[w.clone()]).unwrap();
        env.run(None).unwrap();

        assert_eq!(w.log().first_time(w.id(), ActivityState::Stop), Some(30.0));
        assert_eq!(body.log().count(body.id(), ActivityState::Start), 3);
        assert_eq!(labelled(&w, ActivityState::Stop, LabelKind::Subprocess).len(), 3);
    }

    #[test]
    fn while_with_satisfied_condition_runs_nothing() {
        let (env, registry) = model();
        let body = basic(&env, &registry, "body", 10.0);
        let w = ActivityBuilder::new(&env, &registry, "loop")
            .while_(vec![body.clone()], Expr::time(0.0), None)
            .unwrap();
        register_processes(&[w.clone()]).unwrap();
        env.run(None).unwrap();

        // Time(0) triggers on evaluation; the loop head sees it at once.
        assert_eq!(body.log().count(body.id(), ActivityState::Start), 0);
        assert_eq!(w.log().first_time(w.id(), ActivityState::Stop), Some(0.0));
    }

    #[test]
    fn repeat_runs_exactly_n_times() {
        let (env, registry) = model();
        let a = basic(&env, &registry, "a", 2.0);
        let b = basic(&env, &registry, "b", 3.0);
        let r = ActivityBuilder::new(&env, &registry, "repeat")
            .repeat(vec![a.clone(), b.clone()], 4)
            .unwrap();
        register_processes(&[r.clone()]).unwrap();
        env.run(None).unwrap();

        assert_eq!(a.log().count(a.id(), ActivityState::Stop), 4);
        assert_eq!(b.log().last_time(b.id(), ActivityState::Stop), Some(20.0));
        assert_eq!(r.log().first_time(r.id(), ActivityState::Stop), Some(20.0));
    }

    #[test]
    fn wrapped_condition_ends_the_loop_like_the_bare_one() {
        let (env, registry) = model();
        let to = site(&env, "to_site", QUAY, 10.0, 10.0, 1);
        let bare_body = basic(&env, &registry, "bare body", 1.0);
        let wrapped_body = basic(&env, &registry, "wrapped body", 1.0);
        let bare = ActivityBuilder::new(&env, &registry, "bare")
            .while_(vec![bare_body.clone()], Expr::full(&to), Some(5))
            .unwrap();
        let wrapped = ActivityBuilder::new(&env, &registry, "wrapped")
            .while_(vec![wrapped_body.clone()], Expr::All(vec![Expr::full(&to)]), Some(5))
            .unwrap();
        register_processes(&[bare.clone(), wrapped.clone()]).unwrap();
        env.run(None).unwrap();

        assert_eq!(bare_body.log().count(bare_body.id(), ActivityState::Start), 0);
        assert_eq!(wrapped_body.log().count(wrapped_body.id(), ActivityState::Start), 0);
        assert_eq!(wrapped.log().first_time(wrapped.id(), ActivityState::Stop), Some(0.0));
    }

    #[test]
    fn repeat_does_not_pile_callbacks_on_its_done_event() {
        let (env, registry) = model();
        let a = basic(&env, &registry, "a", 1.0);
        let r = ActivityBuilder::new(&env, &registry, "repeat")
            .repeat(vec![a.clone()], 50)
            .unwrap();
        register_processes(&[r.clone()]).unwrap();

        env.run(Some(2.5)).unwrap();
        let early = r.done_event().unwrap().pending_callbacks();
        env.run(Some(25.5)).unwrap();
        assert_eq!(a.log().count(a.id(), ActivityState::Stop), 25);
        assert_eq!(r.done_event().unwrap().pending_callbacks(), early);
    }

    #[test]
    fn zero_max_iterations_is_rejected() {
        let (env, registry) = model();
        let body = basic(&env, &registry, "body", 1.0);
        let err = ActivityBuilder::new(&env, &registry, "loop")
            .while_(vec![body], Expr::time(5.0), Some(0))
            .unwrap_err();
        assert!(matches!(err, LsimError::Config(_)));
    }
}

// ── Moving and shifting ───────────────────────────────────────────────────────

#[cfg(test)]
mod logistics {
    use super::*;

    #[test]
    fn single_shift_moves_the_amount() {
        let (env, registry) = model();
        let from = site(&env, "from_site", QUAY, 100.0, 100.0, 1);
        let vessel = site(&env, "vessel", QUAY, 10.0, 0.0, 1);
        let shift = ActivityBuilder::new(&env, &registry, "load")
            .additional_log(Rc::clone(&vessel))
            .shift_amount(ShiftSpec::new(&vessel, &from, &vessel).amount(10.0).duration(60.0))
            .unwrap();
        register_processes(&[shift.clone()]).unwrap();
        env.run(None).unwrap();

        assert_eq!(env.now(), 60.0);
        assert!(approx(level(&from), 90.0));
        assert!(approx(level(&vessel), 10.0));
        assert_eq!(shift.log().first_time(shift.id(), ActivityState::Stop), Some(60.0));
        assert_eq!(vessel.resource().unwrap().count(), 0);
        assert_eq!(from.resource().unwrap().count(), 0);
    }

    /// Shuttle between two sites until the destination is full.
    #[test]
    fn while_shuttles_until_destination_full() {
        let (env, registry) = model();
        let from = site(&env, "from_site", QUAY, 100.0, 100.0, 1);
        let to = site(&env, "to_site", DUMP, 100.0, 0.0, 1);
        let rate = Rate::Curve(Rc::new(|from: f64, to: f64| (to - from).abs() * 0.6));
        let vessel = EntityBuilder::new("vessel")
            .at(QUAY)
            .container(10.0, 0.0)
            .resource(1)
            .processor(Processor::new(rate.clone(), rate))
            .build(&env)
            .unwrap();

        let sail_empty = ActivityBuilder::new(&env, &registry, "sailing empty")
            .travel(MoveSpec::new(&vessel, &from).duration(5.0))
            .unwrap();
        let load = ActivityBuilder::new(&env, &registry, "loading")
            .shift_amount(ShiftSpec::new(&vessel, &from, &vessel).phase(Phase::Loading))
            .unwrap();
        let sail_full = ActivityBuilder::new(&env, &registry, "sailing full")
            .travel(MoveSpec::new(&vessel, &to).duration(5.0))
            .unwrap();
        let unload = ActivityBuilder::new(&env, &registry, "unloading")
            .shift_amount(ShiftSpec::new(&vessel, &vessel, &to).phase(Phase::Unloading))
            .unwrap();
        let cycle = ActivityBuilder::new(&env, &registry, "cycle")
            .while_(
                vec![sail_empty, load.clone(), sail_full, unload.clone()],
                Expr::full(&to),
                None,
            )
            .unwrap();
        register_processes(&[cycle.clone()]).unwrap();
        env.run(None).unwrap();

        assert!(approx(env.now(), 220.0));
        assert!(approx(level(&to), 100.0));
        assert!(approx(level(&from), 0.0));
        assert_eq!(load.log().count(load.id(), ActivityState::Stop), 10);
        let stop = cycle.log().first_time(cycle.id(), ActivityState::Stop).unwrap();
        assert!(approx(stop, 220.0));
        assert_eq!(vessel.geometry().unwrap(), DUMP);
    }

    #[test]
    fn parallel_shifts_share_site_resources() {
        let (env, registry) = model();
        let from = site(&env, "from_site", QUAY, 10.0, 10.0, 2);
        let to = site(&env, "to_site", QUAY, 10.0, 0.0, 2);
        let a = site(&env, "vessel_a", QUAY, 5.0, 0.0, 1);
        let b = site(&env, "vessel_b", QUAY, 5.0, 0.0, 1);
        let shift_a = ActivityBuilder::new(&env, &registry, "shift a")
            .shift_amount(ShiftSpec::new(&a, &from, &to).amount(5.0).duration(1.0))
            .unwrap();
        let shift_b = ActivityBuilder::new(&env, &registry, "shift b")
            .shift_amount(ShiftSpec::new(&b, &from, &to).amount(5.0).duration(1.0))
            .unwrap();
        let par = ActivityBuilder::new(&env, &registry, "both")
            .parallel(vec![shift_a, shift_b])
            .unwrap();
        register_processes(&[par.clone()]).unwrap();
        env.run(None).unwrap();

        assert_eq!(env.now(), 1.0);
        assert!(approx(level(&from), 0.0));
        assert!(approx(level(&to), 10.0));
        assert_eq!(labelled(&par, ActivityState::Stop, LabelKind::Subprocess), vec![1.0, 1.0]);
    }

    #[test]
    fn reservations_prevent_overbooking() {
        let (env, registry) = model();
        let from = site(&env, "from_site", QUAY, 10.0, 10.0, 2);
        let to = site(&env, "to_site", QUAY, 20.0, 0.0, 2);
        let vessel = site(&env, "vessel", QUAY, 10.0, 0.0, 2);
        let first = ActivityBuilder::new(&env, &registry, "first")
            .shift_amount(ShiftSpec::new(&vessel, &from, &to).amount(8.0).duration(3.0))
            .unwrap();
        let second = ActivityBuilder::new(&env, &registry, "second")
            .shift_amount(ShiftSpec::new(&vessel, &from, &to).amount(8.0).duration(3.0))
            .unwrap();
        register_processes(&[first.clone(), second.clone()]).unwrap();
        env.run(None).unwrap();

        assert_eq!(first.log().count(first.id(), ActivityState::Stop), 1);
        assert_eq!(second.log().count(second.id(), ActivityState::Start), 0);
        assert!(approx(level(&from), 2.0));
        assert!(approx(level(&to), 8.0));
        assert!(!second.is_done());
    }

    #[test]
    fn booked_out_shift_runs_after_a_refill() {
        let (env, registry) = model();
        let from = site(&env, "from_site", QUAY, 10.0, 10.0, 2);
        let to = site(&env, "to_site", QUAY, 20.0, 0.0, 2);
        let vessel = site(&env, "vessel", QUAY, 10.0, 0.0, 2);
        let first = ActivityBuilder::new(&env, &registry, "first")
            .shift_amount(ShiftSpec::new(&vessel, &from, &to).amount(8.0).duration(3.0))
            .unwrap();
        let second = ActivityBuilder::new(&env, &registry, "second")
            .shift_amount(ShiftSpec::new(&vessel, &from, &to).amount(8.0).duration(3.0))
            .unwrap();
        register_processes(&[first.clone(), second.clone()]).unwrap();

        // Delivery of 8 at t=6, announced on the reservation twin as well.
        let (e, f) = (env.clone(), Rc::clone(&from));
        env.process(async move {
            e.timeout(6.0)?.await;
            let stock = f.container()?;
            let delivered = stock.put(8.0, DEFAULT_SLOT)?;
            let announced = stock.put(8.0, &reservation_slot(DEFAULT_SLOT))?;
            e.all_of(vec![delivered, announced]).await;
            Ok(EventValue::Empty)
        });
        env.run(None).unwrap();

        assert_eq!(first.log().first_time(first.id(), ActivityState::Stop), Some(3.0));
        assert_eq!(second.log().first_time(second.id(), ActivityState::Start), Some(6.0));
        assert_eq!(second.log().first_time(second.id(), ActivityState::Stop), Some(9.0));
        assert!(approx(level(&from), 2.0));
        assert!(approx(level(&to), 16.0));
        assert!(second.is_done());
    }

    #[test]
    fn emptied_origin_leaves_no_viable_amount() {
        let (env, registry) = model();
        let from = site(&env, "from_site", QUAY, 10.0, 10.0, 1);
        let to = site(&env, "to_site", QUAY, 10.0, 0.0, 1);
        let vessel = site(&env, "vessel", QUAY, 10.0, 0.0, 1);
        let shift = ActivityBuilder::new(&env, &registry, "load")
            .shift_amount(ShiftSpec::new(&vessel, &from, &to).duration(1.0))
            .unwrap();
        register_processes(&[shift.clone()]).unwrap();
        // Booked, then the stock goes elsewhere before the run.
        let taken = from.container().unwrap().get(10.0, DEFAULT_SLOT).unwrap();
        assert!(taken.is_triggered());

        let err = env.run(None).unwrap_err();
        assert!(matches!(err, LsimError::NoViableAmount { ref activity } if activity == "load"));
        assert_eq!(shift.log().count(shift.id(), ActivityState::Start), 0);
        assert!(approx(level(&to), 0.0));
    }

    #[test]
    fn queued_get_on_origin_logs_a_wait() {
        let (env, registry) = model();
        let from = site(&env, "from_site", QUAY, 20.0, 5.0, 1);
        let to = site(&env, "to_site", QUAY, 10.0, 0.0, 1);
        let vessel = site(&env, "vessel", QUAY, 10.0, 0.0, 1);
        let shift = ActivityBuilder::new(&env, &registry, "load")
            .shift_amount(ShiftSpec::new(&vessel, &from, &to).amount(5.0).duration(2.0))
            .unwrap();
        register_processes(&[shift.clone()]).unwrap();
        // A larger get ahead in the queue holds the shift's get back.
        let ahead = from.container().unwrap().get(8.0, DEFAULT_SLOT).unwrap();

        let (e, f) = (env.clone(), Rc::clone(&from));
        env.process(async move {
            e.timeout(4.0)?.await;
            f.container()?.put(8.0, DEFAULT_SLOT)?.await;
            Ok(EventValue::Empty)
        });
        env.run(None).unwrap();

        let log = shift.log();
        assert_eq!(log.first_time(shift.id(), ActivityState::Start), Some(0.0));
        assert_eq!(log.first_time(shift.id(), ActivityState::WaitStart), Some(0.0));
        assert_eq!(log.first_time(shift.id(), ActivityState::WaitStop), Some(4.0));
        assert_eq!(log.first_time(shift.id(), ActivityState::Stop), Some(6.0));
        assert!(ahead.is_processed());
        assert!(approx(level(&from), 0.0));
        assert!(approx(level(&to), 5.0));
    }

    #[test]
    fn move_takes_distance_over_speed() {
        let (env, registry) = model();
        let dump = EntityBuilder::new("dump").at(DUMP).build(&env).unwrap();
        let vessel = EntityBuilder::new("vessel")
            .at(QUAY)
            .resource(1)
            .speed(Speed::Constant(4.0))
            .build(&env)
            .unwrap();
        let expected = vessel.distance_to(&dump).unwrap() / (4.0 * 0.5);
        let sail = ActivityBuilder::new(&env, &registry, "sail")
            .travel(MoveSpec::new(&vessel, &dump).engine_order(0.5))
            .unwrap();
        register_processes(&[sail.clone()]).unwrap();
        env.run(None).unwrap();

        assert!(approx(env.now(), expected));
        assert_eq!(vessel.geometry().unwrap(), DUMP);
    }

    #[test]
    fn kept_resource_is_reused_by_a_sharing_activity() {
        let (env, registry) = model();
        let dump = EntityBuilder::new("dump").at(DUMP).build(&env).unwrap();
        let quay = EntityBuilder::new("quay").at(QUAY).build(&env).unwrap();
        let vessel = site(&env, "vessel", QUAY, 1.0, 0.0, 1);
        let tokens = crate::ResourceTokens::default();
        let out = ActivityBuilder::new(&env, &registry, "out")
            .requested_resources(Rc::clone(&tokens))
            .keep_resource(vessel.resource().unwrap())
            .travel(MoveSpec::new(&vessel, &dump).duration(2.0))
            .unwrap();
        let back = ActivityBuilder::new(&env, &registry, "back")
            .requested_resources(Rc::clone(&tokens))
            .travel(MoveSpec::new(&vessel, &quay).duration(2.0))
            .unwrap();
        let trip = ActivityBuilder::new(&env, &registry, "trip")
            .sequential(vec![out.clone(), back])
            .unwrap();
        register_processes(&[trip]).unwrap();

        env.run(Some(3.0)).unwrap();
        assert_eq!(vessel.resource().unwrap().count(), 1);
        assert_eq!(tokens.borrow().len(), 1);
        env.run(None).unwrap();
        assert_eq!(vessel.resource().unwrap().count(), 0);
        assert!(tokens.borrow().is_empty());
        assert_eq!(env.now(), 4.0);
    }

    #[test]
    fn distant_processor_is_not_co_located() {
        let (env, registry) = model();
        let from = site(&env, "from_site", QUAY, 10.0, 10.0, 1);
        let vessel = site(&env, "vessel", DUMP, 10.0, 0.0, 1);
        let shift = ActivityBuilder::new(&env, &registry, "load")
            .shift_amount(ShiftSpec::new(&vessel, &from, &vessel).duration(1.0))
            .unwrap();
        register_processes(&[shift.clone()]).unwrap();
        let err = env.run(None).unwrap_err();
        assert!(matches!(err, LsimError::NotCoLocated { .. }));
        assert_eq!(shift.log().count(shift.id(), ActivityState::Start), 0);
    }

    #[test]
    fn shift_needs_exactly_one_of_duration_and_phase() {
        let (env, registry) = model();
        let from = site(&env, "from_site", QUAY, 10.0, 10.0, 1);
        let vessel = site(&env, "vessel", QUAY, 10.0, 0.0, 1);
        let neither = ActivityBuilder::new(&env, &registry, "neither")
            .shift_amount(ShiftSpec::new(&vessel, &from, &vessel))
            .unwrap_err();
        assert!(matches!(neither, LsimError::Config(_)));
        let both = ActivityBuilder::new(&env, &registry, "both")
            .shift_amount(ShiftSpec::new(&vessel, &from, &vessel).duration(1.0).phase(Phase::Loading))
            .unwrap_err();
        assert!(matches!(both, LsimError::Config(_)));
    }

    #[test]
    fn phase_needs_a_processor() {
        let (env, registry) = model();
        let from = site(&env, "from_site", QUAY, 10.0, 10.0, 1);
        let vessel = site(&env, "vessel", QUAY, 10.0, 0.0, 1);
        let err = ActivityBuilder::new(&env, &registry, "load")
            .shift_amount(ShiftSpec::new(&vessel, &from, &vessel).phase(Phase::Loading))
            .unwrap_err();
        assert!(matches!(err, LsimError::MissingCapability { capability: "processor", .. }));
    }

    #[test]
    fn engine_order_outside_unit_interval_is_rejected() {
        let (env, registry) = model();
        let dump = EntityBuilder::new("dump").at(DUMP).build(&env).unwrap();
        let vessel = site(&env, "vessel", QUAY, 1.0, 0.0, 1);
        let err = ActivityBuilder::new(&env, &registry, "sail")
            .travel(MoveSpec::new(&vessel, &dump).duration(1.0).engine_order(0.0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn mover_without_resource_is_rejected() {
        let (env, registry) = model();
        let dump = EntityBuilder::new("dump").at(DUMP).build(&env).unwrap();
        let err = ActivityBuilder::new(&env, &registry, "sail")
            .travel(MoveSpec::new(&dump, &dump).duration(1.0))
            .unwrap_err();
        assert!(matches!(err, LsimError::MissingCapability { capability: "resource", .. }));
    }

    #[test]
    fn container_dependent_speed_interpolates() {
        let speed = Speed::ContainerDependent { v_empty: 2.0, v_full: 1.0 };
        assert_eq!(speed.compute_v(0.0), 2.0);
        assert_eq!(speed.compute_v(1.0), 1.0);
        assert!(approx(speed.compute_v(0.5), 1.5));
    }
}

// ── Plug-ins ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod plugins {
    use super::*;

    #[test]
    fn delay_extends_the_activity() {
        let (env, registry) = model();
        let a = ActivityBuilder::new(&env, &registry, "delayed")
            .plugin(0, Rc::new(DelayPlugin::new(50.0).unwrap()))
            .basic(10.0)
            .unwrap();
        register_processes(&[a.clone()]).unwrap();
        env.run(None).unwrap();

        assert_eq!(a.log().first_time(a.id(), ActivityState::Stop), Some(15.0));
        assert_eq!(labelled(&a, ActivityState::WaitStart, LabelKind::Plugin), vec![10.0]);
        assert_eq!(labelled(&a, ActivityState::WaitStop, LabelKind::Plugin), vec![15.0]);
    }

    #[test]
    fn negative_percentage_is_rejected() {
        assert!(DelayPlugin::new(-1.0).is_err());
    }

    #[test]
    fn failing_hook_still_logs_stop() {
        let (env, registry) = model();
        let a = ActivityBuilder::new(&env, &registry, "hooked")
            .plugin(0, Rc::new(FailingPlugin))
            .basic(10.0)
            .unwrap();
        register_processes(&[a.clone()]).unwrap();
        let err = env.run(None).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Plugin);
        assert!(matches!(&err, LsimError::Plugin { plugin, .. } if plugin == "failing"));
        assert_eq!(a.log().count(a.id(), ActivityState::Start), 1);
        assert_eq!(a.log().first_time(a.id(), ActivityState::Stop), Some(0.0));
    }
}

// ── Registrar ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod registrar {
    use super::*;

    #[test]
    fn mutual_references_are_a_cycle() {
        let (env, registry) = model();
        let a = ActivityBuilder::new(&env, &registry, "a")
            .start_event(Expr::done("b"))
            .basic(1.0)
            .unwrap();
        let b = ActivityBuilder::new(&env, &registry, "b")
            .start_event(Expr::done("a"))
            .basic(1.0)
            .unwrap();
        let err = register_processes(&[a, b]).unwrap_err();
        match err {
            LsimError::RegistrationCycle(names) => {
                assert_eq!(names, vec!["a".to_owned(), "b".to_owned()]);
            }
            other => panic!("expected a cycle, got {other}"),
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (env, registry) = model();
        let a = basic(&env, &registry, "twin", 1.0);
        let b = basic(&env, &registry, "twin", 1.0);
        let err = register_processes(&[a, b]).unwrap_err();
        assert!(matches!(err, LsimError::DuplicateName(name) if name == "twin"));
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let (env, registry) = model();
        let a = ActivityBuilder::new(&env, &registry, "a")
            .start_event(Expr::done("ghost"))
            .basic(1.0)
            .unwrap();
        let err = register_processes(&[a]).unwrap_err();
        assert!(matches!(err, LsimError::UnknownActivity(_)));
    }

    #[test]
    fn shared_child_is_registered_once() {
        let (env, registry) = model();
        let child = basic(&env, &registry, "child", 1.0);
        let seq = ActivityBuilder::new(&env, &registry, "seq")
            .sequential(vec![child.clone()])
            .unwrap();
        register_processes(&[seq.clone(), child.clone()]).unwrap();
        env.run(None).unwrap();
        assert_eq!(child.log().count(child.id(), ActivityState::Start), 1);
    }

    #[test]
    fn reused_id_is_rejected() {
        let (env, registry) = model();
        let a = basic(&env, &registry, "a", 1.0);
        let err = ActivityBuilder::new(&env, &registry, "b").id(a.id()).basic(1.0).unwrap_err();
        assert!(matches!(err, LsimError::Config(_)));
    }
}

// ── Expressions ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod expressions {
    use super::*;

    fn concepts(env: &Environment) -> (Concepts, Rc<Entity>) {
        let hopper = site(env, "hopper", QUAY, 10.0, 4.0, 1);
        let mut concepts = Concepts::default();
        concepts.insert("hopper".into(), Rc::clone(&hopper));
        (concepts, hopper)
    }

    #[test]
    fn parses_nested_json() {
        let env = Environment::new();
        let (concepts, _) = concepts(&env);
        let value = json!({"or": [
            [{"type": "container", "concept": "hopper", "state": "full"},
             {"type": "time", "start_time": 10.0}],
            {"type": "activity", "state": "done", "name": "dredging"},
        ]});
        let expr = Expr::from_json(&value, &concepts).unwrap();
        let Expr::Any(items) = &expr else { panic!("expected any-of, got {expr:?}") };
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Expr::All(inner) if inner.len() == 2));
        let refs = expr.referenced_activities();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name.as_deref(), Some("dredging"));
    }

    #[test]
    fn rejects_unknown_concept_and_type() {
        let env = Environment::new();
        let (concepts, _) = concepts(&env);
        let unknown = json!({"type": "container", "concept": "barge", "state": "empty"});
        assert!(Expr::from_json(&unknown, &concepts).is_err());
        let bad_type = json!({"type": "weather"});
        assert!(Expr::from_json(&bad_type, &concepts).is_err());
        let bad_state = json!({"type": "activity", "state": "started", "name": "x"});
        assert!(Expr::from_json(&bad_state, &concepts).is_err());
    }

    #[test]
    fn level_expression_tracks_the_container() {
        let env = Environment::new();
        let registry = Registry::new();
        let (_, hopper) = concepts(&env);
        let above = Expr::level(&hopper, LevelOp::Ge, 6.0, DEFAULT_SLOT)
            .evaluate(&env, &registry)
            .unwrap();
        assert!(!above.is_triggered());
        hopper.container().unwrap().put(2.0, DEFAULT_SLOT).unwrap();
        assert!(above.is_triggered());
    }

    #[test]
    fn level_beyond_capacity_is_rejected() {
        let env = Environment::new();
        let registry = Registry::new();
        let (_, hopper) = concepts(&env);
        let err = Expr::level(&hopper, LevelOp::Ge, 11.0, DEFAULT_SLOT)
            .evaluate(&env, &registry)
            .unwrap_err();
        assert!(matches!(err, LsimError::LevelOutOfRange { .. }));
    }

    #[test]
    fn done_before_registration_is_an_error() {
        let env = Environment::new();
        let registry = Registry::new();
        let _a = basic(&env, &registry, "a", 1.0);
        let err = Expr::done("a").evaluate(&env, &registry).unwrap_err();
        assert!(matches!(err, LsimError::NotRegistered(_)));
    }
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod snapshots {
    use super::*;

    #[test]
    fn entity_snapshot_lists_capabilities() {
        let env = Environment::new();
        let vessel = site(&env, "vessel", QUAY, 10.0, 2.5, 3);
        let snap = vessel.snapshot();
        assert_eq!(snap["name"], json!("vessel"));
        assert_eq!(snap["container"][DEFAULT_SLOT]["level"], json!(2.5));
        assert_eq!(snap["resource"]["nr_resources"], json!(3));
        assert_eq!(snap["geometry"]["x"], json!(QUAY.x));
        assert!(snap.get("speed").is_none());
    }

    #[test]
    fn activity_snapshot_nests_children() {
        let (env, registry) = model();
        let a = basic(&env, &registry, "a", 1.0);
        let seq = ActivityBuilder::new(&env, &registry, "seq").sequential(vec![a]).unwrap();
        let snap = seq.snapshot();
        assert_eq!(snap["type"], json!("SequentialActivity"));
        assert_eq!(snap["sub_processes"][0]["name"], json!("a"));
        assert_eq!(snap["done"], json!(false));
    }
}

// ── Property tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn sequential_takes_the_sum(durations in prop::collection::vec(0.0_f64..50.0, 1..8)) {
            let (env, registry) = model();
            let children: Vec<_> = durations
                .iter()
                .enumerate()
                .map(|(i, d)| basic(&env, &registry, &format!("c{i}"), *d))
                .collect();
            let seq = ActivityBuilder::new(&env, &registry, "seq").sequential(children).unwrap();
            register_processes(&[seq.clone()]).unwrap();
            env.run(None).unwrap();
            let total: f64 = durations.iter().sum();
            let stop = seq.log().first_time(seq.id(), ActivityState::Stop).unwrap();
            prop_assert!(approx(stop, total));
        }

        #[test]
        fn parallel_takes_the_longest(durations in prop::collection::vec(0.0_f64..50.0, 1..8)) {
            let (env, registry) = model();
            let children: Vec<_> = durations
                .iter()
                .enumerate()
                .map(|(i, d)| basic(&env, &registry, &format!("c{i}"), *d))
                .collect();
            let par = ActivityBuilder::new(&env, &registry, "par").parallel(children).unwrap();
            register_processes(&[par.clone()]).unwrap();
            env.run(None).unwrap();
            let longest = durations.iter().cloned().fold(0.0, f64::max);
            let stop = par.log().first_time(par.id(), ActivityState::Stop).unwrap();
            prop_assert!(approx(stop, longest));
            prop_assert_eq!(par.log().spans().len(), durations.len() + 1);
        }

        #[test]
        fn shifted_material_is_conserved(amounts in prop::collection::vec(1.0_f64..5.0, 1..6)) {
            let (env, registry) = model();
            let from = site(&env, "from", QUAY, 100.0, 30.0, 1);
            let to = site(&env, "to", QUAY, 100.0, 0.0, 1);
            let vessel = site(&env, "vessel", QUAY, 5.0, 0.0, 1);
            let shifts: Vec<_> = amounts
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    ActivityBuilder::new(&env, &registry, format!("s{i}"))
                        .shift_amount(ShiftSpec::new(&vessel, &from, &to).amount(*a).duration(1.0))
                        .unwrap()
                })
                .collect();
            let seq = ActivityBuilder::new(&env, &registry, "seq").sequential(shifts).unwrap();
            register_processes(&[seq]).unwrap();
            env.run(None).unwrap();
            let moved: f64 = amounts.iter().sum();
            prop_assert!(approx(level(&from) + level(&to), 30.0));
            prop_assert!(approx(level(&to), moved));
        }
    }
}
