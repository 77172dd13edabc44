//! Moving an entity to another entity's location.

use std::rc::Rc;

use lsim_core::{LsimError, LsimResult, SimTime};

use super::Activity;
use crate::entity::Entity;

/// What to move where.
///
/// Without a fixed `duration` the sailing time is the geodesic distance
/// divided by the mover's current speed times `engine_order`.
#[derive(Clone, Debug)]
pub struct MoveSpec {
    pub mover:        Rc<Entity>,
    pub destination:  Rc<Entity>,
    pub duration:     Option<SimTime>,
    pub engine_order: f64,
}

impl MoveSpec {
    pub fn new(mover: &Rc<Entity>, destination: &Rc<Entity>) -> Self {
        Self {
            mover:        Rc::clone(mover),
            destination:  Rc::clone(destination),
            duration:     None,
            engine_order: 1.0,
        }
    }

    pub fn duration(mut self, duration: SimTime) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Fraction of full speed, in (0, 1].
    pub fn engine_order(mut self, engine_order: f64) -> Self {
        self.engine_order = engine_order;
        self
    }

    pub(super) fn validate(&self, activity: &str) -> LsimResult<()> {
        self.mover.resource()?;
        self.destination.geometry()?;
        if !(self.engine_order > 0.0 && self.engine_order <= 1.0) {
            return Err(LsimError::Config(format!(
                "{activity}: engine_order must lie in (0, 1], got {}",
                self.engine_order
            )));
        }
        match self.duration {
            Some(d) if !d.is_finite() || d < 0.0 => Err(LsimError::Config(format!(
                "{activity}: duration must be finite and non-negative, got {d}"
            ))),
            Some(_) => Ok(()),
            None => {
                self.mover.geometry()?;
                self.mover.speed()?;
                Ok(())
            }
        }
    }
}

pub(super) async fn stage(activity: &Activity, spec: &MoveSpec) -> LsimResult<()> {
    activity.acquire(spec.mover.resource()?).await;
    Ok(())
}

pub(super) async fn body(activity: &Activity, spec: &MoveSpec) -> LsimResult<()> {
    let duration = match spec.duration {
        Some(d) => d,
        None => {
            let distance = spec.mover.distance_to(&spec.destination)?;
            let speed = spec.mover.current_speed()? * spec.engine_order;
            if !(speed > 0.0) {
                return Err(LsimError::Precondition(format!(
                    "{}: {} has no positive sailing speed ({speed})",
                    activity.name(),
                    spec.mover.name()
                )));
            }
            distance / speed
        }
    };
    activity.env().timeout(duration)?.await;
    spec.mover.set_geometry(spec.destination.geometry()?);
    Ok(())
}
