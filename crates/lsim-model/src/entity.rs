//! Simulation objects and their capabilities.
//!
//! An [`Entity`] is one record with optional capabilities.  Activities ask
//! for the capability they need and get `MissingCapability` when the entity
//! does not have it:
//!
//! | Capability | Needed by                                   |
//! |------------|---------------------------------------------|
//! | geometry   | Move (mover, destination), co-location      |
//! | container  | ShiftAmount (origin, destination), `Expr`   |
//! | resource   | Move (mover), ShiftAmount (all three)       |
//! | speed      | Move without fixed duration                 |
//! | processor  | ShiftAmount with a loading/unloading phase  |

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use lsim_core::{EntityId, GeoPoint, LsimError, LsimResult};
use lsim_engine::{Container, DEFAULT_SLOT, Environment, Resource};

use crate::logbook::{Logbook, Loggable, ObjectState};

// ── Speed ─────────────────────────────────────────────────────────────────────

/// How fast a mover sails, as a function of its fill fraction.
#[derive(Clone)]
pub enum Speed {
    Constant(f64),
    /// Linear between the empty and the full speed.
    ContainerDependent { v_empty: f64, v_full: f64 },
    Curve(Rc<dyn Fn(f64) -> f64>),
}

impl Speed {
    /// Speed in m/s at `fraction` ∈ [0, 1] of the container filled.
    pub fn compute_v(&self, fraction: f64) -> f64 {
        let fraction = fraction.clamp(0.0, 1.0);
        match self {
            Speed::Constant(v) => *v,
            Speed::ContainerDependent { v_empty, v_full } => {
                v_empty + (v_full - v_empty) * fraction
            }
            Speed::Curve(f) => f(fraction),
        }
    }
}

impl fmt::Debug for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speed::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Speed::ContainerDependent { v_empty, v_full } => f
                .debug_struct("ContainerDependent")
                .field("v_empty", v_empty)
                .field("v_full", v_full)
                .finish(),
            Speed::Curve(_) => f.write_str("Curve(..)"),
        }
    }
}

// ── Processor ─────────────────────────────────────────────────────────────────

/// Loading or unloading rate.
#[derive(Clone)]
pub enum Rate {
    /// Units per second.
    PerSecond(f64),
    /// Duration in seconds for moving the level from the first to the second
    /// argument.
    Curve(Rc<dyn Fn(f64, f64) -> f64>),
}

impl Rate {
    pub fn duration(&self, level_from: f64, level_to: f64) -> f64 {
        match self {
            Rate::PerSecond(r) => (level_to - level_from).abs() / r,
            Rate::Curve(f) => f(level_from, level_to),
        }
    }
}

impl fmt::Debug for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rate::PerSecond(r) => f.debug_tuple("PerSecond").field(r).finish(),
            Rate::Curve(_) => f.write_str("Curve(..)"),
        }
    }
}

/// Something that can load and unload material.
#[derive(Clone, Debug)]
pub struct Processor {
    pub loading:            Rate,
    pub unloading:          Rate,
    /// Fixed seconds added to every loading operation.
    pub manoeuvring_load:   f64,
    /// Fixed seconds added to every unloading operation.
    pub manoeuvring_unload: f64,
}

impl Processor {
    pub fn new(loading: Rate, unloading: Rate) -> Self {
        Self { loading, unloading, manoeuvring_load: 0.0, manoeuvring_unload: 0.0 }
    }

    pub fn with_manoeuvring(mut self, load: f64, unload: f64) -> Self {
        self.manoeuvring_load = load;
        self.manoeuvring_unload = unload;
        self
    }

    /// Seconds to load `amount` into `destination`, driven by its level.
    pub fn loading(&self, destination: &Entity, amount: f64, slot: &str) -> LsimResult<f64> {
        let from = destination.container()?.level(slot)?;
        Ok(self.loading.duration(from, from + amount) + self.manoeuvring_load)
    }

    /// Seconds to unload `amount` out of `origin`, driven by its level.
    pub fn unloading(&self, origin: &Entity, amount: f64, slot: &str) -> LsimResult<f64> {
        let from = origin.container()?.level(slot)?;
        Ok(self.unloading.duration(from, from - amount) + self.manoeuvring_unload)
    }
}

// ── Entity ────────────────────────────────────────────────────────────────────

/// A site, vessel or other simulation object.
pub struct Entity {
    id:        EntityId,
    name:      String,
    geometry:  RefCell<Option<GeoPoint>>,
    container: Option<Container>,
    resource:  Option<Resource>,
    speed:     Option<Speed>,
    processor: Option<Processor>,
    log:       Logbook,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("geometry", &*self.geometry.borrow())
            .finish_non_exhaustive()
    }
}

impl Entity {
    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn missing(&self, capability: &'static str) -> LsimError {
        LsimError::MissingCapability { entity: self.name.clone(), capability }
    }

    pub fn geometry(&self) -> LsimResult<GeoPoint> {
        self.geometry.borrow().ok_or_else(|| self.missing("geometry"))
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry.borrow().is_some()
    }

    pub fn set_geometry(&self, point: GeoPoint) {
        *self.geometry.borrow_mut() = Some(point);
    }

    pub fn container(&self) -> LsimResult<&Container> {
        self.container.as_ref().ok_or_else(|| self.missing("container"))
    }

    pub fn resource(&self) -> LsimResult<&Resource> {
        self.resource.as_ref().ok_or_else(|| self.missing("resource"))
    }

    pub fn speed(&self) -> LsimResult<&Speed> {
        self.speed.as_ref().ok_or_else(|| self.missing("speed"))
    }

    pub fn processor(&self) -> LsimResult<&Processor> {
        self.processor.as_ref().ok_or_else(|| self.missing("processor"))
    }

    /// Geodesic distance to `other` in metres.
    pub fn distance_to(&self, other: &Entity) -> LsimResult<f64> {
        Ok(self.geometry()?.distance_m(other.geometry()?))
    }

    /// `true` when `other` lies within `tolerance_m` metres.
    pub fn is_at(&self, other: &Entity, tolerance_m: f64) -> LsimResult<bool> {
        Ok(self.distance_to(other)? <= tolerance_m)
    }

    /// Fill fraction of the default slot; 0 without one.
    pub fn fill_fraction(&self) -> f64 {
        let Some(c) = &self.container else { return 0.0 };
        match (c.level(DEFAULT_SLOT), c.capacity(DEFAULT_SLOT)) {
            (Ok(level), Ok(cap)) if cap > 0.0 => level / cap,
            _ => 0.0,
        }
    }

    /// Current sailing speed, taking the fill fraction into account.
    pub fn current_speed(&self) -> LsimResult<f64> {
        Ok(self.speed()?.compute_v(self.fill_fraction()))
    }
}

impl Loggable for Entity {
    fn logbook(&self) -> &Logbook {
        &self.log
    }

    fn object_state(&self) -> ObjectState {
        let levels = self
            .container
            .as_ref()
            .map(|c| c.snapshot().into_iter().map(|(slot, s)| (slot, s.level)).collect())
            .unwrap_or_default();
        ObjectState { geometry: *self.geometry.borrow(), levels }
    }
}

// ── EntityBuilder ─────────────────────────────────────────────────────────────

/// Fluent builder for [`Entity`].
///
/// ```rust,ignore
/// let site = EntityBuilder::new("from_site")
///     .at(GeoPoint::new(4.18, 52.18))
///     .container(100.0, 100.0)
///     .resource(1)
///     .build(&env)?;
/// ```
pub struct EntityBuilder {
    name:           String,
    id:             Option<EntityId>,
    geometry:       Option<GeoPoint>,
    single:         Option<(f64, f64)>,
    slots:          Vec<(String, f64, f64)>,
    store_capacity: Option<usize>,
    nr_resources:   Option<usize>,
    speed:          Option<Speed>,
    processor:      Option<Processor>,
}

impl EntityBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name:           name.into(),
            id:             None,
            geometry:       None,
            single:         None,
            slots:          Vec::new(),
            store_capacity: None,
            nr_resources:   None,
            speed:          None,
            processor:      None,
        }
    }

    pub fn id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn at(mut self, point: GeoPoint) -> Self {
        self.geometry = Some(point);
        self
    }

    /// A container with only the default slot.
    pub fn container(mut self, capacity: f64, level: f64) -> Self {
        self.single = Some((capacity, level));
        self
    }

    /// Add a named slot (multi-slot container).
    pub fn slot(mut self, name: impl Into<String>, capacity: f64, level: f64) -> Self {
        self.slots.push((name.into(), capacity, level));
        self
    }

    /// Upper bound on the number of named slots.  Defaults to the number of
    /// slots given.
    pub fn store_capacity(mut self, n: usize) -> Self {
        self.store_capacity = Some(n);
        self
    }

    pub fn resource(mut self, nr_resources: usize) -> Self {
        self.nr_resources = Some(nr_resources);
        self
    }

    pub fn speed(mut self, speed: Speed) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn processor(mut self, processor: Processor) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn build(self, env: &Environment) -> LsimResult<Rc<Entity>> {
        if self.single.is_some() && !self.slots.is_empty() {
            return Err(LsimError::Config(format!(
                "{}: use either container() or slot(), not both",
                self.name
            )));
        }
        let container = match self.single {
            Some((capacity, level)) => Some(Container::new(env, capacity, level)?),
            None if !self.slots.is_empty() => {
                let c = Container::multi(env, self.store_capacity.unwrap_or(self.slots.len()));
                for (slot, capacity, level) in &self.slots {
                    c.init_slot(slot, *capacity, *level)?;
                }
                Some(c)
            }
            None => None,
        };
        let resource = self.nr_resources.map(|n| Resource::new(env, n)).transpose()?;

        match &self.speed {
            Some(Speed::Constant(v)) if !(*v > 0.0) => {
                return Err(LsimError::Config(format!("{}: speed must be positive", self.name)));
            }
            Some(Speed::ContainerDependent { v_empty, v_full })
                if !(*v_empty > 0.0 && *v_full > 0.0) =>
            {
                return Err(LsimError::Config(format!(
                    "{}: empty and full speeds must be positive",
                    self.name
                )));
            }
            _ => {}
        }
        if let Some(p) = &self.processor {
            for rate in [&p.loading, &p.unloading] {
                if let Rate::PerSecond(r) = rate {
                    if !(*r > 0.0) {
                        return Err(LsimError::Config(format!(
                            "{}: processing rates must be positive",
                            self.name
                        )));
                    }
                }
            }
        }

        Ok(Rc::new(Entity {
            id: self.id.unwrap_or_else(EntityId::new_v4),
            name: self.name,
            geometry: RefCell::new(self.geometry),
            container,
            resource,
            speed: self.speed,
            processor: self.processor,
            log: Logbook::new(),
        }))
    }
}
