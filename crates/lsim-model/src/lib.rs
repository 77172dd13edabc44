//! `lsim-model` — logistics activities on top of the `lsim-engine` kernel.
//!
//! # Building a model
//!
//! ```text
//!   Entity (site / vessel)  ──  container, resource, geometry, speed, processor
//!        ▲
//!        │ referenced by
//!   Activity tree           ──  Basic | Move | ShiftAmount
//!                               Sequential | Parallel | While (Repeat)
//!        │ registered by
//!   register_processes      ──  topological order, one process per activity
//! ```
//!
//! Every activity writes `START`/`STOP` (and `WAIT_START`/`WAIT_STOP`) records
//! to its own [`Logbook`] and to the logbooks of its *additional logs*.
//!
//! # Quick-start
//!
//! ```rust,ignore
//! use lsim_engine::Environment;
//! use lsim_model::{ActivityBuilder, Registry, register_processes};
//!
//! let env = Environment::new();
//! let registry = Registry::new();
//! let a = ActivityBuilder::new(&env, &registry, "wait a bit").basic(10.0)?;
//! register_processes(&[a.clone()])?;
//! env.run(None)?;
//! ```

pub mod activity;
pub mod entity;
pub mod expr;
pub mod logbook;
pub mod plugin;
pub mod registrar;
pub mod registry;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use activity::{
    Activity, ActivityBuilder, ActivityKind, Composite, HeldResource, MoveSpec, Phase,
    ResourceTokens, ShiftSpec, WhileSpec,
};
pub use entity::{Entity, EntityBuilder, Processor, Rate, Speed};
pub use expr::{ActivityRef, Concepts, Expr, LevelState};
pub use logbook::{
    ActivityLabel, ActivityState, LabelKind, LegacyRecord, LogRecord, Logbook, Loggable,
    ObjectState, Span,
};
pub use plugin::{DelayPlugin, Plugin};
pub use registrar::register_processes;
pub use registry::Registry;
