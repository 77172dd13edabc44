//! Framework error type.
//!
//! Every fallible operation in the `lsim-*` crates returns [`LsimResult`].
//! The variants are grouped into the four failure classes of the simulation
//! kernel, exposed through [`LsimError::kind`]:
//!
//! | Kind           | Raised when                                                |
//! |----------------|------------------------------------------------------------|
//! | `Config`       | the model is malformed; fatal at registration              |
//! | `Invariant`    | a kernel invariant would break; fatal during the run       |
//! | `Precondition` | an activity's physical precondition fails during the run   |
//! | `Plugin`       | a pre/post-process hook failed                             |
//!
//! A `While` reaching `max_iterations` is *not* an error: it stops cleanly.

use thiserror::Error;

use crate::{EventId, RequestId};

/// Coarse classification of an [`LsimError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Invariant,
    Precondition,
    Plugin,
}

/// The top-level error type shared by all `lsim-*` crates.
#[derive(Debug, Error)]
pub enum LsimError {
    // ── Configuration ─────────────────────────────────────────────────────
    #[error("configuration error: {0}")]
    Config(String),

    #[error("duplicate activity name {0:?}")]
    DuplicateName(String),

    #[error("activity reference {0} resolves to no activity")]
    UnknownActivity(String),

    #[error("activity {0:?} has no done event; it has not been registered")]
    NotRegistered(String),

    #[error("recursion in activity graph (involving {0:?})")]
    RegistrationCycle(Vec<String>),

    #[error("unknown container slot {0:?}")]
    UnknownSlot(String),

    #[error("{entity} has no {capability}")]
    MissingCapability {
        entity:     String,
        capability: &'static str,
    },

    #[error("level {level} outside [0, {capacity}] for slot {slot:?}")]
    LevelOutOfRange {
        slot:     String,
        level:    f64,
        capacity: f64,
    },

    // ── Kernel invariants ─────────────────────────────────────────────────
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("event {0} was triggered twice")]
    AlreadyTriggered(EventId),

    #[error("negative or non-finite timeout delay {0}")]
    NegativeTimeout(f64),

    #[error("request {0} is not held by or queued at this resource")]
    UnknownRequest(RequestId),

    // ── Run-time preconditions ────────────────────────────────────────────
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("{what} is not at {site} ({distance_m:.1} m apart, tolerance {tolerance_m} m)")]
    NotCoLocated {
        what:        String,
        site:        String,
        distance_m:  f64,
        tolerance_m: f64,
    },

    #[error("activity {activity:?} has no viable amount to shift")]
    NoViableAmount { activity: String },

    // ── Plug-ins ──────────────────────────────────────────────────────────
    #[error("plugin {plugin} failed: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: Box<LsimError>,
    },
}

impl LsimError {
    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LsimError::Config(_)
            | LsimError::DuplicateName(_)
            | LsimError::UnknownActivity(_)
            | LsimError::NotRegistered(_)
            | LsimError::RegistrationCycle(_)
            | LsimError::UnknownSlot(_)
            | LsimError::MissingCapability { .. }
            | LsimError::LevelOutOfRange { .. } => ErrorKind::Config,

            LsimError::Invariant(_)
            | LsimError::AlreadyTriggered(_)
            | LsimError::NegativeTimeout(_)
            | LsimError::UnknownRequest(_) => ErrorKind::Invariant,

            LsimError::Precondition(_)
            | LsimError::NotCoLocated { .. }
            | LsimError::NoViableAmount { .. } => ErrorKind::Precondition,

            LsimError::Plugin { .. } => ErrorKind::Plugin,
        }
    }
}

/// Shorthand result type for all `lsim-*` crates.
pub type LsimResult<T> = Result<T, LsimError>;
