//! `lsim-core` — foundational types for the `lsim` logistics simulation
//! framework.
//!
//! This crate is a dependency of every other `lsim-*` crate.  It has no
//! `lsim-*` dependencies and minimal external ones (`thiserror`, `uuid`, plus
//! optional `serde`).
//!
//! # What lives here
//!
//! | Module          | Contents                                                   |
//! |-----------------|------------------------------------------------------------|
//! | [`ids`]         | `EventId`, `ProcessId`, `ResourceId`, `RequestId`, `ContainerId`, `ActivityId`, `EntityId` |
//! | [`geo`]         | `GeoPoint`, WGS-84 inverse geodesic distance               |
//! | [`config`]      | `SimConfig`, `SimTime`                                     |
//! | [`error`]       | `LsimError`, `ErrorKind`, `LsimResult`                     |
//!
//! # Feature flags
//!
//! | Flag    | Effect                                                     |
//! |---------|------------------------------------------------------------|
//! | `serde` | Adds `Serialize`/`Deserialize` to all public types.        |

pub mod config;
pub mod error;
pub mod geo;
pub mod ids;


// ── Re-exports ────────────────────────────────────────────────────────────────

pub use config::{SimConfig, SimTime};
pub use error::{ErrorKind, LsimError, LsimResult};
pub use geo::{GeoPoint, inverse_distance_m};
pub use ids::{ActivityId, ContainerId, EntityId, EventId, ProcessId, RequestId, ResourceId};
