//! `lsim-engine` — the discrete-event kernel of the lsim framework.
//!
//! # Event loop
//!
//! ```text
//! loop:
//!   ① Pop    — take the scheduled event with the smallest (t, seq).
//!   ② Clock  — advance `now` to t (never backwards).
//!   ③ Fire   — mark the event processed and run its callbacks in the order
//!              they were registered; a callback may resume a process, which
//!              runs synchronously until its next `.await`.
//!   ④ Check  — if a process returned an error, stop and report it.
//! ```
//!
//! Processes are plain `async` blocks.  Awaiting an [`Event`] suspends the
//! process until the loop fires that event; nothing else suspends it.
//!
//! | Type          | Role                                                   |
//! |---------------|--------------------------------------------------------|
//! | [`Environment`] | clock, queue and process table                      |
//! | [`Event`]     | one-shot occurrence with a value and callbacks         |
//! | [`Process`]   | a spawned future plus its *done* event                 |
//! | [`Resource`]  | counted FIFO resource                                  |
//! | [`Container`] | multi-slot stock with level-predicated events          |
//!
//! # Quick-start
//!
//! ```rust,ignore
//! use lsim_engine::Environment;
//!
//! let env = Environment::new();
//! let e = env.clone();
//! env.process(async move {
//!     e.timeout(5.0)?.await;
//!     Ok(Default::default())
//! });
//! env.run(None)?;
//! assert_eq!(env.now(), 5.0);
//! ```

pub mod container;
pub mod environment;
pub mod event;
pub mod observer;
pub mod process;
pub mod resource;


pub use container::{Container, DEFAULT_SLOT, EPSILON, LevelOp, SlotLevel, reservation_slot};
pub use environment::Environment;
pub use event::{Event, EventValue, Wait};
pub use observer::{EnvObserver, NoopObserver};
pub use process::{LocalBoxFuture, Process};
pub use resource::{Request, Resource};
