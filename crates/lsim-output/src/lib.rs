//! `lsim-output` — writers and summaries for finished (or running) models.
//!
//! | Item                | Produces                                               |
//! |---------------------|--------------------------------------------------------|
//! | [`LogbookCsvWriter`] | `logbook.csv` (v1 records), `levels.csv` (level trace) |
//! | [`LevelObserver`]   | level-change rows while the environment runs           |
//! | [`snapshot_json`]   | JSON array of entity snapshots                         |
//! | [`utilisation`]     | busy fraction of a logbook over a horizon              |
//!
//! # Usage
//!
//! ```rust,ignore
//! use lsim_output::{LevelObserver, LogbookCsvWriter, OutputWriter};
//!
//! let writer = LogbookCsvWriter::new(Path::new("./output"))?;
//! let mut obs = LevelObserver::new(writer, vec![from_site.clone(), to_site.clone()]);
//! env.run_observed(None, &mut obs)?;
//! let mut writer = obs.into_writer();
//! writer.write_logbook(vessel.name(), vessel.logbook())?;
//! writer.finish()?;
//! ```

pub mod csv;
pub mod error;
pub mod observer;
pub mod row;
pub mod summary;
pub mod writer;


pub use csv::LogbookCsvWriter;
pub use error::{OutputError, OutputResult};
pub use observer::LevelObserver;
pub use row::{LevelRow, LogRow};
pub use summary::{snapshot_json, utilisation};
pub use writer::OutputWriter;
