//! The `OutputWriter` trait implemented by backend writers.

use lsim_model::Logbook;

use crate::{LevelRow, LogRow, OutputResult};

/// Trait implemented by the output backends.
///
/// Errors raised while an observer drives the writer are stored by the
/// observer and retrieved with [`LevelObserver::take_error`](crate::LevelObserver::take_error).
pub trait OutputWriter {
    /// Write a batch of logbook rows.
    fn write_log_rows(&mut self, rows: &[LogRow]) -> OutputResult<()>;

    /// Write a batch of level rows.
    fn write_level_rows(&mut self, rows: &[LevelRow]) -> OutputResult<()>;

    /// Flush and close all underlying file handles.
    ///
    /// Calling it again is a no-op.
    fn finish(&mut self) -> OutputResult<()>;

    /// Write every v1 record of `logbook` under `object`.  Returns the row count.
    fn write_logbook(&mut self, object: &str, logbook: &Logbook) -> OutputResult<usize> {
        let rows: Vec<LogRow> =
            logbook.records().iter().map(|r| LogRow::from_record(object, r)).collect();
        self.write_log_rows(&rows)?;
        Ok(rows.len())
    }
}
