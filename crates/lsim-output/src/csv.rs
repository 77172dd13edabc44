//! CSV output backend.
//!
//! Creates two files in the configured output directory:
//! - `logbook.csv`
//! - `levels.csv`

use std::fs::File;
use std::path::Path;

use csv::Writer;

use crate::writer::OutputWriter;
use crate::{LevelRow, LogRow, OutputResult};

/// Writes logbooks and level traces to two CSV files.
pub struct LogbookCsvWriter {
    logbook:  Writer<File>,
    levels:   Writer<File>,
    finished: bool,
}

impl LogbookCsvWriter {
    /// Open (or create) the two CSV files in `dir` and write the header rows.
    pub fn new(dir: &Path) -> OutputResult<Self> {
        let mut logbook = Writer::from_path(dir.join("logbook.csv"))?;
        logbook.write_record([
            "object",
            "t",
            "activity_id",
            "activity_state",
            "activity_label",
            "x",
            "y",
            "levels",
        ])?;

        let mut levels = Writer::from_path(dir.join("levels.csv"))?;
        levels.write_record(["t", "object", "slot", "level"])?;

        Ok(Self { logbook, levels, finished: false })
    }
}

fn opt(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

impl OutputWriter for LogbookCsvWriter {
    fn write_log_rows(&mut self, rows: &[LogRow]) -> OutputResult<()> {
        for row in rows {
            self.logbook.write_record(&[
                row.object.clone(),
                row.t.to_string(),
                row.activity_id.clone(),
                row.activity_state.to_owned(),
                row.activity_label.clone(),
                opt(row.x),
                opt(row.y),
                row.levels.clone(),
            ])?;
        }
        Ok(())
    }

    fn write_level_rows(&mut self, rows: &[LevelRow]) -> OutputResult<()> {
        for row in rows {
            self.levels.write_record(&[
                row.t.to_string(),
                row.object.clone(),
                row.slot.clone(),
                row.level.to_string(),
            ])?;
        }
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.logbook.flush()?;
        self.levels.flush()?;
        Ok(())
    }
}
